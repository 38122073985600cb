//! Gateway errors and HTML error pages.
//!
//! Lower layers wrap their failures with the operation and locator involved.
//! Classification into a status code happens once, in
//! [`GatewayError::status_code`], when the orchestrator decides what to show
//! the client.

use http::header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, HeaderValue};
use http::StatusCode;
use relaygate_core::CoreError;
use relaygate_core::error::{carried_status, error_chain};
use relaygate_core::utils::html_escape;
use relaygate_decrypt::DecryptError;

use crate::sink::{ResponseSink, ResponseWriter};
use crate::transform::TransformError;

/// Errors raised while delivering a request.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The path, storage, or link could not be resolved.
    #[error("failed to resolve {path}")]
    Resolve {
        /// Request path.
        path: String,
        /// Resolver failure.
        #[source]
        source: CoreError,
    },

    /// The storage may not be proxied for this file.
    #[error("proxy not allowed")]
    ProxyNotAllowed,

    /// No decryption credential is configured.
    #[error("Decryption key not configured")]
    DecryptKeyMissing,

    /// The link has neither a URL nor a physical path.
    #[error("cannot create reader: object has neither a link url nor a local path")]
    NoReaderSource,

    /// A decrypt reader factory or stream could not be created.
    #[error("failed to create decrypt reader for {locator}")]
    Decrypt {
        /// Container URL or path.
        locator: String,
        /// Decrypt failure.
        #[source]
        source: DecryptError,
    },

    /// Query parameters could not be forwarded to the link.
    #[error("failed to forward query parameters")]
    InjectQuery(#[source] CoreError),

    /// The `Range` header cannot be satisfied.
    #[error("The requested range is not satisfiable")]
    RangeNotSatisfiable {
        /// Object size, reported in `Content-Range`.
        size: u64,
    },

    /// The object's content could not be opened.
    #[error("failed to open {locator}")]
    Source {
        /// URL or path.
        locator: String,
        /// Underlying failure.
        #[source]
        source: CoreError,
    },

    /// Copying content to the client failed.
    #[error("failed to copy content")]
    Copy(#[source] std::io::Error),

    /// Markdown rendering or sanitization failed.
    #[error("failed to render markdown")]
    Transform(#[source] TransformError),
}

impl GatewayError {
    /// HTTP status shown to the client.
    ///
    /// Decrypt failures are always 500. Otherwise an upstream status carried
    /// anywhere in the source chain wins over the generic 500.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ProxyNotAllowed => StatusCode::FORBIDDEN,
            Self::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::Decrypt { .. } | Self::DecryptKeyMissing | Self::NoReaderSource => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            other => carried_status(other).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    /// Message shown on the error page.
    #[must_use]
    pub fn message(&self) -> String {
        error_chain(self)
    }
}

/// Render a small HTML error page.
#[must_use]
pub fn error_page(status: StatusCode, message: &str) -> String {
    let title = format!(
        "{} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Error")
    );
    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{title}</title></head>\n\
         <body>\n<h1>{title}</h1>\n<p>{}</p>\n</body>\n</html>\n",
        html_escape(message)
    )
}

/// Send the error page for `err` through `sink`, replacing any headers set
/// so far. Unsatisfiable ranges also get `Content-Range: bytes */size`.
///
/// # Errors
///
/// Fails if a response was already committed or the client is gone.
pub fn send_error_page(sink: &mut ResponseSink, err: &GatewayError) -> std::io::Result<()> {
    let status = err.status_code();
    let page = error_page(status, &err.message());
    sink.set_status(status);
    let headers = sink.headers_mut();
    headers.clear();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    headers.insert(CONTENT_LENGTH, HeaderValue::from(page.len()));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if let GatewayError::RangeNotSatisfiable { size } = err {
        if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
            headers.insert(CONTENT_RANGE, value);
        }
    }
    sink.send(page)
}

#[cfg(test)]
mod tests {
    use relaygate_core::UpstreamStatusError;

    use super::*;

    #[test]
    fn test_should_classify_fixed_statuses() {
        assert_eq!(GatewayError::ProxyNotAllowed.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            GatewayError::RangeNotSatisfiable { size: 10 }.status_code(),
            StatusCode::RANGE_NOT_SATISFIABLE
        );
        assert_eq!(
            GatewayError::DecryptKeyMissing.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            GatewayError::NoReaderSource.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_should_surface_carried_upstream_status() {
        let err = GatewayError::Source {
            locator: "http://origin/a".to_owned(),
            source: CoreError::Upstream(UpstreamStatusError {
                url: "http://origin/a".to_owned(),
                status: StatusCode::NOT_FOUND,
            }),
        };
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert!(err.message().contains("status: 404"));
    }

    #[test]
    fn test_should_keep_decrypt_construction_failures_at_500() {
        let err = GatewayError::Decrypt {
            locator: "http://origin/a.sccgv".to_owned(),
            source: DecryptError::Core(CoreError::Upstream(UpstreamStatusError {
                url: "http://origin/a.sccgv".to_owned(),
                status: StatusCode::UNAUTHORIZED,
            })),
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_should_default_resolution_errors_to_500() {
        let err = GatewayError::Resolve {
            path: "/a".to_owned(),
            source: CoreError::NotFound("/a".to_owned()),
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message(), "failed to resolve /a: object not found: /a");
    }

    #[test]
    fn test_should_escape_error_page_message() {
        let page = error_page(StatusCode::FORBIDDEN, "<script>alert(1)</script>");
        assert!(page.contains("<title>403 Forbidden</title>"));
        assert!(page.contains("&lt;script&gt;"));
        assert!(!page.contains("<script>"));
    }
}
