//! Error types for the RelayGate core.
//!
//! [`CoreError`] covers storage resolution, configuration, and upstream
//! fetch failures. An upstream HTTP failure is carried as an
//! [`UpstreamStatusError`] in the error's source chain so that the HTTP layer
//! can surface the original status code.

use std::fmt;

use http::StatusCode;

/// An upstream HTTP request answered with a failure status.
///
/// This is the status "carrier": callers walk an error's `source()` chain
/// looking for this type to decide which status code to show the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamStatusError {
    /// The URL that was requested.
    pub url: String,
    /// The status code returned by the upstream.
    pub status: StatusCode,
}

impl fmt::Display for UpstreamStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "http request [{}] failure, status: {}",
            self.url,
            self.status.as_u16()
        )
    }
}

impl std::error::Error for UpstreamStatusError {}

/// Find the first [`UpstreamStatusError`] in an error's source chain,
/// starting with the error itself.
#[must_use]
pub fn carried_status(err: &(dyn std::error::Error + 'static)) -> Option<StatusCode> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(carrier) = e.downcast_ref::<UpstreamStatusError>() {
            return Some(carrier.status);
        }
        current = e.source();
    }
    None
}

/// Render an error and all of its sources as `outer: inner: innermost`.
#[must_use]
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut current = err.source();
    while let Some(e) = current {
        out.push_str(": ");
        out.push_str(&e.to_string());
        current = e.source();
    }
    out
}

/// Core error type for RelayGate infrastructure.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The requested object does not exist.
    #[error("object not found: {0}")]
    NotFound(String),

    /// No storage is mounted at or above the requested path.
    #[error("storage not found for path: {0}")]
    StorageNotFound(String),

    /// The path is malformed or escapes its mount.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The requested byte range is not satisfiable.
    #[error("The requested range is not satisfiable")]
    InvalidRange,

    /// A URL could not be parsed or rewritten.
    #[error("invalid url {url}: {reason}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// An upstream request returned a failure status.
    #[error("upstream request failed")]
    Upstream(#[from] UpstreamStatusError),

    /// An upstream request could not be performed.
    #[error("request to {url} failed")]
    Request {
        /// The URL that was requested.
        url: String,
        /// The transport error.
        #[source]
        source: reqwest::Error,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Internal error with context.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Convenience result type for RelayGate core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_find_status_carrier_in_source_chain() {
        let err = CoreError::Upstream(UpstreamStatusError {
            url: "http://origin/a".to_owned(),
            status: StatusCode::NOT_FOUND,
        });
        assert_eq!(carried_status(&err), Some(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_should_not_find_status_without_carrier() {
        let err = CoreError::NotFound("/a".to_owned());
        assert_eq!(carried_status(&err), None);
    }

    #[test]
    fn test_should_render_error_chain() {
        let err = CoreError::Upstream(UpstreamStatusError {
            url: "http://origin/a".to_owned(),
            status: StatusCode::BAD_GATEWAY,
        });
        assert_eq!(
            error_chain(&err),
            "upstream request failed: http request [http://origin/a] failure, status: 502"
        );
    }
}
