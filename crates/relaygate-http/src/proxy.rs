//! Generic proxy path: stream an object's bytes through this server.
//!
//! Remote links are fetched with the client's headers overlaid by the link's
//! headers; local links are read from the object's physical path. When the
//! storage allows it, `Range` requests are fulfilled here. Proxied markdown
//! may be rendered to sanitized HTML, which requires buffering it first.

use http::header::{
    self, ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, HeaderName, HeaderValue,
};
use http::{HeaderMap, StatusCode};
use mime::Mime;
use relaygate_core::source::{ByteSource, FileSource, HttpSource, fetch};
use relaygate_core::storage::{ObjectMeta, ResolvedLink};
use relaygate_core::utils::{ext, inject_query, parse_range_header};
use relaygate_core::{CoreError, GatewaySettings};
use tracing::debug;

use crate::error::GatewayError;
use crate::policy::needs_markdown_transform;
use crate::request::RequestContext;
use crate::sink::{BufferingWriter, ResponseSink, ResponseWriter};
use crate::transform::render_markdown;

/// Connection-scoped headers, never forwarded in either direction.
fn is_hop_by_hop(name: &HeaderName) -> bool {
    [
        header::CONNECTION,
        header::PROXY_AUTHENTICATE,
        header::PROXY_AUTHORIZATION,
        header::TE,
        header::TRAILER,
        header::TRANSFER_ENCODING,
        header::UPGRADE,
    ]
    .contains(name)
}

/// Client headers describing the client's connection to this server rather
/// than the object.
fn is_client_only(name: &HeaderName) -> bool {
    [
        header::HOST,
        header::AUTHORIZATION,
        header::COOKIE,
        header::ACCEPT_ENCODING,
        header::CONTENT_LENGTH,
    ]
    .contains(name)
}

/// Streams objects for one request.
#[derive(Debug)]
pub struct GenericProxy<'a> {
    client: &'a reqwest::Client,
    ctx: &'a RequestContext,
    settings: &'a GatewaySettings,
}

/// Byte window served for a range request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ByteWindow {
    start: u64,
    end: u64,
    size: u64,
}

impl ByteWindow {
    fn len(self) -> u64 {
        self.end - self.start + 1
    }

    fn content_range(self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.size)
    }
}

impl<'a> GenericProxy<'a> {
    /// A proxy for `ctx`, reading settings from `settings`.
    #[must_use]
    pub fn new(
        client: &'a reqwest::Client,
        ctx: &'a RequestContext,
        settings: &'a GatewaySettings,
    ) -> Self {
        Self {
            client,
            ctx,
            settings,
        }
    }

    /// Stream `object` to `sink`.
    ///
    /// On error nothing has been sent if `sink.is_written()` is still
    /// `false`; the caller decides how to report it.
    pub async fn stream(
        &self,
        sink: &mut ResponseSink,
        link: &ResolvedLink,
        object: &ObjectMeta,
        allow_range: bool,
    ) -> Result<(), GatewayError> {
        let url = if link.is_remote() && self.settings.forward_direct_link_params {
            let query = self
                .ctx
                .forwarded_query(&self.settings.ignore_direct_link_params);
            inject_query(&link.url, &query).map_err(GatewayError::InjectQuery)?
        } else {
            link.url.clone()
        };

        if needs_markdown_transform(&object.name, self.settings, self.ctx.is_raw()) {
            return self.stream_markdown(sink, &url, link, object, allow_range).await;
        }
        self.copy(sink, &url, link, object, allow_range, false).await
    }

    /// Buffer the proxied markdown, then send it rendered (success status)
    /// or unchanged (any other status).
    async fn stream_markdown(
        &self,
        sink: &mut ResponseSink,
        url: &str,
        link: &ResolvedLink,
        object: &ObjectMeta,
        allow_range: bool,
    ) -> Result<(), GatewayError> {
        let mut buffer = BufferingWriter::new(StatusCode::OK, HeaderMap::new());
        self.copy(&mut buffer, url, link, object, allow_range, true)
            .await?;
        let (status, headers, body) = buffer.into_parts();

        sink.set_status(status);
        *sink.headers_mut() = headers;
        if body.is_empty() {
            return Ok(());
        }
        if !status.is_success() {
            debug!(path = %self.ctx.path, %status, "passing through non-success markdown response");
            return sink.send(body).map_err(GatewayError::Copy);
        }

        let html = render_markdown(&body).map_err(GatewayError::Transform)?;
        let headers = sink.headers_mut();
        headers.insert(CONTENT_LENGTH, HeaderValue::from(html.len()));
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );
        sink.send(html).map_err(GatewayError::Copy)
    }

    /// Copy the object's bytes to `writer`, setting status and headers first.
    ///
    /// With `keep_error_body`, an upstream failure status is copied like any
    /// other response instead of becoming an error.
    async fn copy(
        &self,
        writer: &mut dyn ResponseWriter,
        url: &str,
        link: &ResolvedLink,
        object: &ObjectMeta,
        allow_range: bool,
        keep_error_body: bool,
    ) -> Result<(), GatewayError> {
        let window = self.requested_window(link, object, allow_range)?;
        let mut source: Box<dyn ByteSource> = if link.is_remote() {
            self.open_remote(writer, url, link, window, keep_error_body)
                .await?
        } else {
            open_local(writer, object, window, allow_range).await?
        };

        while let Some(chunk) = source.next_chunk().await.map_err(GatewayError::Copy)? {
            writer.write(chunk).await.map_err(GatewayError::Copy)?;
        }
        Ok(())
    }

    /// The byte window to serve locally, if this is a range request the
    /// server should fulfill.
    fn requested_window(
        &self,
        link: &ResolvedLink,
        object: &ObjectMeta,
        allow_range: bool,
    ) -> Result<Option<ByteWindow>, GatewayError> {
        if !allow_range || (link.is_remote() && object.size == 0) {
            return Ok(None);
        }
        let Some(range) = self
            .ctx
            .headers
            .get(header::RANGE)
            .and_then(|v| v.to_str().ok())
        else {
            return Ok(None);
        };
        let size = object.size;
        let (start, end) = parse_range_header(range, size)
            .map_err(|_| GatewayError::RangeNotSatisfiable { size })?;
        Ok(Some(ByteWindow { start, end, size }))
    }

    async fn open_remote(
        &self,
        writer: &mut dyn ResponseWriter,
        url: &str,
        link: &ResolvedLink,
        window: Option<ByteWindow>,
        keep_error_body: bool,
    ) -> Result<Box<dyn ByteSource>, GatewayError> {
        let mut request_headers = forward_headers(&self.ctx.headers, &link.headers);
        if let Some(w) = window {
            let value = format!("bytes={}-{}", w.start, w.end);
            if let Ok(value) = HeaderValue::from_str(&value) {
                request_headers.insert(header::RANGE, value);
            }
        }

        let sent = if keep_error_body {
            self.client
                .get(url)
                .headers(request_headers)
                .send()
                .await
                .map_err(|source| CoreError::Request {
                    url: url.to_owned(),
                    source,
                })
        } else {
            fetch(self.client, url, &request_headers).await
        };
        let response = sent.map_err(|source| GatewayError::Source {
            locator: url.to_owned(),
            source,
        })?;

        let status = response.status();
        debug!(%url, %status, ranged = window.is_some(), "upstream responded");
        copy_response_headers(response.headers(), writer.headers_mut(), window.is_some());

        let source = HttpSource::new(response);
        match window {
            Some(w) => {
                set_partial(writer, w);
                if status == StatusCode::PARTIAL_CONTENT {
                    Ok(Box::new(source))
                } else {
                    Ok(Box::new(source.with_window(w.start, Some(w.len()))))
                }
            }
            None => {
                writer.set_status(status);
                Ok(Box::new(source))
            }
        }
    }
}

async fn open_local(
    writer: &mut dyn ResponseWriter,
    object: &ObjectMeta,
    window: Option<ByteWindow>,
    allow_range: bool,
) -> Result<Box<dyn ByteSource>, GatewayError> {
    if object.path.is_empty() {
        return Err(GatewayError::NoReaderSource);
    }
    let (offset, len) = window.map_or((0, None), |w| (w.start, Some(w.len())));
    let source = FileSource::open_range(&object.path, offset, len)
        .await
        .map_err(|e| GatewayError::Source {
            locator: object.path.clone(),
            source: CoreError::Io(e),
        })?;

    if let Ok(value) = HeaderValue::from_str(content_type_for(&object.name).as_ref()) {
        writer.headers_mut().insert(CONTENT_TYPE, value);
    }
    match window {
        Some(w) => set_partial(writer, w),
        None => {
            writer.set_status(StatusCode::OK);
            let headers = writer.headers_mut();
            headers.insert(CONTENT_LENGTH, HeaderValue::from(object.size));
            if allow_range {
                headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
            }
        }
    }
    Ok(Box::new(source))
}

fn set_partial(writer: &mut dyn ResponseWriter, w: ByteWindow) {
    writer.set_status(StatusCode::PARTIAL_CONTENT);
    let headers = writer.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&w.content_range()) {
        headers.insert(CONTENT_RANGE, value);
    }
    headers.insert(CONTENT_LENGTH, HeaderValue::from(w.len()));
    headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
}

/// Headers sent upstream: the client's headers overlaid by the link's.
#[must_use]
pub fn forward_headers(client: &HeaderMap, link: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(client.len() + link.len());
    for (name, value) in client {
        if !is_hop_by_hop(name) && !is_client_only(name) {
            out.append(name.clone(), value.clone());
        }
    }
    for name in link.keys() {
        out.remove(name);
    }
    for (name, value) in link {
        out.append(name.clone(), value.clone());
    }
    out
}

/// Copy upstream response headers, minus hop-by-hop ones. When the range is
/// served locally the upstream's length and range headers are dropped too.
fn copy_response_headers(upstream: &HeaderMap, out: &mut HeaderMap, ranged: bool) {
    for (name, value) in upstream {
        if is_hop_by_hop(name) {
            continue;
        }
        if ranged && (name == CONTENT_LENGTH || name == CONTENT_RANGE || name == ACCEPT_RANGES) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
}

/// Content type of a local file, by extension.
fn content_type_for(name: &str) -> Mime {
    let known = match ext(name).as_str() {
        "txt" | "log" | "conf" | "ini" => return mime::TEXT_PLAIN_UTF_8,
        "html" | "htm" => return mime::TEXT_HTML_UTF_8,
        "css" => return mime::TEXT_CSS_UTF_8,
        "js" | "mjs" => return mime::TEXT_JAVASCRIPT,
        "json" => return mime::APPLICATION_JSON,
        "pdf" => return mime::APPLICATION_PDF,
        "png" => return mime::IMAGE_PNG,
        "jpg" | "jpeg" => return mime::IMAGE_JPEG,
        "gif" => return mime::IMAGE_GIF,
        "svg" => return mime::IMAGE_SVG,
        "bmp" => return mime::IMAGE_BMP,
        "md" | "markdown" => "text/markdown; charset=utf-8",
        "xml" => "application/xml",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "m3u8" => "application/vnd.apple.mpegurl",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        _ => return mime::APPLICATION_OCTET_STREAM,
    };
    known.parse().unwrap_or(mime::APPLICATION_OCTET_STREAM)
}
