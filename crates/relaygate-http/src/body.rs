//! Response body type supporting buffered, streaming, and empty modes.
//!
//! - **Buffered**: error pages, redirects, rendered markdown.
//! - **Streaming**: proxied and decrypted content, fed chunk by chunk from the
//!   request's handler task through a bounded channel. An abort arrives on a
//!   separate oneshot so it never waits for channel capacity; it ends the body
//!   with an error, which truncates the response on the wire.
//! - **Empty**: responses with no content.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body_util::Full;
use tokio::sync::{mpsc, oneshot};

/// Gateway response body.
///
/// Implements [`http_body::Body`] so it can be used directly with hyper responses.
#[derive(Debug, Default)]
pub enum GatewayBody {
    /// Fully buffered content.
    Buffered(Full<Bytes>),
    /// Chunks produced by a handler task.
    Streaming(StreamingBody),
    /// No content.
    #[default]
    Empty,
}

impl GatewayBody {
    /// Create a buffered body from bytes.
    #[must_use]
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::Buffered(Full::new(data.into()))
    }

    /// Create a buffered body from a UTF-8 string.
    #[must_use]
    pub fn from_string(s: impl Into<String>) -> Self {
        Self::Buffered(Full::new(Bytes::from(s.into())))
    }

    /// Create an empty body.
    #[must_use]
    pub fn empty() -> Self {
        Self::Empty
    }

    /// Create a streaming body fed by `rx`, failed early by `abort`.
    #[must_use]
    pub fn streaming(
        rx: mpsc::Receiver<io::Result<Bytes>>,
        abort: oneshot::Receiver<io::Error>,
    ) -> Self {
        Self::Streaming(StreamingBody {
            rx,
            abort: Some(abort),
        })
    }
}

/// Channel-fed body with an out-of-band abort.
#[derive(Debug)]
pub struct StreamingBody {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    abort: Option<oneshot::Receiver<io::Error>>,
}

impl StreamingBody {
    fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<io::Result<Bytes>>> {
        if let Some(abort) = self.abort.as_mut() {
            match Pin::new(abort).poll(cx) {
                Poll::Ready(Ok(err)) => {
                    self.abort = None;
                    self.rx.close();
                    return Poll::Ready(Some(Err(err)));
                }
                // Sender dropped without aborting: the stream ends normally.
                Poll::Ready(Err(_)) => self.abort = None,
                Poll::Pending => {}
            }
        }
        self.rx.poll_recv(cx)
    }
}

impl http_body::Body for GatewayBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<http_body::Frame<Self::Data>, Self::Error>>> {
        match self.get_mut() {
            Self::Buffered(full) => Pin::new(full)
                .poll_frame(cx)
                .map_err(|never| match never {}),
            Self::Streaming(stream) => stream
                .poll_chunk(cx)
                .map(|item| item.map(|chunk| chunk.map(http_body::Frame::data))),
            Self::Empty => Poll::Ready(None),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            Self::Buffered(full) => full.is_end_stream(),
            Self::Streaming(_) => false,
            Self::Empty => true,
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match self {
            Self::Buffered(full) => full.size_hint(),
            Self::Streaming(_) => http_body::SizeHint::default(),
            Self::Empty => http_body::SizeHint::with_exact(0),
        }
    }
}
