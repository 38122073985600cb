//! Response sinks.
//!
//! Request handling runs in its own task and writes through a
//! [`ResponseSink`]. The hyper service holds the matching
//! [`PendingResponse`] and resolves it into the response once the handler
//! commits one.
//!
//! A sink commits at most one response. Status and headers stay mutable until
//! the first body byte is written ([`ResponseWriter::write`]) or a complete
//! response is sent ([`ResponseSink::send`]); after that
//! [`ResponseWriter::is_written`] reports `true` and the head is frozen.
//! Writes fail once the client has gone away, so copies stop promptly.
//!
//! [`BufferingWriter`] implements the same interface in memory, for output
//! that must be inspected before anything reaches the client.

use std::io;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use tokio::sync::{mpsc, oneshot};

use crate::body::GatewayBody;

/// Body chunks buffered between the handler task and the connection.
const STREAM_DEPTH: usize = 8;

/// Destination of a response: status, headers, then body bytes.
#[async_trait]
pub trait ResponseWriter: Send {
    /// Current status.
    fn status(&self) -> StatusCode;

    /// Set the status. Ignored once written.
    fn set_status(&mut self, status: StatusCode);

    /// Response headers. Changes after the first write are not sent.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Whether any part of the response has reached the client.
    fn is_written(&self) -> bool;

    /// Write body bytes, committing status and headers first.
    async fn write(&mut self, data: Bytes) -> io::Result<()>;
}

/// Create a connected sink and pending response.
#[must_use]
pub fn channel() -> (ResponseSink, PendingResponse) {
    let (head_tx, head_rx) = oneshot::channel();
    (
        ResponseSink {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            head_tx: Some(head_tx),
            body_tx: None,
            abort_tx: None,
            written: false,
            finished: false,
        },
        PendingResponse { head_rx },
    )
}

/// The handler's side of a response.
#[derive(Debug)]
pub struct ResponseSink {
    status: StatusCode,
    headers: HeaderMap,
    head_tx: Option<oneshot::Sender<http::Response<GatewayBody>>>,
    body_tx: Option<mpsc::Sender<io::Result<Bytes>>>,
    abort_tx: Option<oneshot::Sender<io::Error>>,
    written: bool,
    finished: bool,
}

fn gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "client connection closed")
}

impl ResponseSink {
    /// Response headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn commit(&mut self, body: GatewayBody) -> io::Result<()> {
        if self.written {
            return Err(io::Error::other("response already committed"));
        }
        self.written = true;
        let head_tx = self.head_tx.take().ok_or_else(gone)?;
        let mut response = http::Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = std::mem::take(&mut self.headers);
        head_tx.send(response).map_err(|_| gone())
    }

    /// Send a complete, buffered response.
    ///
    /// # Errors
    ///
    /// Fails if a response was already committed or the client is gone.
    pub fn send(&mut self, body: impl Into<Bytes>) -> io::Result<()> {
        self.commit(GatewayBody::from_bytes(body))?;
        self.finished = true;
        Ok(())
    }

    /// Complete the response. Sends the head with an empty body if nothing
    /// was written yet.
    pub fn finish(mut self) {
        if !self.written {
            // A failure here means the client is gone; nothing left to do.
            let _ = self.commit(GatewayBody::empty());
        }
        self.finished = true;
        self.body_tx = None;
        self.abort_tx = None;
    }

    /// Abort a committed response so the client sees it truncated rather
    /// than complete. Does nothing before the first write.
    ///
    /// The abort does not go through the body channel, so it is delivered
    /// even when the channel is full.
    pub fn abort(&mut self, err: io::Error) {
        if let Some(tx) = self.abort_tx.take() {
            // The body is gone if this fails; nothing left to truncate.
            let _ = tx.send(err);
        }
        self.body_tx = None;
        self.finished = true;
    }
}

#[async_trait]
impl ResponseWriter for ResponseSink {
    fn status(&self) -> StatusCode {
        self.status
    }

    fn set_status(&mut self, status: StatusCode) {
        if !self.written {
            self.status = status;
        }
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn is_written(&self) -> bool {
        self.written
    }

    async fn write(&mut self, data: Bytes) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        if !self.written {
            let (tx, rx) = mpsc::channel(STREAM_DEPTH);
            let (abort_tx, abort_rx) = oneshot::channel();
            self.commit(GatewayBody::streaming(rx, abort_rx))?;
            self.body_tx = Some(tx);
            self.abort_tx = Some(abort_tx);
        }
        let tx = self.body_tx.as_ref().ok_or_else(gone)?;
        tx.send(Ok(data)).await.map_err(|_| gone())
    }
}

impl Drop for ResponseSink {
    fn drop(&mut self) {
        if !self.finished {
            self.abort(io::Error::other("response handler stopped before completing"));
        }
    }
}

/// The service's side of a response.
#[derive(Debug)]
pub struct PendingResponse {
    head_rx: oneshot::Receiver<http::Response<GatewayBody>>,
}

impl PendingResponse {
    /// Wait for the handler to commit a response. `None` if the sink was
    /// dropped without committing one.
    pub async fn into_response(self) -> Option<http::Response<GatewayBody>> {
        self.head_rx.await.ok()
    }
}

/// In-memory [`ResponseWriter`]. Nothing reaches the client.
#[derive(Debug)]
pub struct BufferingWriter {
    status: StatusCode,
    headers: HeaderMap,
    body: BytesMut,
}

impl BufferingWriter {
    /// A writer starting from the given status and headers.
    #[must_use]
    pub fn new(status: StatusCode, headers: HeaderMap) -> Self {
        Self {
            status,
            headers,
            body: BytesMut::new(),
        }
    }

    /// Split into status, headers, and buffered body.
    #[must_use]
    pub fn into_parts(self) -> (StatusCode, HeaderMap, Bytes) {
        (self.status, self.headers, self.body.freeze())
    }
}

#[async_trait]
impl ResponseWriter for BufferingWriter {
    fn status(&self) -> StatusCode {
        self.status
    }

    fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn is_written(&self) -> bool {
        false
    }

    async fn write(&mut self, data: Bytes) -> io::Result<()> {
        self.body.extend_from_slice(&data);
        Ok(())
    }
}
