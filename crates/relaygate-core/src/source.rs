//! Pull-based byte sources for local files and upstream HTTP responses.
//!
//! Both the generic proxy and the decrypt readers consume object bytes
//! through [`ByteSource`]. Dropping a source releases the underlying file
//! handle or connection.

use std::io;
use std::path::Path;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::HeaderMap;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

use crate::error::{CoreError, CoreResult, UpstreamStatusError};

/// Size of the reusable copy buffer.
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// A sequence of byte chunks.
#[async_trait]
pub trait ByteSource: Send {
    /// The next chunk, or `None` at end of stream. Never yields empty chunks.
    async fn next_chunk(&mut self) -> io::Result<Option<Bytes>>;
}

/// Drain a source into one buffer, failing once it exceeds `limit` bytes.
pub async fn read_to_end(source: &mut dyn ByteSource, limit: usize) -> io::Result<Bytes> {
    let mut out = BytesMut::new();
    while let Some(chunk) = source.next_chunk().await? {
        if out.len() + chunk.len() > limit {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("content exceeds {limit} bytes"),
            ));
        }
        out.extend_from_slice(&chunk);
    }
    Ok(out.freeze())
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// Reads a file (or a window of it) through one reusable buffer.
#[derive(Debug)]
pub struct FileSource {
    file: File,
    buf: Vec<u8>,
    remaining: Option<u64>,
}

impl FileSource {
    /// Wrap an open file, reading from its current position to the end.
    #[must_use]
    pub fn new(file: File) -> Self {
        Self {
            file,
            buf: vec![0; COPY_BUFFER_SIZE],
            remaining: None,
        }
    }

    /// Open `path` and read from `offset`, at most `len` bytes when given.
    pub async fn open_range(path: impl AsRef<Path>, offset: u64, len: Option<u64>) -> io::Result<Self> {
        let mut file = File::open(path.as_ref()).await?;
        if offset > 0 {
            file.seek(io::SeekFrom::Start(offset)).await?;
        }
        let mut source = Self::new(file);
        source.remaining = len;
        Ok(source)
    }
}

#[async_trait]
impl ByteSource for FileSource {
    async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        let want = match self.remaining {
            Some(0) => return Ok(None),
            Some(r) => usize::try_from(r).map_or(self.buf.len(), |r| r.min(self.buf.len())),
            None => self.buf.len(),
        };
        let n = self.file.read(&mut self.buf[..want]).await?;
        if n == 0 {
            return Ok(None);
        }
        if let Some(r) = self.remaining.as_mut() {
            *r -= n as u64;
        }
        Ok(Some(Bytes::copy_from_slice(&self.buf[..n])))
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Streams an upstream response body, optionally skipping a prefix and
/// stopping after a fixed number of bytes.
#[derive(Debug)]
pub struct HttpSource {
    response: reqwest::Response,
    skip: u64,
    remaining: Option<u64>,
}

impl HttpSource {
    /// Stream the whole body of `response`.
    #[must_use]
    pub fn new(response: reqwest::Response) -> Self {
        Self {
            response,
            skip: 0,
            remaining: None,
        }
    }

    /// Skip the first `skip` bytes and yield at most `limit` bytes afterwards.
    #[must_use]
    pub fn with_window(mut self, skip: u64, limit: Option<u64>) -> Self {
        self.skip = skip;
        self.remaining = limit;
        self
    }

    /// The upstream response status.
    #[must_use]
    pub fn status(&self) -> http::StatusCode {
        self.response.status()
    }

    /// The upstream response headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        self.response.headers()
    }
}

#[async_trait]
impl ByteSource for HttpSource {
    async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        loop {
            if self.remaining == Some(0) {
                return Ok(None);
            }
            let Some(mut chunk) = self.response.chunk().await.map_err(io::Error::other)? else {
                return Ok(None);
            };
            if self.skip > 0 {
                let len = chunk.len() as u64;
                if len <= self.skip {
                    self.skip -= len;
                    continue;
                }
                // `skip < len`, so it fits in usize.
                chunk = chunk.slice(usize::try_from(self.skip).unwrap_or(chunk.len())..);
                self.skip = 0;
            }
            if let Some(r) = self.remaining.as_mut() {
                if chunk.len() as u64 > *r {
                    chunk.truncate(usize::try_from(*r).unwrap_or(chunk.len()));
                }
                *r -= chunk.len() as u64;
            }
            if !chunk.is_empty() {
                return Ok(Some(chunk));
            }
        }
    }
}

/// `GET` a URL, turning a status of 400 or above into an [`UpstreamStatusError`].
pub async fn fetch(
    client: &reqwest::Client,
    url: &str,
    headers: &HeaderMap,
) -> CoreResult<reqwest::Response> {
    debug!(%url, "fetching upstream");
    let response = client
        .get(url)
        .headers(headers.clone())
        .send()
        .await
        .map_err(|source| CoreError::Request {
            url: url.to_owned(),
            source,
        })?;

    let status = response.status();
    if status.as_u16() >= 400 {
        return Err(UpstreamStatusError {
            url: url.to_owned(),
            status,
        }
        .into());
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn temp_file_with(content: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(content).expect("write temp file");
        file
    }

    #[tokio::test]
    async fn test_should_read_whole_file() {
        let tmp = temp_file_with(b"hello world");
        let mut source = FileSource::open_range(tmp.path(), 0, None)
            .await
            .expect("open");
        let data = read_to_end(&mut source, 1024).await.expect("read");
        assert_eq!(data.as_ref(), b"hello world");
    }

    #[tokio::test]
    async fn test_should_read_file_window() {
        let tmp = temp_file_with(b"0123456789");
        let mut source = FileSource::open_range(tmp.path(), 2, Some(5))
            .await
            .expect("open");
        let data = read_to_end(&mut source, 1024).await.expect("read");
        assert_eq!(data.as_ref(), b"23456");
    }

    #[tokio::test]
    async fn test_should_read_large_file_in_chunks() {
        let content = vec![7u8; COPY_BUFFER_SIZE * 2 + 10];
        let tmp = temp_file_with(&content);
        let mut source = FileSource::open_range(tmp.path(), 0, None)
            .await
            .expect("open");
        let mut chunks = 0;
        let mut total = 0;
        while let Some(chunk) = source.next_chunk().await.expect("chunk") {
            assert!(chunk.len() <= COPY_BUFFER_SIZE);
            total += chunk.len();
            chunks += 1;
        }
        assert_eq!(total, content.len());
        assert!(chunks >= 3);
    }

    #[tokio::test]
    async fn test_should_reject_content_over_limit() {
        let tmp = temp_file_with(b"0123456789");
        let mut source = FileSource::open_range(tmp.path(), 0, None)
            .await
            .expect("open");
        assert!(read_to_end(&mut source, 4).await.is_err());
    }

    #[tokio::test]
    async fn test_should_fail_to_open_missing_file() {
        assert!(
            FileSource::open_range("/definitely/not/here.bin", 0, None)
                .await
                .is_err()
        );
    }
}
