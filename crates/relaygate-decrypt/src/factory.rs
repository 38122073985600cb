//! Decrypt reader factories and decrypted streams.
//!
//! A [`DecryptReaderFactory`] is built from a container locator (a remote URL
//! with forwarding headers, or a local path) and a credential. Construction
//! reads and parses the container header, loads any keyfile, and derives the
//! stream key. The connection or file handle used for that first read stays
//! primed inside the factory and is handed to the first stream; later streams
//! reopen the container past the header.
//!
//! Both the factory and each [`DecryptedStream`] release their resources on
//! `close()` and on drop. Closing twice is a no-op.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::header::{HeaderMap, HeaderValue, RANGE};
use http::StatusCode;
use relaygate_core::source::{ByteSource, FileSource, HttpSource, fetch, read_to_end};
use relaygate_core::{CoreError, GatewaySettings};
use tracing::debug;

use crate::error::{DecryptError, DecryptResult};
use crate::plugin::{DecryptPlugin, FrameDecoder, PluginRegistry, Probe, StreamKey};
use crate::resolver::PublicUrlResolver;

/// Largest header a container may carry.
pub const MAX_HEADER_LEN: usize = 64 * 1024;
/// Largest keyfile that will be loaded.
pub const MAX_KEYFILE_LEN: usize = 1024 * 1024;

/// Builds decrypt reader factories from the registered plugins.
#[derive(Debug, Clone)]
pub struct DecryptEngine {
    registry: Arc<PluginRegistry>,
    client: reqwest::Client,
}

/// Where a container's keyfile is loaded from.
enum KeyfileOrigin<'a> {
    Remote(&'a PublicUrlResolver),
    Local(&'a Path),
}

impl DecryptEngine {
    /// An engine over `registry` using `client` for remote fetches.
    #[must_use]
    pub fn new(registry: Arc<PluginRegistry>, client: reqwest::Client) -> Self {
        Self { registry, client }
    }

    /// The plugin registry.
    #[must_use]
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Build a factory for a container behind a remote URL.
    ///
    /// `resolver` addresses files stored next to the container on this
    /// server.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be fetched, is not a
    /// recognized format, or its key cannot be derived.
    pub async fn remote_factory(
        &self,
        url: &str,
        credential: &str,
        headers: &HeaderMap,
        resolver: &PublicUrlResolver,
        settings: &GatewaySettings,
    ) -> DecryptResult<DecryptReaderFactory> {
        let response = fetch(&self.client, url, headers).await?;
        let mut source: Box<dyn ByteSource> = Box::new(HttpSource::new(response));
        let origin = Origin::Remote {
            client: self.client.clone(),
            url: url.to_owned(),
            headers: headers.clone(),
        };
        self.build(origin, source.as_mut(), credential, KeyfileOrigin::Remote(resolver), settings)
            .await
            .map(|factory| factory.primed_with(source))
    }

    /// Build a factory for a container on the local filesystem.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, is not a recognized
    /// format, or its key cannot be derived.
    pub async fn local_factory(
        &self,
        path: &Path,
        credential: &str,
        settings: &GatewaySettings,
    ) -> DecryptResult<DecryptReaderFactory> {
        let mut source: Box<dyn ByteSource> = Box::new(FileSource::open_range(path, 0, None).await?);
        let origin = Origin::Local {
            path: path.to_path_buf(),
        };
        self.build(origin, source.as_mut(), credential, KeyfileOrigin::Local(path), settings)
            .await
            .map(|factory| factory.primed_with(source))
    }

    async fn build(
        &self,
        origin: Origin,
        source: &mut dyn ByteSource,
        credential: &str,
        keyfile_origin: KeyfileOrigin<'_>,
        settings: &GatewaySettings,
    ) -> DecryptResult<DecryptReaderFactory> {
        let locator = origin.locator();
        let mut buf = BytesMut::new();
        let (plugin, header) = loop {
            match self.registry.probe(&buf)? {
                Probe::Matched(plugin, header) => break (plugin, header),
                Probe::Unknown => return Err(DecryptError::UnknownFormat { locator }),
                Probe::NeedMore => {}
            }
            if buf.len() >= MAX_HEADER_LEN {
                return Err(DecryptError::Header(format!(
                    "header exceeds {MAX_HEADER_LEN} bytes"
                )));
            }
            match source.next_chunk().await? {
                Some(chunk) => buf.extend_from_slice(&chunk),
                None => return Err(DecryptError::Truncated),
            }
        };

        let config = settings.plugin_config(plugin.name());
        let keyfile = match &header.keyfile {
            Some(name) => {
                if !plugin.accepts_keyfile(config) {
                    return Err(DecryptError::KeyfileDisallowed(name.clone()));
                }
                Some(self.load_keyfile(name, &keyfile_origin).await?)
            }
            None => None,
        };
        let key = plugin.open(&header, credential, keyfile.as_deref(), config)?;
        let leftover = buf.split_off(header.len);
        debug!(%locator, plugin = plugin.name(), header_len = header.len, "opened container");

        Ok(DecryptReaderFactory {
            origin,
            locator,
            plugin,
            key,
            body_offset: header.len as u64,
            leftover,
            primed: None,
            closed: false,
        })
    }

    async fn load_keyfile(&self, name: &str, origin: &KeyfileOrigin<'_>) -> DecryptResult<Bytes> {
        let unavailable = |source: CoreError| DecryptError::KeyfileUnavailable {
            name: name.to_owned(),
            source,
        };
        match origin {
            KeyfileOrigin::Remote(resolver) => {
                let url = resolver.resolve(name);
                debug!(%url, "fetching keyfile");
                let response = fetch(&self.client, &url, &resolver.headers())
                    .await
                    .map_err(unavailable)?;
                let mut source = HttpSource::new(response);
                read_to_end(&mut source, MAX_KEYFILE_LEN)
                    .await
                    .map_err(|e| unavailable(e.into()))
            }
            KeyfileOrigin::Local(container) => {
                let path = container.with_file_name(name);
                let mut source = FileSource::open_range(&path, 0, None)
                    .await
                    .map_err(|e| unavailable(e.into()))?;
                read_to_end(&mut source, MAX_KEYFILE_LEN)
                    .await
                    .map_err(|e| unavailable(e.into()))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

enum Origin {
    Remote {
        client: reqwest::Client,
        url: String,
        headers: HeaderMap,
    },
    Local {
        path: PathBuf,
    },
}

impl Origin {
    fn locator(&self) -> String {
        match self {
            Self::Remote { url, .. } => url.clone(),
            Self::Local { path } => path.display().to_string(),
        }
    }

    /// Open the container positioned at `offset`.
    async fn open_at(&self, offset: u64) -> DecryptResult<Box<dyn ByteSource>> {
        match self {
            Self::Remote {
                client,
                url,
                headers,
            } => {
                let mut headers = headers.clone();
                if let Ok(range) = HeaderValue::from_str(&format!("bytes={offset}-")) {
                    headers.insert(RANGE, range);
                }
                let response = fetch(client, url, &headers).await?;
                let source = if response.status() == StatusCode::PARTIAL_CONTENT {
                    HttpSource::new(response)
                } else {
                    HttpSource::new(response).with_window(offset, None)
                };
                Ok(Box::new(source))
            }
            Self::Local { path } => Ok(Box::new(FileSource::open_range(path, offset, None).await?)),
        }
    }
}

/// Produces decrypted streams of one container.
pub struct DecryptReaderFactory {
    origin: Origin,
    locator: String,
    plugin: Arc<dyn DecryptPlugin>,
    key: Arc<dyn StreamKey>,
    body_offset: u64,
    /// Body bytes read along with the header.
    leftover: BytesMut,
    /// The source used to read the header, positioned after `leftover`.
    primed: Option<Box<dyn ByteSource>>,
    closed: bool,
}

impl fmt::Debug for DecryptReaderFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptReaderFactory")
            .field("locator", &self.locator)
            .field("plugin", &self.plugin.name())
            .field("body_offset", &self.body_offset)
            .field("primed", &self.primed.is_some())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl DecryptReaderFactory {
    fn primed_with(mut self, source: Box<dyn ByteSource>) -> Self {
        self.primed = Some(source);
        self
    }

    /// URL or path of the container.
    #[must_use]
    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// Name of the plugin that recognized the container.
    #[must_use]
    pub fn plugin_name(&self) -> &str {
        self.plugin.name()
    }

    /// Whether the factory has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Derive a new decrypted stream positioned at the start of the plaintext.
    ///
    /// # Errors
    ///
    /// Returns [`DecryptError::Closed`] after [`close`](Self::close), or an
    /// error if the container cannot be reopened.
    pub async fn new_reader(&mut self) -> DecryptResult<DecryptedStream> {
        if self.closed {
            return Err(DecryptError::Closed);
        }
        let (source, buf) = match self.primed.take() {
            Some(source) => (source, std::mem::take(&mut self.leftover)),
            None => (self.origin.open_at(self.body_offset).await?, BytesMut::new()),
        };
        Ok(DecryptedStream {
            source: Some(source),
            buf,
            decoder: self.key.decoder(),
            locator: self.locator.clone(),
            eof: false,
            closed: false,
        })
    }

    /// Release the primed connection or file handle. Idempotent.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.primed = None;
            self.leftover = BytesMut::new();
            debug!(locator = %self.locator, "decrypt reader factory closed");
        }
    }
}

impl Drop for DecryptReaderFactory {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Stream
// ---------------------------------------------------------------------------

/// Plaintext of one container.
pub struct DecryptedStream {
    source: Option<Box<dyn ByteSource>>,
    buf: BytesMut,
    decoder: Box<dyn FrameDecoder>,
    locator: String,
    eof: bool,
    closed: bool,
}

impl fmt::Debug for DecryptedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptedStream")
            .field("locator", &self.locator)
            .field("buffered", &self.buf.len())
            .field("finished", &self.decoder.is_finished())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl DecryptedStream {
    /// The next non-empty plaintext chunk, or `None` after the final frame.
    ///
    /// # Errors
    ///
    /// Returns [`DecryptError::Truncated`] if the container ends before its
    /// final frame, and the decoder's error for corrupted frames.
    pub async fn read_chunk(&mut self) -> DecryptResult<Option<Bytes>> {
        if self.closed {
            return Err(DecryptError::Closed);
        }
        loop {
            if let Some(plain) = self.decoder.decode(&mut self.buf)? {
                if plain.is_empty() {
                    continue;
                }
                return Ok(Some(plain));
            }
            if self.decoder.is_finished() {
                // Release the connection as soon as the plaintext is complete.
                self.source = None;
                return Ok(None);
            }
            if self.eof {
                return Err(DecryptError::Truncated);
            }
            let Some(source) = self.source.as_mut() else {
                return Err(DecryptError::Truncated);
            };
            match source.next_chunk().await? {
                Some(chunk) => self.buf.extend_from_slice(&chunk),
                None => self.eof = true,
            }
        }
    }

    /// Release the underlying connection or file handle. Idempotent.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.source = None;
            self.buf = BytesMut::new();
        }
    }
}

impl Drop for DecryptedStream {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl ByteSource for DecryptedStream {
    async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        self.read_chunk().await.map_err(|e| match e {
            DecryptError::Io(io) => io,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        })
    }
}
