//! Decrypt streaming path: serve a container's plaintext.

use std::path::Path;

use http::header::{CONTENT_TYPE, HeaderValue};
use relaygate_core::storage::{ObjectMeta, ResolvedLink};
use relaygate_core::{GatewayConfig, GatewaySettings};
use relaygate_decrypt::{DecryptEngine, DecryptError, DecryptReaderFactory, PublicUrlResolver};
use tracing::{debug, error, warn};

use crate::error::GatewayError;
use crate::policy::decrypted_content_type;
use crate::proxy::forward_headers;
use crate::request::RequestContext;
use crate::sink::{ResponseSink, ResponseWriter};

/// Streams decrypted containers for one request.
#[derive(Debug)]
pub struct DecryptProxy<'a> {
    engine: &'a DecryptEngine,
    config: &'a GatewayConfig,
    ctx: &'a RequestContext,
    settings: &'a GatewaySettings,
}

impl<'a> DecryptProxy<'a> {
    /// A decrypt proxy for `ctx`.
    #[must_use]
    pub fn new(
        engine: &'a DecryptEngine,
        config: &'a GatewayConfig,
        ctx: &'a RequestContext,
        settings: &'a GatewaySettings,
    ) -> Self {
        Self {
            engine,
            config,
            ctx,
            settings,
        }
    }

    /// Decrypt `object` and stream its plaintext to `sink`.
    ///
    /// Fails before anything is written when the credential is missing or
    /// the container cannot be opened. A failure after the first byte
    /// truncates the response.
    pub async fn stream(
        &self,
        sink: &mut ResponseSink,
        link: &ResolvedLink,
        object: &ObjectMeta,
    ) -> Result<(), GatewayError> {
        let credential = self.settings.decrypt_password.as_str();
        if credential.is_empty() {
            error!(path = %self.ctx.path, "decryption key not configured");
            return Err(GatewayError::DecryptKeyMissing);
        }

        let mut factory = self.open_factory(credential, link, object).await?;
        let locator = factory.locator().to_owned();
        let derived = factory.new_reader().await;
        // A single stream is served per request; the factory is not needed
        // past this point.
        factory.close();
        let mut stream = derived.map_err(|source| {
            warn!(%locator, error = %source, "failed to derive decrypted stream");
            GatewayError::Decrypt {
                locator: locator.clone(),
                source,
            }
        })?;

        sink.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static(decrypted_content_type(&object.name)),
        );

        let copied = async {
            loop {
                let next = stream.read_chunk().await.map_err(|source| GatewayError::Decrypt {
                    locator: locator.clone(),
                    source,
                })?;
                let Some(chunk) = next else {
                    return Ok::<(), GatewayError>(());
                };
                sink.write(chunk).await.map_err(GatewayError::Copy)?;
            }
        }
        .await;
        stream.close();
        debug!(%locator, ok = copied.is_ok(), "decrypted stream closed");
        copied
    }

    async fn open_factory(
        &self,
        credential: &str,
        link: &ResolvedLink,
        object: &ObjectMeta,
    ) -> Result<DecryptReaderFactory, GatewayError> {
        let (locator, built) = if link.is_remote() {
            let resolver = PublicUrlResolver::from_config(self.config, self.ctx.path.as_str());
            let headers = forward_headers(&self.ctx.headers, &link.headers);
            let built = self
                .engine
                .remote_factory(&link.url, credential, &headers, &resolver, self.settings)
                .await;
            (link.url.clone(), built)
        } else if !object.path.is_empty() {
            let built = self
                .engine
                .local_factory(Path::new(&object.path), credential, self.settings)
                .await;
            (object.path.clone(), built)
        } else {
            error!(path = %self.ctx.path, "cannot create reader: no link url and no local path");
            return Err(GatewayError::NoReaderSource);
        };

        built.map_err(|source: DecryptError| {
            error!(%locator, error = %source, "failed to create decrypt reader");
            GatewayError::Decrypt { locator, source }
        })
    }
}
