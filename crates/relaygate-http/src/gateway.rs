//! Request orchestration.
//!
//! Each request is resolved, classified into a [`DeliveryDecision`], and
//! delivered. Errors are classified into a status code exactly once, in
//! [`Gateway::handle`]: before the first byte they become an HTML error
//! page, after it they are logged and the response is truncated.

use std::io;
use std::sync::Arc;

use http::StatusCode;
use http::header::{CACHE_CONTROL, HeaderValue, LOCATION, REFERRER_POLICY};
use relaygate_core::utils::{encode_path, inject_query};
use relaygate_core::{
    CoreError, GatewayConfig, GatewaySettings, ResolvedLink, SettingsHandle, StorageResolver,
};
use relaygate_decrypt::{ContainerSuffixes, DecryptEngine};
use tracing::{debug, error, warn};

use crate::decrypt::DecryptProxy;
use crate::error::{GatewayError, send_error_page};
use crate::policy::{
    DeliveryDecision, can_proxy, down_proxy_base, is_encrypted_container,
    should_redirect_directly,
};
use crate::proxy::GenericProxy;
use crate::request::{Entry, RequestContext};
use crate::sink::{ResponseSink, ResponseWriter};

const NO_CACHE: &str = "max-age=0, no-cache, no-store, must-revalidate";

/// Serves download and proxy requests.
#[derive(Debug)]
pub struct Gateway {
    resolver: Arc<dyn StorageResolver>,
    settings: Arc<SettingsHandle>,
    engine: DecryptEngine,
    suffixes: ContainerSuffixes,
    config: Arc<GatewayConfig>,
    client: reqwest::Client,
}

impl Gateway {
    /// A gateway over `resolver`, reading settings from `settings`.
    #[must_use]
    pub fn new(
        resolver: Arc<dyn StorageResolver>,
        settings: Arc<SettingsHandle>,
        engine: DecryptEngine,
        config: Arc<GatewayConfig>,
    ) -> Self {
        Self {
            resolver,
            settings,
            engine,
            suffixes: ContainerSuffixes::default(),
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Replace the container suffix set.
    #[must_use]
    pub fn with_suffixes(mut self, suffixes: ContainerSuffixes) -> Self {
        self.suffixes = suffixes;
        self
    }

    /// Use `client` for upstream fetches.
    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Current settings holder.
    #[must_use]
    pub fn settings(&self) -> &Arc<SettingsHandle> {
        &self.settings
    }

    /// Handle one request, writing exactly one response to `sink`.
    pub async fn handle(&self, ctx: RequestContext, mut sink: ResponseSink) {
        let settings = self.settings.snapshot();
        debug!(
            request_id = %ctx.request_id,
            entry = ctx.entry.as_str(),
            path = %ctx.path,
            "handling request"
        );

        if let Err(err) = self.deliver(&ctx, &settings, &mut sink).await {
            let message = err.message();
            if sink.is_written() {
                error!(
                    request_id = %ctx.request_id,
                    method = %ctx.method,
                    path = %ctx.path,
                    error = %message,
                    "response failed after first byte"
                );
                sink.abort(io::Error::other(message));
            } else {
                let status = err.status_code();
                if status.is_server_error() {
                    error!(request_id = %ctx.request_id, path = %ctx.path, %status, error = %message, "request failed");
                } else {
                    warn!(request_id = %ctx.request_id, path = %ctx.path, %status, error = %message, "request rejected");
                }
                if let Err(e) = send_error_page(&mut sink, &err) {
                    debug!(request_id = %ctx.request_id, error = %e, "could not send error page");
                }
            }
        }
        sink.finish();
    }

    async fn deliver(
        &self,
        ctx: &RequestContext,
        settings: &GatewaySettings,
        sink: &mut ResponseSink,
    ) -> Result<(), GatewayError> {
        match self.decide(ctx, settings).await? {
            DeliveryDecision::Redirect(mut link) => {
                let result = redirect_to_link(ctx, settings, sink, &link);
                link.close();
                result
            }
            DeliveryDecision::DownProxy(url) => send_redirect(sink, &ctx.path, &url),
            DeliveryDecision::ProxyGeneric {
                mut link,
                object,
                allow_range,
            } => {
                let result = GenericProxy::new(&self.client, ctx, settings)
                    .stream(sink, &link, &object, allow_range)
                    .await;
                link.close();
                result
            }
            DeliveryDecision::ProxyDecrypt { mut link, object } => {
                let result = DecryptProxy::new(&self.engine, &self.config, ctx, settings)
                    .stream(sink, &link, &object)
                    .await;
                link.close();
                result
            }
        }
    }

    /// Resolve the request and decide how to serve it.
    ///
    /// Containers always take the decrypt path. Otherwise the download entry
    /// redirects when the storage allows it, and everything else is proxied
    /// subject to [`can_proxy`].
    pub async fn decide(
        &self,
        ctx: &RequestContext,
        settings: &GatewaySettings,
    ) -> Result<DeliveryDecision, GatewayError> {
        let path = ctx.path.as_str();
        let resolve_err = |source: CoreError| GatewayError::Resolve {
            path: path.to_owned(),
            source,
        };

        let storage = self.resolver.get_storage(path).map_err(resolve_err)?;
        let object = self.resolver.get(path).await.map_err(resolve_err)?;
        let name = object.name.as_str();

        if is_encrypted_container(&self.suffixes, name) {
            let (link, object) = self
                .resolver
                .link(path, &ctx.link_args(false))
                .await
                .map_err(resolve_err)?;
            debug!(%path, "serving container through decrypt path");
            return Ok(DeliveryDecision::ProxyDecrypt { link, object });
        }

        if ctx.entry == Entry::Down && should_redirect_directly(&storage, name, settings) {
            let (link, _) = self
                .resolver
                .link(path, &ctx.link_args(true))
                .await
                .map_err(resolve_err)?;
            return Ok(DeliveryDecision::Redirect(link));
        }

        if !can_proxy(&storage, name, settings) {
            return Err(GatewayError::ProxyNotAllowed);
        }
        if !ctx.has_query("d") {
            if let Some(base) = down_proxy_base(&storage) {
                let url = format!("{}{}", base.trim_end_matches('/'), encode_path(path));
                return Ok(DeliveryDecision::DownProxy(url));
            }
        }

        let (link, object) = self
            .resolver
            .link(path, &ctx.link_args(false))
            .await
            .map_err(resolve_err)?;
        Ok(DeliveryDecision::ProxyGeneric {
            link,
            object,
            allow_range: storage.proxy_range,
        })
    }
}

fn redirect_to_link(
    ctx: &RequestContext,
    settings: &GatewaySettings,
    sink: &mut ResponseSink,
    link: &ResolvedLink,
) -> Result<(), GatewayError> {
    if !link.is_remote() {
        return Err(GatewayError::NoReaderSource);
    }
    let url = if settings.forward_direct_link_params {
        let query = ctx.forwarded_query(&settings.ignore_direct_link_params);
        inject_query(&link.url, &query).map_err(GatewayError::InjectQuery)?
    } else {
        link.url.clone()
    };
    send_redirect(sink, &ctx.path, &url)
}

fn send_redirect(sink: &mut ResponseSink, path: &str, url: &str) -> Result<(), GatewayError> {
    let location = HeaderValue::from_str(url).map_err(|e| GatewayError::Resolve {
        path: path.to_owned(),
        source: CoreError::InvalidUrl {
            url: url.to_owned(),
            reason: e.to_string(),
        },
    })?;
    sink.set_status(StatusCode::FOUND);
    let headers = sink.headers_mut();
    headers.insert(LOCATION, location);
    headers.insert(REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
    Ok(())
}
