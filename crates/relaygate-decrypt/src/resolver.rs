//! Public URL resolver for same-server auxiliary fetches.
//!
//! Remote decrypt factories sometimes need another file stored next to the
//! container (a keyfile). They fetch it back through this server's own
//! download endpoint, addressed by the resolver.
//!
//! The base URL is derived from configuration, not from the request. Behind a
//! reverse proxy or TLS terminator `SITE_HOST` and the ports must describe the
//! address this server is reachable at from its own backends.

use http::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use relaygate_core::GatewayConfig;
use relaygate_core::utils::{encode_path, parent_dir};

/// Builds download URLs for files next to one object.
#[derive(Clone)]
pub struct PublicUrlResolver {
    base: String,
    token: String,
    object_path: String,
}

impl std::fmt::Debug for PublicUrlResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicUrlResolver")
            .field("base", &self.base)
            .field("object_path", &self.object_path)
            .finish_non_exhaustive()
    }
}

impl PublicUrlResolver {
    /// A resolver for siblings of `object_path` under `base`.
    #[must_use]
    pub fn new(base: impl Into<String>, token: impl Into<String>, object_path: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_owned(),
            token: token.into(),
            object_path: object_path.into(),
        }
    }

    /// A resolver bound to the configured public address and site token.
    #[must_use]
    pub fn from_config(config: &GatewayConfig, object_path: impl Into<String>) -> Self {
        Self::new(config.public_base_url(), config.site_token.clone(), object_path)
    }

    /// Download URL of `name` in the object's directory.
    #[must_use]
    pub fn resolve(&self, name: &str) -> String {
        let dir = parent_dir(&self.object_path);
        let dir = if dir == "/" { "" } else { dir };
        format!("{}/d{}/{}", self.base, encode_path(dir), encode_path(name))
    }

    /// Token presented to this server on auxiliary fetches.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Request headers for auxiliary fetches.
    #[must_use]
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&self.token) {
            if !self.token.is_empty() {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }
}
