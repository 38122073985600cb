//! Process configuration for the gateway.
//!
//! Provides [`GatewayConfig`], loaded from environment variables. Runtime
//! tunables that administrators change while the server runs live in the
//! settings store instead (see [`crate::settings`]).

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// Gateway process configuration.
///
/// # Examples
///
/// ```
/// use relaygate_core::config::GatewayConfig;
///
/// let config = GatewayConfig::default();
/// assert_eq!(config.gateway_listen, "0.0.0.0:5244");
/// assert_eq!(config.public_base_url(), "http://127.0.0.1:5244");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Bind address for the gateway (e.g. `"0.0.0.0:5244"`).
    #[builder(default = String::from("0.0.0.0:5244"))]
    pub gateway_listen: String,

    /// Log level filter string (e.g. `"info"`, `"debug"`).
    #[builder(default = String::from("info"))]
    pub log_level: String,

    /// Host name under which this server is reachable by its own backends.
    #[builder(default = String::from("127.0.0.1"))]
    pub site_host: String,

    /// Public HTTP port.
    #[builder(default = 5244)]
    pub http_port: u16,

    /// Public HTTPS port. Preferred over `http_port` when set.
    #[builder(default)]
    pub https_port: Option<u16>,

    /// Token handed to decrypt backends for same-server auxiliary fetches.
    #[builder(default)]
    pub site_token: String,

    /// Optional JSON file with setting overrides.
    #[builder(default)]
    pub settings_file: Option<String>,

    /// Optional JSON file with mount definitions.
    #[builder(default)]
    pub mounts_file: Option<String>,

    /// Directory served at `/` when no mounts file is configured.
    #[builder(default = String::from("./data"))]
    pub data_dir: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            gateway_listen: String::from("0.0.0.0:5244"),
            log_level: String::from("info"),
            site_host: String::from("127.0.0.1"),
            http_port: 5244,
            https_port: None,
            site_token: String::new(),
            settings_file: None,
            mounts_file: None,
            data_dir: String::from("./data"),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `GATEWAY_LISTEN` | `0.0.0.0:5244` |
    /// | `LOG_LEVEL` | `info` |
    /// | `SITE_HOST` | `127.0.0.1` |
    /// | `HTTP_PORT` | `5244` |
    /// | `HTTPS_PORT` | `-1` (disabled) |
    /// | `SITE_TOKEN` | *(empty)* |
    /// | `SETTINGS_FILE` | *(unset)* |
    /// | `MOUNTS_FILE` | *(unset)* |
    /// | `DATA_DIR` | `./data` |
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(v) = lookup("GATEWAY_LISTEN") {
            config.gateway_listen = v;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            config.log_level = v;
        }
        if let Some(v) = lookup("SITE_HOST") {
            config.site_host = v;
        }
        if let Some(v) = lookup("HTTP_PORT") {
            if let Ok(port) = v.parse::<u16>() {
                config.http_port = port;
            }
        }
        if let Some(v) = lookup("HTTPS_PORT") {
            config.https_port = v.parse::<u16>().ok();
        }
        if let Some(v) = lookup("SITE_TOKEN") {
            config.site_token = v;
        }
        if let Some(v) = lookup("SETTINGS_FILE") {
            config.settings_file = Some(v).filter(|s| !s.is_empty());
        }
        if let Some(v) = lookup("MOUNTS_FILE") {
            config.mounts_file = Some(v).filter(|s| !s.is_empty());
        }
        if let Some(v) = lookup("DATA_DIR") {
            config.data_dir = v;
        }

        config
    }

    /// The externally reachable base URL of this server, preferring HTTPS.
    ///
    /// This is derived from configuration only; deployments behind a
    /// TLS-terminating proxy must set `SITE_HOST` and the ports accordingly.
    #[must_use]
    pub fn public_base_url(&self) -> String {
        match self.https_port {
            Some(port) => format!("https://{}:{port}", self.site_host),
            None => format!("http://{}:{}", self.site_host, self.http_port),
        }
    }
}
