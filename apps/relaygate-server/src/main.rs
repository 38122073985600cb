//! RelayGate server binary.
//!
//! Loads configuration from environment variables, seeds the settings store,
//! mounts storages, and serves the download and proxy entry points.
//!
//! # Usage
//!
//! ```text
//! GATEWAY_LISTEN=0.0.0.0:5244 DATA_DIR=./data relaygate-server
//! ```
//!
//! Send `SIGHUP` to re-read `SETTINGS_FILE` without restarting.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use relaygate_core::settings::{default_setting_items, extend_initial_settings};
use relaygate_core::{
    GatewayConfig, GatewaySettings, MemorySettings, MountTable, SettingsHandle,
};
use relaygate_decrypt::settings::{generate_setting_items, load_plugin_settings};
use relaygate_decrypt::{DecryptEngine, PluginRegistry};
use relaygate_http::{Gateway, GatewayService};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Server version reported in logs.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` takes precedence over `log_level` when set.
fn init_tracing(log_level: &str) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    Ok(())
}

/// Seed the settings store with the initial items (including one item per
/// decrypt plugin field), then apply the overrides file if configured.
fn bootstrap_settings(config: &GatewayConfig, registry: &PluginRegistry) -> Result<MemorySettings> {
    let items = extend_initial_settings(default_setting_items(), generate_setting_items(registry));
    let store = MemorySettings::from_items(&items);
    if let Some(path) = &config.settings_file {
        let applied = store
            .overlay_file(path)
            .with_context(|| format!("cannot load settings file {path}"))?;
        info!(%path, applied, "applied settings overrides");
    }
    Ok(store)
}

/// Read the typed snapshot, including every plugin's configuration.
fn load_settings(store: &MemorySettings, registry: &PluginRegistry) -> GatewaySettings {
    GatewaySettings::load(store, load_plugin_settings(registry, store))
}

/// Build the mount table from `MOUNTS_FILE`, or serve `DATA_DIR` at `/`.
fn build_mounts(config: &GatewayConfig, client: reqwest::Client) -> Result<MountTable> {
    let table = match &config.mounts_file {
        Some(path) => MountTable::from_file(path)
            .with_context(|| format!("cannot load mounts file {path}"))?,
        None => MountTable::local_root(&config.data_dir),
    };
    Ok(table.with_client(client))
}

/// Re-read the settings file and swap the snapshot on every `SIGHUP`.
#[cfg(unix)]
fn spawn_settings_reload(
    config: Arc<GatewayConfig>,
    store: Arc<MemorySettings>,
    registry: Arc<PluginRegistry>,
    handle: Arc<SettingsHandle>,
) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangups = signal(SignalKind::hangup()).context("cannot install SIGHUP handler")?;
    tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            if let Some(path) = &config.settings_file {
                if let Err(e) = store.overlay_file(path) {
                    warn!(%path, error = %e, "failed to reload settings file, keeping current settings");
                    continue;
                }
            }
            handle.refresh(store.as_ref(), load_plugin_settings(&registry, store.as_ref()));
            info!("settings reloaded");
        }
    });
    Ok(())
}

/// Perform a health check by connecting to the gateway and requesting the
/// health endpoint.
async fn run_health_check(addr: &str) -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("cannot connect to {addr}"))?;

    let (mut reader, mut writer) = stream.into_split();

    let request = format!("GET /health HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    writer.write_all(request.as_bytes()).await?;
    writer.shutdown().await?;

    let mut response = String::new();
    reader.read_to_string(&mut response).await?;

    if response.contains("200 OK") && response.contains("\"status\":\"running\"") {
        Ok(())
    } else {
        anyhow::bail!("unhealthy response from {addr}")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --health-check flag for container HEALTHCHECK.
    if std::env::args().any(|a| a == "--health-check") {
        let config = GatewayConfig::from_env();
        let addr = config.gateway_listen.replace("0.0.0.0", "127.0.0.1");
        let healthy = run_health_check(&addr).await.is_ok();
        std::process::exit(i32::from(!healthy));
    }

    let config = Arc::new(GatewayConfig::from_env());

    init_tracing(&config.log_level)?;

    info!(
        gateway_listen = %config.gateway_listen,
        public_base_url = %config.public_base_url(),
        data_dir = %config.data_dir,
        version = VERSION,
        "starting RelayGate",
    );

    let registry = Arc::new(PluginRegistry::with_builtin());
    let store = Arc::new(bootstrap_settings(&config, &registry)?);
    let settings = Arc::new(SettingsHandle::new(load_settings(&store, &registry)));

    let client = reqwest::Client::builder()
        .user_agent(concat!("relaygate/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("cannot build HTTP client")?;
    let mounts = build_mounts(&config, client.clone())?;
    for mount in mounts.mount_paths() {
        info!(%mount, "storage mounted");
    }

    #[cfg(unix)]
    spawn_settings_reload(
        Arc::clone(&config),
        Arc::clone(&store),
        Arc::clone(&registry),
        Arc::clone(&settings),
    )?;

    let engine = DecryptEngine::new(Arc::clone(&registry), client.clone());
    let gateway = Gateway::new(Arc::new(mounts), settings, engine, Arc::clone(&config))
        .with_client(client);
    let service = GatewayService::new(Arc::new(gateway));

    let addr: SocketAddr = config
        .gateway_listen
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.gateway_listen))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind to {addr}"))?;
    info!(%addr, "listening");

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal, draining connections");
    };
    relaygate_http::serve(listener, service, shutdown).await;

    Ok(())
}
