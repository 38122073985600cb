//! End-to-end tests for RelayGate.
//!
//! Each test starts its own gateway and, where needed, a fake HTTP origin,
//! both bound to `127.0.0.1:0`, and drives them with `reqwest`. Nothing has
//! to be running beforehand:
//!
//! ```text
//! cargo test -p relaygate-integration
//! ```

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Once};

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HttpConnBuilder;
use parking_lot::{Mutex, RwLock};
use relaygate_core::settings::{default_setting_items, extend_initial_settings};
use relaygate_core::{GatewayConfig, GatewaySettings, MemorySettings, MountTable, SettingsHandle};
use relaygate_decrypt::sccg::{SealOptions, seal};
use relaygate_decrypt::settings::{generate_setting_items, load_plugin_settings};
use relaygate_decrypt::{DecryptEngine, PluginRegistry};
use relaygate_http::{Gateway, GatewayService};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

static INIT: Once = Once::new();

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// Stops a background server when dropped.
#[derive(Debug)]
struct ServerHandle {
    shutdown: Option<oneshot::Sender<()>>,
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn bind_local() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    (listener, addr)
}

/// An HTTP client that does not follow redirects.
#[must_use]
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("client")
}

// ---------------------------------------------------------------------------
// Origin
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct OriginFile {
    head_status: StatusCode,
    status: StatusCode,
    content_type: &'static str,
    body: Bytes,
}

/// A request the origin received.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Request method.
    pub method: Method,
    /// Request path and query.
    pub uri: String,
    /// Request headers.
    pub headers: HeaderMap,
}

type FileMap = Arc<RwLock<HashMap<String, OriginFile>>>;
type RequestLog = Arc<Mutex<Vec<RecordedRequest>>>;

/// A fake HTTP origin serving files from memory.
#[derive(Debug)]
pub struct Origin {
    /// Base URL, e.g. `http://127.0.0.1:41234`.
    pub base_url: String,
    files: FileMap,
    requests: RequestLog,
    _server: ServerHandle,
}

impl Origin {
    /// Start an origin with no files.
    pub async fn start() -> Self {
        init_tracing();
        let (listener, addr) = bind_local().await;
        let files: FileMap = Arc::default();
        let requests: RequestLog = Arc::default();
        let (tx, mut rx) = oneshot::channel();

        let (loop_files, loop_requests) = (Arc::clone(&files), Arc::clone(&requests));
        tokio::spawn(async move {
            let http = HttpConnBuilder::new(TokioExecutor::new());
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { continue };
                        let (files, requests) = (Arc::clone(&loop_files), Arc::clone(&loop_requests));
                        let svc = service_fn(move |req: http::Request<Incoming>| {
                            let response = respond(&files, &requests, &req);
                            async move { Ok::<_, Infallible>(response) }
                        });
                        let conn = http.serve_connection(TokioIo::new(stream), svc).into_owned();
                        tokio::spawn(async move {
                            let _ = conn.await;
                        });
                    }
                    _ = &mut rx => break,
                }
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            files,
            requests,
            _server: ServerHandle {
                shutdown: Some(tx),
            },
        }
    }

    /// Serve `body` at `path` with status 200.
    pub fn put(&self, path: &str, content_type: &'static str, body: impl Into<Bytes>) {
        self.put_with_status(path, StatusCode::OK, content_type, body);
    }

    /// Serve `body` at `path` with `status`.
    pub fn put_with_status(
        &self,
        path: &str,
        status: StatusCode,
        content_type: &'static str,
        body: impl Into<Bytes>,
    ) {
        self.files.write().insert(
            path.to_owned(),
            OriginFile {
                head_status: status,
                status,
                content_type,
                body: body.into(),
            },
        );
    }

    /// Answer `HEAD` on `path` with 200 but `GET` with `status`, so the file
    /// resolves and then fails when its content is fetched.
    pub fn put_failing_get(
        &self,
        path: &str,
        status: StatusCode,
        content_type: &'static str,
        body: impl Into<Bytes>,
    ) {
        self.files.write().insert(
            path.to_owned(),
            OriginFile {
                head_status: StatusCode::OK,
                status,
                content_type,
                body: body.into(),
            },
        );
    }

    /// Absolute URL of `path`.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }
}

fn respond(
    files: &FileMap,
    requests: &RequestLog,
    req: &http::Request<Incoming>,
) -> http::Response<Full<Bytes>> {
    requests.lock().push(RecordedRequest {
        method: req.method().clone(),
        uri: req.uri().to_string(),
        headers: req.headers().clone(),
    });

    let file = files.read().get(req.uri().path()).cloned();
    let file = file.unwrap_or(OriginFile {
        head_status: StatusCode::NOT_FOUND,
        status: StatusCode::NOT_FOUND,
        content_type: "text/plain",
        body: Bytes::from_static(b"no such file"),
    });

    let len = file.body.len();
    let (status, body) = if req.method() == Method::HEAD {
        (file.head_status, Bytes::new())
    } else {
        (file.status, file.body)
    };
    let mut response = http::Response::new(Full::new(body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(file.content_type));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
    response
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// A gateway serving on a local port.
#[derive(Debug)]
pub struct TestGateway {
    /// Base URL, e.g. `http://127.0.0.1:41235`.
    pub base_url: String,
    /// Settings store backing the gateway.
    pub store: Arc<MemorySettings>,
    /// Snapshot holder the gateway reads from.
    pub settings: Arc<SettingsHandle>,
    registry: Arc<PluginRegistry>,
    _server: ServerHandle,
}

impl TestGateway {
    /// Start a gateway over `mounts` (a JSON array of mount definitions)
    /// with the given setting overrides.
    pub async fn start(mounts: &Value, overrides: &[(&str, &str)]) -> Self {
        init_tracing();
        let (listener, addr) = bind_local().await;

        let registry = Arc::new(PluginRegistry::with_builtin());
        let items = extend_initial_settings(default_setting_items(), generate_setting_items(&registry));
        let store = Arc::new(MemorySettings::from_items(&items));
        for (key, value) in overrides {
            store.set(*key, *value);
        }
        let settings = Arc::new(SettingsHandle::new(GatewaySettings::load(
            store.as_ref(),
            load_plugin_settings(&registry, store.as_ref()),
        )));

        let config = GatewayConfig {
            site_host: "127.0.0.1".to_owned(),
            http_port: addr.port(),
            ..GatewayConfig::default()
        };
        let mounts = MountTable::from_json(&mounts.to_string()).expect("mounts");
        let engine = DecryptEngine::new(Arc::clone(&registry), reqwest::Client::new());
        let gateway = Gateway::new(
            Arc::new(mounts),
            Arc::clone(&settings),
            engine,
            Arc::new(config),
        );
        let service = GatewayService::new(Arc::new(gateway));

        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(relaygate_http::serve(listener, service, async {
            let _ = rx.await;
        }));

        Self {
            base_url: format!("http://{addr}"),
            store,
            settings,
            registry,
            _server: ServerHandle {
                shutdown: Some(tx),
            },
        }
    }

    /// URL of `path` on the gateway.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Change a setting and publish a fresh snapshot.
    pub fn set(&self, key: &str, value: &str) {
        self.store.set(key, value);
        self.settings.refresh(
            self.store.as_ref(),
            load_plugin_settings(&self.registry, self.store.as_ref()),
        );
    }
}

/// Mount definition for a local directory.
#[must_use]
pub fn local_mount(path: &str, root: &Path) -> Value {
    serde_json::json!({
        "path": path,
        "kind": "local",
        "root": root,
        "proxy_range": true,
    })
}

/// Mount definition for an HTTP origin with no proxy flags.
#[must_use]
pub fn http_mount(path: &str, base_url: &str) -> Value {
    serde_json::json!({
        "path": path,
        "kind": "http",
        "base_url": base_url,
    })
}

/// Seal `plaintext` into a container with small frames.
#[must_use]
pub fn seal_container(plaintext: &[u8], password: &str, keyfile: Option<(&str, &[u8])>) -> Vec<u8> {
    let options = SealOptions {
        chunk_size: 32,
        keyfile: keyfile.map(|(name, bytes)| (name.to_owned(), bytes.to_vec())),
        ..SealOptions::default()
    };
    seal(plaintext, password, &options).expect("seal")
}

mod test_decrypt;
mod test_proxy;
mod test_server;
