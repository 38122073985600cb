//! Mount table: maps request paths onto storage backends.
//!
//! Mounts are matched by longest path prefix. Two backends exist:
//!
//! - `local`: a directory on this host. Objects carry their physical path and
//!   links are local-only, so these storages are always proxied.
//! - `http`: an HTTP origin. Objects are remote-only; their size comes from a
//!   `HEAD` request.
//!
//! Mount definitions are read from a JSON array:
//!
//! ```json
//! [
//!   { "path": "/", "kind": "local", "root": "./data" },
//!   { "path": "/cdn", "kind": "http", "base_url": "http://origin:8080/files", "web_proxy": true }
//! ]
//! ```

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, CoreResult, UpstreamStatusError};
use crate::storage::{LinkArgs, ObjectMeta, ResolvedLink, StorageRef, StorageResolver};
use crate::utils::{base_name, encode_path};

/// Backend of a mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MountBackend {
    /// A directory on this host.
    Local {
        /// Root directory.
        root: PathBuf,
    },
    /// An HTTP origin.
    Http {
        /// Base URL; the object's path below the mount is appended.
        base_url: String,
    },
}

impl MountBackend {
    fn driver(&self) -> &'static str {
        match self {
            Self::Local { .. } => "local",
            Self::Http { .. } => "http",
        }
    }
}

/// One mount definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    /// Mount path (e.g. `/`, `/remote`).
    pub path: String,
    /// Backend serving the mount.
    #[serde(flatten)]
    pub backend: MountBackend,
    /// Never hand out direct links.
    #[serde(default)]
    pub must_proxy: bool,
    /// Serve through this server.
    #[serde(default)]
    pub web_proxy: bool,
    /// Proxy through an external URL.
    #[serde(default)]
    pub webdav_proxy_url: bool,
    /// Fulfil range requests when proxying.
    #[serde(default)]
    pub proxy_range: bool,
    /// Alternate download-proxy base URL(s), newline separated.
    #[serde(default)]
    pub down_proxy_url: String,
}

#[derive(Debug)]
struct Mount {
    backend: MountBackend,
    storage: StorageRef,
}

/// Longest-prefix mount table implementing [`StorageResolver`].
#[derive(Debug)]
pub struct MountTable {
    /// Sorted by mount path length, longest first.
    mounts: Vec<Mount>,
    client: reqwest::Client,
}

impl MountTable {
    /// Build a table from mount definitions.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] for duplicate or invalid mount paths.
    pub fn new(configs: Vec<MountConfig>) -> CoreResult<Self> {
        let mut mounts: Vec<Mount> = Vec::with_capacity(configs.len());
        for config in configs {
            let mount_path = normalize_path(&config.path)
                .map_err(|_| CoreError::Config(format!("invalid mount path: {}", config.path)))?;
            if mounts.iter().any(|m| m.storage.mount_path == mount_path) {
                return Err(CoreError::Config(format!("duplicate mount path: {mount_path}")));
            }
            let is_local = matches!(config.backend, MountBackend::Local { .. });
            let storage = StorageRef {
                mount_path,
                driver: config.backend.driver().to_owned(),
                must_proxy: config.must_proxy || is_local,
                web_proxy: config.web_proxy,
                webdav_proxy_url: config.webdav_proxy_url,
                proxy_range: config.proxy_range,
                down_proxy_url: config.down_proxy_url,
            };
            mounts.push(Mount {
                backend: config.backend,
                storage,
            });
        }
        mounts.sort_by(|a, b| b.storage.mount_path.len().cmp(&a.storage.mount_path.len()));
        Ok(Self {
            mounts,
            client: reqwest::Client::new(),
        })
    }

    /// A table with a single local mount at `/`.
    #[must_use]
    pub fn local_root(root: impl Into<PathBuf>) -> Self {
        Self {
            mounts: vec![Mount {
                backend: MountBackend::Local { root: root.into() },
                storage: StorageRef {
                    mount_path: "/".to_owned(),
                    driver: "local".to_owned(),
                    must_proxy: true,
                    proxy_range: true,
                    ..StorageRef::default()
                },
            }],
            client: reqwest::Client::new(),
        }
    }

    /// Build a table from a JSON array of [`MountConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] on malformed JSON or invalid mounts.
    pub fn from_json(json: &str) -> CoreResult<Self> {
        let configs: Vec<MountConfig> = serde_json::from_str(json)
            .map_err(|e| CoreError::Config(format!("invalid mounts definition: {e}")))?;
        Self::new(configs)
    }

    /// Build a table from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    /// Use `client` for `HEAD` requests against HTTP origins.
    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Mount paths, longest first.
    pub fn mount_paths(&self) -> impl Iterator<Item = &str> {
        self.mounts.iter().map(|m| m.storage.mount_path.as_str())
    }

    /// Find the mount for a normalized path and the path below it.
    fn find<'a>(&self, path: &'a str) -> Option<(&Mount, &'a str)> {
        self.mounts.iter().find_map(|mount| {
            let prefix = mount.storage.mount_path.as_str();
            if prefix == "/" {
                return Some((mount, path));
            }
            match path.strip_prefix(prefix) {
                Some("") => Some((mount, "/")),
                Some(rest) if rest.starts_with('/') => Some((mount, rest)),
                _ => None,
            }
        })
    }

    fn locate(&self, path: &str) -> CoreResult<(String, &Mount, String)> {
        let path = normalize_path(path)?;
        let (mount, rel) = self
            .find(&path)
            .ok_or_else(|| CoreError::StorageNotFound(path.clone()))?;
        let rel = rel.to_owned();
        Ok((path, mount, rel))
    }

    async fn head(&self, url: &str) -> CoreResult<u64> {
        let response = self
            .client
            .head(url)
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
        Ok(response
            .headers()
            .get(http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    async fn meta(&self, path: &str, mount: &Mount, rel: &str) -> CoreResult<ObjectMeta> {
        let name = base_name(path).to_owned();
        match &mount.backend {
            MountBackend::Local { root } => {
                let physical = root.join(rel.trim_start_matches('/'));
                let metadata = tokio::fs::metadata(&physical).await.map_err(|e| {
                    if e.kind() == io::ErrorKind::NotFound {
                        CoreError::NotFound(path.to_owned())
                    } else {
                        CoreError::Io(e)
                    }
                })?;
                if metadata.is_dir() {
                    return Err(CoreError::InvalidPath(format!("{path} is a directory")));
                }
                Ok(ObjectMeta {
                    name,
                    path: physical.to_string_lossy().into_owned(),
                    size: metadata.len(),
                })
            }
            MountBackend::Http { base_url } => {
                let url = http_url(base_url, rel);
                let size = self.head(&url).await?;
                Ok(ObjectMeta {
                    name,
                    path: String::new(),
                    size,
                })
            }
        }
    }
}

#[async_trait]
impl StorageResolver for MountTable {
    fn get_storage(&self, path: &str) -> CoreResult<StorageRef> {
        let (_, mount, _) = self.locate(path)?;
        Ok(mount.storage.clone())
    }

    async fn get(&self, path: &str) -> CoreResult<ObjectMeta> {
        let (path, mount, rel) = self.locate(path)?;
        self.meta(&path, mount, &rel).await
    }

    async fn link(&self, path: &str, args: &LinkArgs) -> CoreResult<(ResolvedLink, ObjectMeta)> {
        let (path, mount, rel) = self.locate(path)?;
        let meta = self.meta(&path, mount, &rel).await?;
        let link = match &mount.backend {
            MountBackend::Local { .. } => ResolvedLink::local(),
            MountBackend::Http { base_url } => {
                ResolvedLink::remote(http_url(base_url, &rel), HeaderMap::new())
            }
        };
        debug!(
            %path,
            driver = %mount.storage.driver,
            link_type = ?args.link_type,
            redirect = args.redirect,
            "resolved link"
        );
        Ok((link, meta))
    }
}

fn http_url(base_url: &str, rel: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), encode_path(rel))
}

/// Normalize a request path: rooted, no empty or `.` segments, no trailing
/// slash. Parent segments (`..`) are rejected.
///
/// # Errors
///
/// Returns [`CoreError::InvalidPath`] when the path contains `..`.
pub fn normalize_path(path: &str) -> CoreResult<String> {
    let mut out = String::with_capacity(path.len() + 1);
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => return Err(CoreError::InvalidPath(path.to_owned())),
            s => {
                out.push('/');
                out.push_str(s);
            }
        }
    }
    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}
