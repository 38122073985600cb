//! Storage resolution boundary.
//!
//! A [`StorageResolver`] maps a request path to the storage mounted there
//! ([`StorageRef`]), the object's metadata ([`ObjectMeta`]), and a
//! [`ResolvedLink`] locating the object's bytes.
//!
//! A [`ResolvedLink`] may own a release action (for example a pooled
//! connection or a temporary credential). The action runs exactly once:
//! either through [`ResolvedLink::close`] or when the link is dropped.

use std::fmt;
use std::net::IpAddr;

use async_trait::async_trait;
use http::HeaderMap;

use crate::error::CoreResult;
use crate::utils;

/// Capabilities and proxy flags of the storage a path belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageRef {
    /// Mount path of the storage (e.g. `/`, `/remote`).
    pub mount_path: String,
    /// Driver name (e.g. `local`, `http`).
    pub driver: String,
    /// The driver cannot hand out client-usable links and must be proxied.
    pub must_proxy: bool,
    /// The storage is configured to be served through this server.
    pub web_proxy: bool,
    /// The storage proxies through an external URL.
    pub webdav_proxy_url: bool,
    /// Range requests are fulfilled by this server when proxying.
    pub proxy_range: bool,
    /// Alternate download-proxy base URL(s), newline separated.
    pub down_proxy_url: String,
}

/// Metadata of a resolved object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMeta {
    /// File name.
    pub name: String,
    /// Physical path on this host; empty for remote-only backends.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
}

impl ObjectMeta {
    /// Lowercase extension of the object's name.
    #[must_use]
    pub fn ext(&self) -> String {
        utils::ext(&self.name)
    }
}

/// Arguments for resolving a link.
#[derive(Debug, Clone, Default)]
pub struct LinkArgs {
    /// Client IP address, when known.
    pub ip: Option<IpAddr>,
    /// Request headers to take into account when producing the link.
    pub headers: HeaderMap,
    /// Optional link type hint from the `type` query parameter.
    pub link_type: Option<String>,
    /// The link will be handed to the client as a redirect.
    pub redirect: bool,
}

type ReleaseFn = Box<dyn FnOnce() + Send + Sync + 'static>;

/// Locator for an object's bytes.
///
/// An empty `url` means the object is only reachable through its physical
/// path on this host.
pub struct ResolvedLink {
    /// Remote URL, or empty for local-only objects.
    pub url: String,
    /// Headers to send when fetching `url`.
    pub headers: HeaderMap,
    release: Option<ReleaseFn>,
}

impl fmt::Debug for ResolvedLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedLink")
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("released", &self.release.is_none())
            .finish()
    }
}

impl ResolvedLink {
    /// A link to a remote URL.
    #[must_use]
    pub fn remote(url: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            url: url.into(),
            headers,
            release: None,
        }
    }

    /// A link to an object only reachable through its physical path.
    #[must_use]
    pub fn local() -> Self {
        Self {
            url: String::new(),
            headers: HeaderMap::new(),
            release: None,
        }
    }

    /// Attach the action that releases this link's resources.
    #[must_use]
    pub fn with_release(mut self, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    /// Whether the link points at a remote URL.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        !self.url.is_empty()
    }

    /// Run the release action. Further calls (and the eventual drop) do nothing.
    pub fn close(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for ResolvedLink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Resolves request paths against mounted storages.
#[async_trait]
pub trait StorageResolver: Send + Sync + fmt::Debug {
    /// The storage mounted at or above `path`.
    fn get_storage(&self, path: &str) -> CoreResult<StorageRef>;

    /// Metadata of the object at `path`.
    async fn get(&self, path: &str) -> CoreResult<ObjectMeta>;

    /// A link to the bytes of the object at `path`, with its metadata.
    async fn link(&self, path: &str, args: &LinkArgs) -> CoreResult<(ResolvedLink, ObjectMeta)>;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counted_link(counter: &Arc<AtomicUsize>) -> ResolvedLink {
        let counter = Arc::clone(counter);
        ResolvedLink::remote("http://origin/a", HeaderMap::new()).with_release(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_should_release_link_once_on_drop() {
        let counter = Arc::new(AtomicUsize::new(0));
        drop(counted_link(&counter));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_should_release_link_once_when_closed_repeatedly() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut link = counted_link(&counter);
        link.close();
        link.close();
        drop(link);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_should_report_local_link() {
        let link = ResolvedLink::local();
        assert!(!link.is_remote());
        assert!(ResolvedLink::remote("http://x/y", HeaderMap::new()).is_remote());
    }

    #[test]
    fn test_should_extract_object_extension() {
        let meta = ObjectMeta {
            name: "Report.SccgPdf".to_owned(),
            ..ObjectMeta::default()
        };
        assert_eq!(meta.ext(), "sccgpdf");
    }
}
