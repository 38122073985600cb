//! Delivery policy: redirect or proxy, and how to proxy.
//!
//! All functions here are pure; they look only at the storage flags, the file
//! name, and the settings snapshot.

use relaygate_core::storage::{ObjectMeta, ResolvedLink, StorageRef};
use relaygate_core::utils::ext;
use relaygate_core::GatewaySettings;
use relaygate_decrypt::ContainerSuffixes;

/// How a request will be served.
#[derive(Debug)]
pub enum DeliveryDecision {
    /// Redirect the client to the link's URL.
    Redirect(ResolvedLink),
    /// Redirect the client to a storage's download proxy.
    DownProxy(String),
    /// Stream the object's bytes through this server.
    ProxyGeneric {
        /// Where the bytes come from.
        link: ResolvedLink,
        /// The object being served.
        object: ObjectMeta,
        /// Serve `Range` requests locally.
        allow_range: bool,
    },
    /// Decrypt the container while streaming it.
    ProxyDecrypt {
        /// Where the container comes from.
        link: ResolvedLink,
        /// The container being served.
        object: ObjectMeta,
    },
}

/// Whether the download entry point may redirect straight to the storage's
/// link: the storage neither forces proxying nor is configured for it, and
/// the extension is not in the always-proxy set.
#[must_use]
pub fn should_redirect_directly(
    storage: &StorageRef,
    filename: &str,
    settings: &GatewaySettings,
) -> bool {
    !(storage.must_proxy || storage.web_proxy || settings.is_proxy_type(&ext(filename)))
}

/// Whether the file may be streamed through this server.
///
/// Storage flags are checked first; otherwise the extension must be in the
/// always-proxy or text set.
#[must_use]
pub fn can_proxy(storage: &StorageRef, filename: &str, settings: &GatewaySettings) -> bool {
    if storage.must_proxy || storage.web_proxy || storage.webdav_proxy_url {
        return true;
    }
    let ext = ext(filename);
    settings.is_proxy_type(&ext) || settings.is_text_type(&ext)
}

/// Whether the file is an encrypted container. Takes precedence over
/// [`can_proxy`] and [`should_redirect_directly`].
#[must_use]
pub fn is_encrypted_container(suffixes: &ContainerSuffixes, filename: &str) -> bool {
    suffixes.is_container(filename)
}

/// Whether proxied content goes through the markdown transform.
#[must_use]
pub fn needs_markdown_transform(filename: &str, settings: &GatewaySettings, raw: bool) -> bool {
    ext(filename) == "md" && settings.filter_readme_scripts && !raw
}

/// Content type of decrypted container content, by container suffix.
#[must_use]
pub fn decrypted_content_type(filename: &str) -> &'static str {
    match ext(filename).as_str() {
        "sccgv" => "video/mp4",
        "sccgt" => "text/plain; charset=utf-8",
        "sccgpdf" => "application/pdf",
        "sccgi" => "image/png",
        _ => "application/octet-stream",
    }
}

/// First line of a storage's download-proxy setting, if any.
#[must_use]
pub fn down_proxy_base(storage: &StorageRef) -> Option<&str> {
    storage
        .down_proxy_url
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
}
