//! Encrypted container support for RelayGate.
//!
//! Containers are recognized by filename suffix ([`ContainerSuffixes`]) and
//! by header ([`PluginRegistry`]). A [`DecryptEngine`] turns a resolved link
//! (remote URL or local path) plus the configured credential into a
//! [`DecryptReaderFactory`], from which [`DecryptedStream`]s of plaintext are
//! derived.
//!
//! The built-in plugin implements the `sccg` format (see [`sccg`]).

pub mod error;
pub mod factory;
pub mod plugin;
pub mod resolver;
pub mod sccg;
pub mod settings;
pub mod suffix;

pub use error::{DecryptError, DecryptResult};
pub use factory::{DecryptEngine, DecryptReaderFactory, DecryptedStream};
pub use plugin::{DecryptPlugin, PluginRegistry};
pub use resolver::PublicUrlResolver;
pub use suffix::ContainerSuffixes;
