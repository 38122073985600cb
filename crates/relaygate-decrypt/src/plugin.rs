//! Decrypt backend plugins.
//!
//! A [`DecryptPlugin`] recognizes one container format. It declares the
//! configuration fields it reads (seeded into the settings store as
//! `encv_<plugin>_<field>`), parses container headers, and turns a header plus
//! credential into a [`StreamKey`] that produces [`FrameDecoder`]s.
//!
//! Plugins are registered by name in a [`PluginRegistry`] at startup.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use serde_json::Value;

use crate::error::DecryptResult;
use crate::sccg::SccgPlugin;

/// One configuration field declared by a plugin.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingField {
    /// Field name, unique within the plugin.
    pub key: String,
    /// One of `string`, `bool`, `number`, `select`, `text`.
    pub field_type: String,
    /// Default value.
    pub default: Value,
    /// Help text.
    pub help: String,
    /// Options for `select` fields.
    pub options: Vec<String>,
}

impl SettingField {
    /// A field without options.
    #[must_use]
    pub fn new(key: &str, field_type: &str, default: Value, help: &str) -> Self {
        Self {
            key: key.to_owned(),
            field_type: field_type.to_owned(),
            default,
            help: help.to_owned(),
            options: Vec::new(),
        }
    }
}

/// A parsed container header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    /// Header length in bytes; the body starts at this offset.
    pub len: usize,
    /// Name of a keyfile stored next to the container, if one is required.
    pub keyfile: Option<String>,
    /// The raw header bytes.
    pub raw: Bytes,
}

/// Outcome of probing the start of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderProbe {
    /// Not this plugin's format.
    Foreign,
    /// Possibly this format; more bytes are needed.
    Incomplete,
    /// A complete, valid header.
    Parsed(ContainerHeader),
}

/// Incremental frame decoder for one decrypted stream.
pub trait FrameDecoder: Send {
    /// Decode the next frame from the front of `buf`, consuming its bytes.
    ///
    /// Returns `Ok(None)` when `buf` does not yet hold a complete frame. A
    /// returned chunk may be empty.
    fn decode(&mut self, buf: &mut BytesMut) -> DecryptResult<Option<Bytes>>;

    /// Whether the final frame has been decoded.
    fn is_finished(&self) -> bool;
}

/// Key material for one container, shared by all streams derived from it.
pub trait StreamKey: Send + Sync + fmt::Debug {
    /// A decoder positioned at the first frame.
    fn decoder(&self) -> Box<dyn FrameDecoder>;
}

/// A named container format.
pub trait DecryptPlugin: Send + Sync + fmt::Debug {
    /// Plugin name, used in setting keys.
    fn name(&self) -> &str;

    /// Configuration fields read by this plugin.
    fn setting_fields(&self) -> Vec<SettingField>;

    /// Inspect the first bytes of a file.
    ///
    /// # Errors
    ///
    /// Returns an error when the bytes are this format but the header is
    /// invalid.
    fn probe(&self, buf: &[u8]) -> DecryptResult<HeaderProbe>;

    /// Whether a header that references a keyfile may be opened under `config`.
    fn accepts_keyfile(&self, _config: &Value) -> bool {
        true
    }

    /// Derive the stream key from a header and credential.
    ///
    /// # Errors
    ///
    /// Returns an error when the header cannot be opened under `config`.
    fn open(
        &self,
        header: &ContainerHeader,
        credential: &str,
        keyfile: Option<&[u8]>,
        config: &Value,
    ) -> DecryptResult<Arc<dyn StreamKey>>;
}

/// Result of probing all registered plugins.
#[derive(Debug)]
pub enum Probe {
    /// No plugin recognizes the bytes.
    Unknown,
    /// At least one plugin needs more bytes.
    NeedMore,
    /// A plugin parsed a complete header.
    Matched(Arc<dyn DecryptPlugin>, ContainerHeader),
}

/// Plugins keyed by name.
#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Arc<dyn DecryptPlugin>>,
}

impl PluginRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in plugins.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SccgPlugin));
        registry
    }

    /// Register a plugin, returning the one it replaced.
    pub fn register(&mut self, plugin: Arc<dyn DecryptPlugin>) -> Option<Arc<dyn DecryptPlugin>> {
        self.plugins.insert(plugin.name().to_owned(), plugin)
    }

    /// Look up a plugin by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn DecryptPlugin>> {
        self.plugins.get(name)
    }

    /// Registered plugins in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn DecryptPlugin>> {
        self.plugins.values()
    }

    /// Offer `buf` to every plugin.
    ///
    /// # Errors
    ///
    /// Propagates the first header error raised by a plugin.
    pub fn probe(&self, buf: &[u8]) -> DecryptResult<Probe> {
        let mut need_more = false;
        for plugin in self.plugins.values() {
            match plugin.probe(buf)? {
                HeaderProbe::Foreign => {}
                HeaderProbe::Incomplete => need_more = true,
                HeaderProbe::Parsed(header) => {
                    return Ok(Probe::Matched(Arc::clone(plugin), header));
                }
            }
        }
        Ok(if need_more { Probe::NeedMore } else { Probe::Unknown })
    }
}
