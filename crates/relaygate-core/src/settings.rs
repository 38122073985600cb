//! Persisted settings and the per-request settings snapshot.
//!
//! The [`SettingsStore`] trait is the boundary to whatever persists typed
//! settings. [`MemorySettings`] is the in-process implementation, seeded from
//! [`default_setting_items`] and optionally overlaid from a JSON file.
//!
//! Request handling never reads the store directly. It reads a
//! [`GatewaySettings`] snapshot obtained from a [`SettingsHandle`]; the handle
//! is refreshed when configuration changes.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};
use crate::utils::{parse_bool, split_list};

/// Well-known setting keys.
pub mod keys {
    /// Password used to decrypt container files.
    pub const DECRYPT_PASSWORD: &str = "encv_decrypt_password";
    /// Namespace prefix for decrypt plugin setting keys.
    pub const PLUGIN_NAMESPACE: &str = "encv";
    /// Forward the client's query string to direct links.
    pub const FORWARD_DIRECT_LINK_PARAMS: &str = "forward_direct_link_params";
    /// Query parameter names never forwarded to direct links.
    pub const IGNORE_DIRECT_LINK_PARAMS: &str = "ignore_direct_link_params";
    /// Render proxied markdown as sanitized HTML.
    pub const FILTER_README_SCRIPTS: &str = "filter_readme_scripts";
    /// Extensions that are always proxied.
    pub const PROXY_TYPES: &str = "proxy_types";
    /// Extensions treated as text.
    pub const TEXT_TYPES: &str = "text_types";
    /// Extensions treated as audio.
    pub const AUDIO_TYPES: &str = "audio_types";
    /// Extensions treated as video.
    pub const VIDEO_TYPES: &str = "video_types";
    /// Extensions treated as images.
    pub const IMAGE_TYPES: &str = "image_types";
    /// JSON map of in-page preview providers.
    pub const IFRAME_PREVIEWS: &str = "iframe_previews";
    /// JSON map of external preview providers.
    pub const EXTERNAL_PREVIEWS: &str = "external_previews";
}

// ---------------------------------------------------------------------------
// Setting items
// ---------------------------------------------------------------------------

/// Value type of a setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingType {
    /// Single-line string.
    String,
    /// Boolean flag.
    Bool,
    /// Integer.
    Number,
    /// One of a fixed list of options.
    Select,
    /// Multi-line text.
    Text,
}

impl SettingType {
    /// Map a plugin field type name onto a setting type; unknown names are strings.
    #[must_use]
    pub fn from_field_type(name: &str) -> Self {
        match name {
            "bool" => Self::Bool,
            "number" => Self::Number,
            "select" => Self::Select,
            "text" => Self::Text,
            _ => Self::String,
        }
    }
}

/// Settings page a setting is shown on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingGroup {
    /// Global settings.
    Global,
    /// Preview settings.
    Preview,
}

/// Visibility of a setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingFlag {
    /// Visible to everyone.
    Public,
    /// Visible to administrators only.
    Private,
}

/// A persisted setting with its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingItem {
    /// Unique key.
    pub key: String,
    /// Current value, always stored as a string.
    pub value: String,
    /// Value type.
    #[serde(rename = "type")]
    pub setting_type: SettingType,
    /// Settings page.
    pub group: SettingGroup,
    /// Visibility.
    pub flag: SettingFlag,
    /// Help text.
    #[serde(default)]
    pub help: String,
    /// Comma-separated options for select settings.
    #[serde(default)]
    pub options: String,
}

impl SettingItem {
    fn new(key: &str, value: &str, setting_type: SettingType, group: SettingGroup) -> Self {
        Self {
            key: key.to_owned(),
            value: value.to_owned(),
            setting_type,
            group,
            flag: SettingFlag::Public,
            help: String::new(),
            options: String::new(),
        }
    }
}

/// The host system's default setting items relevant to content delivery.
#[must_use]
pub fn default_setting_items() -> Vec<SettingItem> {
    use SettingGroup::{Global, Preview};
    use SettingType::{Bool, String as Str, Text};

    vec![
        SettingItem::new(
            keys::TEXT_TYPES,
            "txt,htm,html,xml,java,properties,sql,js,md,json,conf,ini,vue,php,py,bat,gitignore,yml,go,sh,c,cpp,h,hpp,tsx,vtt,srt,ass,rs,lrc",
            Text,
            Preview,
        ),
        SettingItem::new(keys::AUDIO_TYPES, "mp3,flac,ogg,m4a,wav,opus,wma", Text, Preview),
        SettingItem::new(
            keys::VIDEO_TYPES,
            "mp4,mkv,avi,mov,rmvb,webm,flv,m3u8",
            Text,
            Preview,
        ),
        SettingItem::new(
            keys::IMAGE_TYPES,
            "jpg,tiff,jpeg,png,gif,bmp,svg,ico,swf,webp,avif",
            Text,
            Preview,
        ),
        SettingItem::new(keys::PROXY_TYPES, "m3u8,url", Text, Preview),
        SettingItem::new(
            keys::IFRAME_PREVIEWS,
            r#"{"doc,docx,xls,xlsx,ppt,pptx":{"Microsoft":"https://view.officeapps.live.com/op/view.aspx?src=$e_url"}}"#,
            Text,
            Preview,
        ),
        SettingItem::new(keys::EXTERNAL_PREVIEWS, "{}", Text, Preview),
        SettingItem::new(keys::FILTER_README_SCRIPTS, "true", Bool, Global),
        SettingItem::new(keys::FORWARD_DIRECT_LINK_PARAMS, "false", Bool, Global),
        SettingItem::new(
            keys::IGNORE_DIRECT_LINK_PARAMS,
            "sign,openlist_ts",
            Str,
            Global,
        ),
    ]
}

/// Extend the initial setting items with container support.
///
/// Appends the container suffixes to the matching type lists, registers the
/// container preview providers, adds the decrypt password item, and appends
/// `extra` (the generated decrypt plugin items).
#[must_use]
pub fn extend_initial_settings(
    mut items: Vec<SettingItem>,
    extra: Vec<SettingItem>,
) -> Vec<SettingItem> {
    const EXTERNAL: &str = r#"{ "/.*/": { "VSCode": "vscode://$url" } }"#;
    const IFRAME: &str = r#"{
	"sccgpdf": { "ENCV PDF": "/_preview/pdf.html?file=$e_url" },
	"sccgt": { "ENCV Text": "/_preview/text.html?file=$e_url" }
}"#;

    for item in &mut items {
        let overlay = match item.key.as_str() {
            keys::TEXT_TYPES => {
                item.value.push_str(",sccgt");
                continue;
            }
            keys::AUDIO_TYPES => {
                item.value.push_str(",sccga");
                continue;
            }
            keys::VIDEO_TYPES => {
                item.value.push_str(",sccgv");
                continue;
            }
            keys::IMAGE_TYPES => {
                item.value.push_str(",sccgi");
                continue;
            }
            keys::EXTERNAL_PREVIEWS => EXTERNAL,
            keys::IFRAME_PREVIEWS => IFRAME,
            _ => continue,
        };
        match merge_json_values(&item.value, overlay) {
            Ok(merged) => item.value = merged,
            Err(e) => warn!(key = %item.key, error = %e, "failed to merge setting value, keeping original"),
        }
    }

    items.push(SettingItem {
        key: keys::DECRYPT_PASSWORD.to_owned(),
        value: String::new(),
        setting_type: SettingType::String,
        group: SettingGroup::Global,
        flag: SettingFlag::Private,
        help: "Password used to decrypt ENCV container files (.sccg*). Leave empty if not used."
            .to_owned(),
        options: String::new(),
    });
    items.extend(extra);
    items
}

/// Overlay the keys of the JSON object `to_add` onto the JSON object `original`.
///
/// An unparsable `original` is treated as an empty object. The result is
/// tab-indented with keys in sorted order, so equal inputs always produce
/// identical output.
///
/// # Errors
///
/// Returns [`CoreError::Config`] if `to_add` is not a JSON object.
pub fn merge_json_values(original: &str, to_add: &str) -> CoreResult<String> {
    let mut base: BTreeMap<String, Value> = serde_json::from_str(original).unwrap_or_else(|e| {
        debug!(error = %e, "original setting value is not a JSON object, starting empty");
        BTreeMap::new()
    });
    let overlay: BTreeMap<String, Value> = serde_json::from_str(to_add)
        .map_err(|e| CoreError::Config(format!("invalid JSON provided to add: {e}")))?;

    base.extend(overlay);

    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    base.serialize(&mut serializer)
        .map_err(|e| CoreError::Config(format!("failed to marshal merged JSON: {e}")))?;
    String::from_utf8(out).map_err(|e| CoreError::Internal(e.into()))
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Read access to persisted settings.
pub trait SettingsStore: Send + Sync {
    /// Raw string value; empty when unset.
    fn get_str(&self, key: &str) -> String;

    /// Boolean value; `"true"` and `"1"` are true, anything else false.
    fn get_bool(&self, key: &str) -> bool {
        parse_bool(&self.get_str(key))
    }

    /// Integer value, or `default` when unset or unparsable.
    fn get_int(&self, key: &str, default: i64) -> i64 {
        self.get_str(key).trim().parse().unwrap_or(default)
    }
}

/// In-memory settings store.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: RwLock<HashMap<String, String>>,
}

impl MemorySettings {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with the values of `items`.
    #[must_use]
    pub fn from_items(items: &[SettingItem]) -> Self {
        let values = items
            .iter()
            .map(|item| (item.key.clone(), item.value.clone()))
            .collect();
        Self {
            values: RwLock::new(values),
        }
    }

    /// Set a single value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values.write().insert(key.into(), value.into());
    }

    /// Overlay values from a JSON object. Returns the number of keys applied.
    ///
    /// Strings are stored verbatim; booleans, numbers, and nested values are
    /// stored in their JSON text form, and `null` clears the value.
    pub fn overlay_json(&self, json: &str) -> CoreResult<usize> {
        let overrides: BTreeMap<String, Value> = serde_json::from_str(json)
            .map_err(|e| CoreError::Config(format!("settings overrides must be a JSON object: {e}")))?;
        let mut values = self.values.write();
        for (key, value) in &overrides {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            values.insert(key.clone(), text);
        }
        Ok(overrides.len())
    }

    /// Overlay values from a JSON file.
    pub fn overlay_file(&self, path: impl AsRef<Path>) -> CoreResult<usize> {
        let text = std::fs::read_to_string(path.as_ref())?;
        self.overlay_json(&text)
    }
}

impl SettingsStore for MemorySettings {
    fn get_str(&self, key: &str) -> String {
        self.values.read().get(key).cloned().unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Immutable, typed view of the settings used while handling requests.
#[derive(Clone, Default)]
pub struct GatewaySettings {
    /// Container decryption credential; empty when not configured.
    pub decrypt_password: String,
    /// Forward the client's query parameters to direct links.
    pub forward_direct_link_params: bool,
    /// Query parameter names stripped before forwarding.
    pub ignore_direct_link_params: Vec<String>,
    /// Render proxied markdown as sanitized HTML.
    pub filter_readme_scripts: bool,
    /// Extensions that are always proxied.
    pub proxy_types: Vec<String>,
    /// Extensions treated as text (proxyable).
    pub text_types: Vec<String>,
    /// Resolved configuration object per decrypt plugin.
    pub plugin_settings: BTreeMap<String, Value>,
}

impl fmt::Debug for GatewaySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewaySettings")
            .field(
                "decrypt_password",
                &if self.decrypt_password.is_empty() { "" } else { "..." },
            )
            .field("forward_direct_link_params", &self.forward_direct_link_params)
            .field("ignore_direct_link_params", &self.ignore_direct_link_params)
            .field("filter_readme_scripts", &self.filter_readme_scripts)
            .field("proxy_types", &self.proxy_types)
            .field("text_types", &self.text_types)
            .field("plugin_settings", &self.plugin_settings.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl GatewaySettings {
    /// Read a snapshot from the store.
    #[must_use]
    pub fn load(store: &dyn SettingsStore, plugin_settings: BTreeMap<String, Value>) -> Self {
        Self {
            decrypt_password: store.get_str(keys::DECRYPT_PASSWORD),
            forward_direct_link_params: store.get_bool(keys::FORWARD_DIRECT_LINK_PARAMS),
            ignore_direct_link_params: split_list(&store.get_str(keys::IGNORE_DIRECT_LINK_PARAMS)),
            filter_readme_scripts: store.get_bool(keys::FILTER_README_SCRIPTS),
            proxy_types: split_list(&store.get_str(keys::PROXY_TYPES)),
            text_types: split_list(&store.get_str(keys::TEXT_TYPES)),
            plugin_settings,
        }
    }

    /// Whether `ext` is in the always-proxy set.
    #[must_use]
    pub fn is_proxy_type(&self, ext: &str) -> bool {
        self.proxy_types.iter().any(|t| t == ext)
    }

    /// Whether `ext` is in the text set.
    #[must_use]
    pub fn is_text_type(&self, ext: &str) -> bool {
        self.text_types.iter().any(|t| t == ext)
    }

    /// Configuration object for a decrypt plugin (`null` when absent).
    #[must_use]
    pub fn plugin_config(&self, plugin: &str) -> &Value {
        self.plugin_settings.get(plugin).unwrap_or(&Value::Null)
    }
}

/// Shared holder of the current [`GatewaySettings`] snapshot.
#[derive(Debug)]
pub struct SettingsHandle {
    current: RwLock<Arc<GatewaySettings>>,
}

impl SettingsHandle {
    /// Create a handle holding `initial`.
    #[must_use]
    pub fn new(initial: GatewaySettings) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    /// The current snapshot. Callers keep it for the whole request.
    #[must_use]
    pub fn snapshot(&self) -> Arc<GatewaySettings> {
        Arc::clone(&self.current.read())
    }

    /// Replace the snapshot after a configuration change.
    pub fn replace(&self, next: GatewaySettings) {
        *self.current.write() = Arc::new(next);
    }

    /// Rebuild the snapshot from `store`. In-flight requests keep the old one.
    pub fn refresh(&self, store: &dyn SettingsStore, plugin_settings: BTreeMap<String, Value>) {
        self.replace(GatewaySettings::load(store, plugin_settings));
    }
}
