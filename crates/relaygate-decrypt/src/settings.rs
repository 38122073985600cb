//! Settings derived from the registered decrypt plugins.
//!
//! Every plugin field becomes one setting item keyed `encv_<plugin>_<field>`.
//! At startup the current values are read back into one JSON object per
//! plugin, which the gateway hands to [`crate::plugin::DecryptPlugin::open`].

use std::collections::BTreeMap;

use relaygate_core::settings::{
    SettingFlag, SettingGroup, SettingItem, SettingType, SettingsStore, keys,
};
use serde_json::{Map, Value};
use tracing::info;

use crate::plugin::PluginRegistry;

/// Settings key of one plugin field.
#[must_use]
pub fn plugin_setting_key(plugin: &str, field: &str) -> String {
    format!("{}_{plugin}_{field}", keys::PLUGIN_NAMESPACE)
}

fn render_default(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Setting items for all plugin fields, seeded with their defaults.
#[must_use]
pub fn generate_setting_items(registry: &PluginRegistry) -> Vec<SettingItem> {
    let mut items = Vec::new();
    for plugin in registry.iter() {
        for field in plugin.setting_fields() {
            let key = plugin_setting_key(plugin.name(), &field.key);
            info!(%key, plugin = plugin.name(), "registering decrypt plugin setting");
            items.push(SettingItem {
                key,
                value: render_default(&field.default),
                setting_type: SettingType::from_field_type(&field.field_type),
                group: SettingGroup::Global,
                flag: SettingFlag::Private,
                help: field.help,
                options: field.options.join(","),
            });
        }
    }
    items
}

/// Current configuration object of every plugin, read from `store`.
///
/// Each field is read with the getter matching its type; numbers that are
/// unset or unparsable read as `0`.
#[must_use]
pub fn load_plugin_settings(
    registry: &PluginRegistry,
    store: &dyn SettingsStore,
) -> BTreeMap<String, Value> {
    registry
        .iter()
        .map(|plugin| {
            let mut config = Map::new();
            for field in plugin.setting_fields() {
                let key = plugin_setting_key(plugin.name(), &field.key);
                let value = match SettingType::from_field_type(&field.field_type) {
                    SettingType::Bool => Value::Bool(store.get_bool(&key)),
                    SettingType::Number => Value::from(store.get_int(&key, 0)),
                    SettingType::String | SettingType::Select | SettingType::Text => {
                        Value::String(store.get_str(&key))
                    }
                };
                config.insert(field.key, value);
            }
            (plugin.name().to_owned(), Value::Object(config))
        })
        .collect()
}
