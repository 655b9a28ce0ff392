use aspect_models::EntitySpec;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use validator::Validate;

use super::{InMemoryRegistry, PluginScope};
use crate::config::ConfigError;
use crate::plugins::{
    DefaultFieldsHook, ImmutableFieldValidator, MirrorAspectSideEffect,
    ProvenanceStampHook, RequiredFieldsValidator,
};

/// Registry document: entity specs plus built-in plugin declarations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegistryConfig {
    #[serde(default)]
    pub entities: Vec<EntitySpec>,
    #[serde(default)]
    #[validate(nested)]
    pub plugins: Vec<PluginConfig>,
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PluginConfig {
    #[validate(length(min = 1, message = "Plugin name cannot be empty"))]
    pub name: String,
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub scope: PluginScope,
    #[serde(flatten)]
    pub kind: PluginKind,
}

/// Built-in plugin and its parameters, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PluginKind {
    MirrorAspect { from: String, to: String },
    ProvenanceStamp { field: String },
    DefaultFields { defaults: Map<String, Value> },
    ImmutableField { field: String },
    RequiredFields { fields: Vec<String> },
}

impl RegistryConfig {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ConfigError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Field checks plus uniqueness of entity and plugin names.
    pub fn validate_all(&self) -> Result<(), ConfigError> {
        self.validate()?;
        let mut entities = HashSet::new();
        for entity in &self.entities {
            entity.validate_all()?;
            if !entities.insert(entity.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate entity `{}`",
                    entity.name
                )));
            }
        }
        let mut plugins = HashSet::new();
        for plugin in &self.plugins {
            if !plugins.insert(plugin.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate plugin `{}`",
                    plugin.name
                )));
            }
        }
        Ok(())
    }
}

impl InMemoryRegistry {
    pub fn from_config(config: RegistryConfig) -> Result<Self, ConfigError> {
        config.validate_all()?;
        let mut builder = InMemoryRegistry::builder();
        for entity in config.entities {
            builder = builder.entity(entity);
        }
        for plugin in config.plugins {
            if !plugin.enabled {
                debug!(name = %plugin.name, "plugin disabled");
                continue;
            }
            let PluginConfig {
                name, scope, kind, ..
            } = plugin;
            builder = match kind {
                PluginKind::MirrorAspect { from, to } => builder.side_effect(
                    name,
                    scope,
                    Arc::new(MirrorAspectSideEffect::new(from, to)),
                ),
                PluginKind::ProvenanceStamp { field } => builder.mutation_hook(
                    name,
                    scope,
                    Arc::new(ProvenanceStampHook::new(field)),
                ),
                PluginKind::DefaultFields { defaults } => builder.mutation_hook(
                    name,
                    scope,
                    Arc::new(DefaultFieldsHook::new(defaults)),
                ),
                PluginKind::ImmutableField { field } => builder.validator(
                    name,
                    scope,
                    Arc::new(ImmutableFieldValidator::new(field)),
                ),
                PluginKind::RequiredFields { fields } => builder.validator(
                    name,
                    scope,
                    Arc::new(RequiredFieldsValidator::new(fields)),
                ),
            };
        }
        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ExtensionRegistry;
    use aspect_models::ChangeKind;
    use serde_json::json;

    fn document() -> Value {
        json!({
            "entities": [{
                "name": "dataset",
                "aspects": [{ "name": "status" }, { "name": "ownership" }]
            }],
            "plugins": [
                {
                    "name": "mirror-dev",
                    "kind": "mirror-aspect",
                    "from": ",PROD)",
                    "to": ",DEV)",
                    "scope": { "operations": ["UPSERT"] }
                },
                {
                    "name": "owners-required",
                    "kind": "required-fields",
                    "fields": ["owners"],
                    "scope": { "entityAspects": [
                        { "entityName": "dataset", "aspectName": "ownership" }
                    ]}
                },
                {
                    "name": "stamp",
                    "kind": "provenance-stamp",
                    "field": "lastModified",
                    "enabled": false
                }
            ]
        })
    }

    #[test]
    fn builds_registry_from_document() {
        let config = RegistryConfig::from_value(document()).unwrap();
        assert_eq!(config.plugins.len(), 3);
        let registry = InMemoryRegistry::from_config(config).unwrap();
        assert_eq!(registry.plugin_count(), 2);
        assert_eq!(registry.side_effects().unwrap()[0].name, "mirror-dev");
        assert_eq!(
            registry
                .validators(ChangeKind::Upsert, "dataset", "ownership")
                .unwrap()
                .len(),
            1
        );
        assert!(
            registry
                .mutation_hooks(ChangeKind::Upsert, "dataset", "status")
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn rejects_invalid_documents() {
        let mut doc = document();
        doc["plugins"][1]["name"] = json!("mirror-dev");
        let config = RegistryConfig::from_value(doc).unwrap();
        assert!(InMemoryRegistry::from_config(config).is_err());

        let mut doc = document();
        doc["plugins"][0]["name"] = json!("");
        let config = RegistryConfig::from_value(doc).unwrap();
        assert!(config.validate_all().is_err());

        let mut doc = document();
        doc["plugins"][0]["kind"] = json!("teleport");
        assert!(RegistryConfig::from_value(doc).is_err());
    }
}
