mod config;
mod memory;

pub use config::{PluginConfig, PluginKind, RegistryConfig};
pub use memory::{InMemoryRegistry, RegistryBuilder};

use aspect_models::{AspectSpec, ChangeKind, EntitySpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::mutation::MutationHook;
use crate::side_effect::SideEffect;
use crate::validation::PayloadValidator;

/// Matches any entity or aspect name in a [`PluginScope`].
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Unresolved entity type: {0}")]
    UnresolvedEntityType(String),

    #[error("Unresolved aspect `{aspect}` for entity type `{entity_type}`")]
    UnresolvedAspect { entity_type: String, aspect: String },

    #[error("Registry unavailable: {0}")]
    Unavailable(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Lookup surface for specs and extension plugins.
///
/// Lookups return plugins in registration order. Any method may fail with
/// [`RegistryError::Unavailable`], which is fatal to the batch being
/// processed.
pub trait ExtensionRegistry: Send + Sync {
    fn entity_spec(&self, entity_type: &str) -> RegistryResult<Arc<EntitySpec>>;

    fn aspect_spec(
        &self,
        entity: &EntitySpec,
        aspect_name: &str,
    ) -> RegistryResult<Arc<AspectSpec>>;

    fn validators(
        &self,
        change_kind: ChangeKind,
        entity_type: &str,
        aspect_name: &str,
    ) -> RegistryResult<Vec<Scoped<dyn PayloadValidator>>>;

    fn mutation_hooks(
        &self,
        change_kind: ChangeKind,
        entity_type: &str,
        aspect_name: &str,
    ) -> RegistryResult<Vec<Scoped<dyn MutationHook>>>;

    /// Every registered side effect, with its scope. Callers filter by
    /// scope per input item.
    fn side_effects(&self) -> RegistryResult<Vec<Scoped<dyn SideEffect>>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityAspectName {
    pub entity_name: String,
    pub aspect_name: String,
}

impl EntityAspectName {
    pub fn new(
        entity_name: impl Into<String>,
        aspect_name: impl Into<String>,
    ) -> Self {
        Self {
            entity_name: entity_name.into(),
            aspect_name: aspect_name.into(),
        }
    }

    pub fn any() -> Self {
        Self::new(WILDCARD, WILDCARD)
    }

    pub fn matches(&self, entity_type: &str, aspect_name: &str) -> bool {
        (self.entity_name == WILDCARD || self.entity_name == entity_type)
            && (self.aspect_name == WILDCARD || self.aspect_name == aspect_name)
    }
}

fn all_operations() -> BTreeSet<ChangeKind> {
    ChangeKind::ALL.into_iter().collect()
}

fn any_aspect() -> Vec<EntityAspectName> {
    vec![EntityAspectName::any()]
}

/// Change kinds and (entity, aspect) pairs a plugin applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginScope {
    #[serde(default = "all_operations")]
    pub operations: BTreeSet<ChangeKind>,
    #[serde(default = "any_aspect")]
    pub entity_aspects: Vec<EntityAspectName>,
}

impl Default for PluginScope {
    fn default() -> Self {
        Self::all()
    }
}

impl PluginScope {
    pub fn all() -> Self {
        Self {
            operations: all_operations(),
            entity_aspects: any_aspect(),
        }
    }

    pub fn for_aspect(
        entity_name: impl Into<String>,
        aspect_name: impl Into<String>,
    ) -> Self {
        Self {
            operations: all_operations(),
            entity_aspects: vec![EntityAspectName::new(
                entity_name,
                aspect_name,
            )],
        }
    }

    pub fn with_operations(
        mut self,
        operations: impl IntoIterator<Item = ChangeKind>,
    ) -> Self {
        self.operations = operations.into_iter().collect();
        self
    }

    pub fn matches(
        &self,
        change_kind: ChangeKind,
        entity_type: &str,
        aspect_name: &str,
    ) -> bool {
        self.operations.contains(&change_kind)
            && self
                .entity_aspects
                .iter()
                .any(|pair| pair.matches(entity_type, aspect_name))
    }
}

/// A registered plugin with its name and scope.
pub struct Scoped<P: ?Sized> {
    pub name: String,
    pub scope: PluginScope,
    pub plugin: Arc<P>,
}

impl<P: ?Sized> Scoped<P> {
    pub fn new(
        name: impl Into<String>,
        scope: PluginScope,
        plugin: Arc<P>,
    ) -> Self {
        Self {
            name: name.into(),
            scope,
            plugin,
        }
    }
}

impl<P: ?Sized> Clone for Scoped<P> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            scope: self.scope.clone(),
            plugin: Arc::clone(&self.plugin),
        }
    }
}

impl<P: ?Sized> std::fmt::Debug for Scoped<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scoped")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}
