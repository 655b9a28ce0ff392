use aspect_models::{AspectSpec, ChangeKind, EntitySpec};
use std::collections::HashMap;
use std::sync::Arc;

use super::{
    ExtensionRegistry, PluginScope, RegistryError, RegistryResult, Scoped,
};
use crate::mutation::MutationHook;
use crate::side_effect::SideEffect;
use crate::validation::PayloadValidator;

/// Registry backed by specs and plugins held in memory. Immutable once
/// built, so it can be shared across concurrent batches.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRegistry {
    entities: HashMap<String, Arc<EntitySpec>>,
    aspects: HashMap<(String, String), Arc<AspectSpec>>,
    validators: Vec<Scoped<dyn PayloadValidator>>,
    mutation_hooks: Vec<Scoped<dyn MutationHook>>,
    side_effects: Vec<Scoped<dyn SideEffect>>,
}

impl InMemoryRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    pub fn plugin_count(&self) -> usize {
        self.validators.len()
            + self.mutation_hooks.len()
            + self.side_effects.len()
    }
}

fn in_scope<P: ?Sized>(
    plugins: &[Scoped<P>],
    change_kind: ChangeKind,
    entity_type: &str,
    aspect_name: &str,
) -> Vec<Scoped<P>> {
    plugins
        .iter()
        .filter(|p| p.scope.matches(change_kind, entity_type, aspect_name))
        .cloned()
        .collect()
}

impl ExtensionRegistry for InMemoryRegistry {
    fn entity_spec(
        &self,
        entity_type: &str,
    ) -> RegistryResult<Arc<EntitySpec>> {
        self.entities.get(entity_type).cloned().ok_or_else(|| {
            RegistryError::UnresolvedEntityType(entity_type.to_string())
        })
    }

    fn aspect_spec(
        &self,
        entity: &EntitySpec,
        aspect_name: &str,
    ) -> RegistryResult<Arc<AspectSpec>> {
        self.aspects
            .get(&(entity.name.clone(), aspect_name.to_string()))
            .cloned()
            .ok_or_else(|| RegistryError::UnresolvedAspect {
                entity_type: entity.name.clone(),
                aspect: aspect_name.to_string(),
            })
    }

    fn validators(
        &self,
        change_kind: ChangeKind,
        entity_type: &str,
        aspect_name: &str,
    ) -> RegistryResult<Vec<Scoped<dyn PayloadValidator>>> {
        Ok(in_scope(&self.validators, change_kind, entity_type, aspect_name))
    }

    fn mutation_hooks(
        &self,
        change_kind: ChangeKind,
        entity_type: &str,
        aspect_name: &str,
    ) -> RegistryResult<Vec<Scoped<dyn MutationHook>>> {
        Ok(in_scope(
            &self.mutation_hooks,
            change_kind,
            entity_type,
            aspect_name,
        ))
    }

    fn side_effects(&self) -> RegistryResult<Vec<Scoped<dyn SideEffect>>> {
        Ok(self.side_effects.clone())
    }
}

/// Programmatic registration of specs and plugins. Plugins keep the order
/// they were registered in.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    inner: InMemoryRegistry,
}

impl RegistryBuilder {
    pub fn entity(mut self, spec: EntitySpec) -> Self {
        for aspect in spec.aspects.values() {
            self.inner.aspects.insert(
                (spec.name.clone(), aspect.name.clone()),
                Arc::new(aspect.clone()),
            );
        }
        self.inner.entities.insert(spec.name.clone(), Arc::new(spec));
        self
    }

    pub fn validator(
        mut self,
        name: impl Into<String>,
        scope: PluginScope,
        plugin: Arc<dyn PayloadValidator>,
    ) -> Self {
        self.inner.validators.push(Scoped::new(name, scope, plugin));
        self
    }

    pub fn mutation_hook(
        mut self,
        name: impl Into<String>,
        scope: PluginScope,
        plugin: Arc<dyn MutationHook>,
    ) -> Self {
        self.inner.mutation_hooks.push(Scoped::new(name, scope, plugin));
        self
    }

    pub fn side_effect(
        mut self,
        name: impl Into<String>,
        scope: PluginScope,
        plugin: Arc<dyn SideEffect>,
    ) -> Self {
        self.inner.side_effects.push(Scoped::new(name, scope, plugin));
        self
    }

    pub fn build(self) -> InMemoryRegistry {
        self.inner
    }
}
