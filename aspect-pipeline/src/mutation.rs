use aspect_models::{
    AspectSpec, AuditStamp, ChangeKind, EntitySpec, LatestAspect,
    SystemMetadata, Urn,
};
use serde_json::Value;
use tracing::debug;

use crate::error::ItemError;
use crate::item::{ItemHeader, UpsertItem};
use crate::registry::ExtensionRegistry;

/// Read-only context handed to a mutation hook.
#[derive(Debug, Clone, Copy)]
pub struct MutationInput<'a> {
    pub change_kind: ChangeKind,
    pub urn: &'a Urn,
    pub entity_spec: &'a EntitySpec,
    pub aspect_spec: &'a AspectSpec,
    pub audit_stamp: &'a AuditStamp,
    /// Stored value and metadata before this change, if any.
    pub previous: Option<&'a LatestAspect>,
}

impl MutationInput<'_> {
    pub fn old_value(&self) -> Option<&Value> {
        self.previous.map(|p| &p.value)
    }

    pub fn old_system_metadata(&self) -> Option<&SystemMetadata> {
        self.previous.and_then(|p| p.system_metadata.as_ref())
    }
}

/// Rewrites the record and system metadata of one prospective upsert.
/// Hooks must be deterministic and touch only what they are given.
pub trait MutationHook: Send + Sync {
    /// Returns true when anything was changed.
    fn apply_mutation(
        &self,
        input: &MutationInput<'_>,
        record: &mut Value,
        system_metadata: &mut SystemMetadata,
    ) -> bool;
}

/// Runs every in-scope hook in registration order.
pub fn apply_mutation_hooks(
    item: &mut UpsertItem,
    previous: Option<&LatestAspect>,
    registry: &dyn ExtensionRegistry,
) -> Result<(), ItemError> {
    let UpsertItem {
        header,
        change_kind,
        record,
    } = item;
    let hooks = registry.mutation_hooks(
        *change_kind,
        header.urn.entity_type(),
        &header.aspect_name,
    )?;
    if hooks.is_empty() {
        return Ok(());
    }
    let ItemHeader {
        urn,
        aspect_name,
        entity_spec,
        aspect_spec,
        audit_stamp,
        system_metadata,
        ..
    } = header;
    let input = MutationInput {
        change_kind: *change_kind,
        urn,
        entity_spec: &**entity_spec,
        aspect_spec: &**aspect_spec,
        audit_stamp,
        previous,
    };
    for hook in hooks {
        if hook.plugin.apply_mutation(&input, record, system_metadata) {
            debug!(
                %urn,
                aspect = %aspect_name,
                hook = %hook.name,
                "item mutated"
            );
        }
    }
    Ok(())
}
