use aspect_models::LatestAspect;
use tracing::debug;

use crate::error::ItemError;
use crate::item::{BatchItem, UpsertItem};
use crate::registry::ExtensionRegistry;

/// Rejection raised by a payload validator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{validator} rejected the change: {reason}")]
pub struct AspectValidationError {
    pub validator: String,
    pub reason: String,
}

impl AspectValidationError {
    pub fn new(
        validator: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            validator: validator.into(),
            reason: reason.into(),
        }
    }

    /// Rejection without a validator name. The stage fills in the name the
    /// validator was registered under.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::new(String::new(), reason)
    }
}

/// Pre-commit check of one prospective upsert. Validators see the item and
/// its previous stored value only, never sibling items.
pub trait PayloadValidator: Send + Sync {
    fn validate_pre_commit(
        &self,
        item: &UpsertItem,
        previous: Option<&LatestAspect>,
        registry: &dyn ExtensionRegistry,
    ) -> Result<(), AspectValidationError>;
}

/// Runs every in-scope validator in registration order. The first rejection
/// short-circuits.
pub fn validate_pre_commit(
    item: &UpsertItem,
    previous: Option<&LatestAspect>,
    registry: &dyn ExtensionRegistry,
) -> Result<(), ItemError> {
    let validators = registry.validators(
        item.change_kind(),
        item.entity_type(),
        item.aspect_name(),
    )?;
    for validator in validators {
        if let Err(mut e) =
            validator.plugin.validate_pre_commit(item, previous, registry)
        {
            if e.validator.is_empty() {
                e.validator = validator.name.clone();
            }
            debug!(
                urn = %item.urn(),
                aspect = item.aspect_name(),
                validator = %validator.name,
                "item rejected: {}", e.reason
            );
            return Err(e.into());
        }
    }
    Ok(())
}
