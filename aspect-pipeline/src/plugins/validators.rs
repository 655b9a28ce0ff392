use aspect_models::LatestAspect;

use crate::item::UpsertItem;
use crate::registry::ExtensionRegistry;
use crate::validation::{AspectValidationError, PayloadValidator};

/// Rejects a change of `field` once the aspect has a stored value for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImmutableFieldValidator {
    field: String,
}

impl ImmutableFieldValidator {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl PayloadValidator for ImmutableFieldValidator {
    fn validate_pre_commit(
        &self,
        item: &UpsertItem,
        previous: Option<&LatestAspect>,
        _registry: &dyn ExtensionRegistry,
    ) -> Result<(), AspectValidationError> {
        if item.is_tombstone() {
            return Ok(());
        }
        let Some(old) = previous.and_then(|p| p.value.get(&self.field)) else {
            return Ok(());
        };
        match item.record().get(&self.field) {
            Some(new) if new == old => Ok(()),
            _ => Err(AspectValidationError::rejected(format!(
                "field `{}` is immutable",
                self.field
            ))),
        }
    }
}

/// Rejects records where any configured field is missing or null.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredFieldsValidator {
    fields: Vec<String>,
}

impl RequiredFieldsValidator {
    pub fn new<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl PayloadValidator for RequiredFieldsValidator {
    fn validate_pre_commit(
        &self,
        item: &UpsertItem,
        _previous: Option<&LatestAspect>,
        _registry: &dyn ExtensionRegistry,
    ) -> Result<(), AspectValidationError> {
        if item.is_tombstone() {
            return Ok(());
        }
        let record = item.record();
        let missing: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| record.get(f.as_str()).is_none_or(|v| v.is_null()))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AspectValidationError::rejected(format!(
                "missing value for {}",
                missing.join(", ")
            )))
        }
    }
}
