use aspect_models::{ChangeKind, Urn, UrnError};
use serde::Serialize;
use std::time::Duration;

use crate::patch::PatchError;
use crate::registry::RegistryError;
use crate::storage::StorageError;
use crate::throttle::ThrottleExceeded;
use crate::validation::AspectValidationError;

/// Failure of a single change item. Never aborts sibling items, except
/// `RegistryUnavailable` which the batch engine escalates.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ItemError {
    #[error("Invalid urn: {0}")]
    InvalidUrn(String),

    #[error("Unresolved entity type: {0}")]
    UnresolvedEntityType(String),

    #[error("Unresolved aspect `{aspect}` for entity type `{entity_type}`")]
    UnresolvedAspect { entity_type: String, aspect: String },

    #[error("Change kind {kind} is not supported by aspect `{aspect}`")]
    UnsupportedChangeType { kind: ChangeKind, aspect: String },

    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("Failed to decode payload of aspect `{aspect}`: {reason}")]
    PayloadDecode { aspect: String, reason: String },

    #[error("Invalid record for aspect `{aspect}`: {reason}")]
    InvalidRecord { aspect: String, reason: String },

    #[error("Patch application failed: {0}")]
    PatchApplication(#[from] PatchError),

    #[error("Validation failed: {0}")]
    AspectValidation(#[from] AspectValidationError),

    #[error("Aspect `{aspect}` already exists for {urn}")]
    AspectAlreadyExists { urn: Urn, aspect: String },

    #[error("Entity already exists: {0}")]
    EntityAlreadyExists(Urn),

    #[error("Registry unavailable: {0}")]
    RegistryUnavailable(String),
}

impl ItemError {
    /// Stable code recorded in [`ItemFailure::error_kind`].
    pub fn kind(&self) -> &'static str {
        match self {
            ItemError::InvalidUrn(_) => "INVALID_URN",
            ItemError::UnresolvedEntityType(_) => "UNRESOLVED_ENTITY_TYPE",
            ItemError::UnresolvedAspect { .. } => "UNRESOLVED_ASPECT",
            ItemError::UnsupportedChangeType { .. } => {
                "UNSUPPORTED_CHANGE_TYPE"
            }
            ItemError::UnsupportedContentType(_) => "UNSUPPORTED_CONTENT_TYPE",
            ItemError::PayloadDecode { .. } => "PAYLOAD_DECODE",
            ItemError::InvalidRecord { .. } => "INVALID_RECORD",
            ItemError::PatchApplication(_) => "PATCH_APPLICATION",
            ItemError::AspectValidation(_) => "ASPECT_VALIDATION",
            ItemError::AspectAlreadyExists { .. } => "ASPECT_ALREADY_EXISTS",
            ItemError::EntityAlreadyExists(_) => "ENTITY_ALREADY_EXISTS",
            ItemError::RegistryUnavailable(_) => "REGISTRY_UNAVAILABLE",
        }
    }

    /// Splits off errors that fail the whole batch.
    pub(crate) fn escalate(self) -> Result<ItemError, PipelineError> {
        match self {
            ItemError::RegistryUnavailable(reason) => {
                Err(PipelineError::RegistryUnavailable(reason))
            }
            other => Ok(other),
        }
    }
}

impl From<UrnError> for ItemError {
    fn from(err: UrnError) -> Self {
        ItemError::InvalidUrn(err.to_string())
    }
}

impl From<RegistryError> for ItemError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnresolvedEntityType(name) => {
                ItemError::UnresolvedEntityType(name)
            }
            RegistryError::UnresolvedAspect {
                entity_type,
                aspect,
            } => ItemError::UnresolvedAspect {
                entity_type,
                aspect,
            },
            RegistryError::Unavailable(reason) => {
                ItemError::RegistryUnavailable(reason)
            }
        }
    }
}

/// Failure record of one submitted item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemFailure {
    /// Position of the item in the submitted batch.
    pub position: usize,
    pub urn: String,
    pub aspect_name: String,
    pub change_kind: ChangeKind,
    pub error_kind: &'static str,
    pub message: String,
    #[serde(skip)]
    pub error: ItemError,
}

impl ItemFailure {
    pub fn new(
        position: usize,
        urn: impl Into<String>,
        aspect_name: impl Into<String>,
        change_kind: ChangeKind,
        error: ItemError,
    ) -> Self {
        Self {
            position,
            urn: urn.into(),
            aspect_name: aspect_name.into(),
            change_kind,
            error_kind: error.kind(),
            message: error.to_string(),
            error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Duplicate batch item: positions {first} and {second} are equal")]
pub struct DuplicateBatchItem {
    pub first: usize,
    pub second: usize,
}

/// Failure of a whole batch. Nothing is committed.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Throttled(#[from] ThrottleExceeded),

    #[error(transparent)]
    DuplicateBatchItem(#[from] DuplicateBatchItem),

    #[error("Batch cancelled before commit")]
    Cancelled,
}

impl PipelineError {
    pub fn is_throttled(&self) -> bool {
        matches!(self, PipelineError::Throttled(_))
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PipelineError::Throttled(e) => Some(e.retry_after),
            _ => None,
        }
    }
}

impl From<RegistryError> for PipelineError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Unavailable(reason) => {
                PipelineError::RegistryUnavailable(reason)
            }
            other => PipelineError::RegistryUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_errors_map_to_item_errors() {
        let err: ItemError =
            RegistryError::UnresolvedEntityType("chart".into()).into();
        assert_eq!(err.kind(), "UNRESOLVED_ENTITY_TYPE");
        assert!(err.escalate().is_ok());

        let err: ItemError = RegistryError::Unavailable("down".into()).into();
        let escalated = err.escalate().unwrap_err();
        assert_eq!(escalated.to_string(), "Registry unavailable: down");
    }

    #[test]
    fn failure_records_kind_and_message() {
        let failure = ItemFailure::new(
            3,
            "urn:li:dataset:x",
            "status",
            ChangeKind::Upsert,
            ItemError::UnsupportedContentType("text/plain".into()),
        );
        assert_eq!(failure.error_kind, "UNSUPPORTED_CONTENT_TYPE");
        assert!(failure.message.contains("text/plain"));
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["position"], 3);
        assert!(json.get("error").is_none());
    }
}
