use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::enums::ChangeKind;
use crate::stamp::SystemMetadata;
use crate::urn::Urn;

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Serialized aspect or patch document as it arrives on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericPayload {
    #[serde(with = "utf8_bytes")]
    pub value: Vec<u8>,
    pub content_type: String,
}

impl GenericPayload {
    pub fn json(value: &Value) -> Self {
        Self {
            value: value.to_string().into_bytes(),
            content_type: JSON_CONTENT_TYPE.to_string(),
        }
    }
}

/// A proposed change to one aspect of one entity, before any resolution
/// against the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AspectProposal {
    pub entity_urn: String,
    pub entity_type: String,
    pub aspect_name: String,
    pub change_kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect: Option<GenericPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_metadata: Option<SystemMetadata>,
}

impl AspectProposal {
    pub fn new(
        urn: &Urn,
        aspect_name: impl Into<String>,
        change_kind: ChangeKind,
    ) -> Self {
        Self {
            entity_urn: urn.to_string(),
            entity_type: urn.entity_type().to_string(),
            aspect_name: aspect_name.into(),
            change_kind,
            aspect: None,
            system_metadata: None,
        }
    }

    /// Full-record proposal for UPSERT/CREATE kinds, or a patch document
    /// for PATCH.
    pub fn json(
        urn: &Urn,
        aspect_name: impl Into<String>,
        change_kind: ChangeKind,
        value: &Value,
    ) -> Self {
        Self::new(urn, aspect_name, change_kind)
            .with_payload(GenericPayload::json(value))
    }

    pub fn upsert(
        urn: &Urn,
        aspect_name: impl Into<String>,
        value: &Value,
    ) -> Self {
        Self::json(urn, aspect_name, ChangeKind::Upsert, value)
    }

    pub fn patch(
        urn: &Urn,
        aspect_name: impl Into<String>,
        ops: &Value,
    ) -> Self {
        Self::json(urn, aspect_name, ChangeKind::Patch, ops)
    }

    pub fn delete(urn: &Urn, aspect_name: impl Into<String>) -> Self {
        Self::new(urn, aspect_name, ChangeKind::Delete)
    }

    pub fn with_payload(mut self, payload: GenericPayload) -> Self {
        self.aspect = Some(payload);
        self
    }

    pub fn with_system_metadata(mut self, metadata: SystemMetadata) -> Self {
        self.system_metadata = Some(metadata);
        self
    }
}

/// Payload bytes travel as a UTF-8 string inside JSON documents.
mod utf8_bytes {
    use serde::{Deserialize, Deserializer, Serializer, ser};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let text = std::str::from_utf8(bytes).map_err(ser::Error::custom)?;
        serializer.serialize_str(text)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        Ok(text.into_bytes())
    }
}
