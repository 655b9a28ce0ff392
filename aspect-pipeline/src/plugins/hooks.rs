use aspect_models::SystemMetadata;
use serde_json::{Map, Value, json};

use crate::mutation::{MutationHook, MutationInput};

/// Writes the change's audit stamp (`{actor, time}`) into a record field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvenanceStampHook {
    field: String,
}

impl ProvenanceStampHook {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl MutationHook for ProvenanceStampHook {
    fn apply_mutation(
        &self,
        input: &MutationInput<'_>,
        record: &mut Value,
        _system_metadata: &mut SystemMetadata,
    ) -> bool {
        let Some(fields) = record.as_object_mut() else {
            return false;
        };
        let stamp = json!({
            "actor": input.audit_stamp.actor.as_str(),
            "time": input.audit_stamp.time.to_rfc3339(),
        });
        fields.insert(self.field.clone(), stamp);
        true
    }
}

/// Fills fields absent from the new record with configured values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DefaultFieldsHook {
    defaults: Map<String, Value>,
}

impl DefaultFieldsHook {
    pub fn new(defaults: Map<String, Value>) -> Self {
        Self { defaults }
    }
}

impl MutationHook for DefaultFieldsHook {
    fn apply_mutation(
        &self,
        _input: &MutationInput<'_>,
        record: &mut Value,
        _system_metadata: &mut SystemMetadata,
    ) -> bool {
        let Some(fields) = record.as_object_mut() else {
            return false;
        };
        let mut changed = false;
        for (key, value) in &self.defaults {
            if !fields.contains_key(key) {
                fields.insert(key.clone(), value.clone());
                changed = true;
            }
        }
        changed
    }
}
