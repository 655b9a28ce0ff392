use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use validator::{Validate, ValidationErrors};

use crate::enums::{AspectClass, ChangeKind};

fn all_change_kinds() -> BTreeSet<ChangeKind> {
    ChangeKind::ALL.into_iter().collect()
}

fn empty_record() -> Value {
    Value::Object(Default::default())
}

/// Schema-level description of one aspect of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AspectSpec {
    #[validate(length(min = 1, message = "Aspect name cannot be empty"))]
    pub name: String,
    #[serde(default)]
    pub class: AspectClass,
    #[serde(default = "all_change_kinds")]
    pub supported_changes: BTreeSet<ChangeKind>,
    #[serde(default)]
    pub required_fields: Vec<String>,
    /// Base record a patch is applied to when nothing is stored yet.
    #[serde(default = "empty_record")]
    pub default_value: Value,
}

impl AspectSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class: AspectClass::Versioned,
            supported_changes: all_change_kinds(),
            required_fields: Vec::new(),
            default_value: empty_record(),
        }
    }

    pub fn with_class(mut self, class: AspectClass) -> Self {
        self.class = class;
        self
    }

    pub fn with_supported_changes(
        mut self,
        kinds: impl IntoIterator<Item = ChangeKind>,
    ) -> Self {
        self.supported_changes = kinds.into_iter().collect();
        self
    }

    pub fn with_required_fields<S: Into<String>>(
        mut self,
        fields: impl IntoIterator<Item = S>,
    ) -> Self {
        self.required_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_default_value(mut self, value: Value) -> Self {
        self.default_value = value;
        self
    }

    pub fn supports(&self, kind: ChangeKind) -> bool {
        self.supported_changes.contains(&kind)
    }

    /// Structural check of a full record against this aspect.
    pub fn check_record(&self, record: &Value) -> Result<(), String> {
        let Some(fields) = record.as_object() else {
            return Err(format!(
                "expected a JSON object, got {}",
                json_type_name(record)
            ));
        };
        let missing: Vec<&str> = self
            .required_fields
            .iter()
            .filter(|f| !fields.contains_key(f.as_str()))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!("missing required field(s): {}", missing.join(", ")))
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EntitySpec {
    #[validate(length(min = 1, message = "Entity name cannot be empty"))]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_aspect: Option<String>,
    #[serde(default, with = "aspect_list")]
    pub aspects: BTreeMap<String, AspectSpec>,
}

impl EntitySpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_aspect: None,
            aspects: BTreeMap::new(),
        }
    }

    pub fn with_key_aspect(mut self, aspect: impl Into<String>) -> Self {
        self.key_aspect = Some(aspect.into());
        self
    }

    pub fn with_aspect(mut self, aspect: AspectSpec) -> Self {
        self.aspects.insert(aspect.name.clone(), aspect);
        self
    }

    pub fn aspect(&self, name: &str) -> Option<&AspectSpec> {
        self.aspects.get(name)
    }

    /// Validates the entity and every aspect it declares.
    pub fn validate_all(&self) -> Result<(), ValidationErrors> {
        self.validate()?;
        for aspect in self.aspects.values() {
            aspect.validate()?;
        }
        Ok(())
    }
}

/// Aspects are keyed by name in memory but listed in documents.
mod aspect_list {
    use super::AspectSpec;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S>(
        aspects: &BTreeMap<String, AspectSpec>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(aspects.values())
    }

    pub fn deserialize<'de, D>(
        deserializer: D,
    ) -> Result<BTreeMap<String, AspectSpec>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let list = Vec::<AspectSpec>::deserialize(deserializer)?;
        Ok(list.into_iter().map(|a| (a.name.clone(), a)).collect())
    }
}
