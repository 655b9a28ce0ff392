use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::urn::Urn;

/// Who made a change and when.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuditStamp {
    pub actor: Urn,
    pub time: DateTime<Utc>,
}

impl AuditStamp {
    pub fn new(actor: Urn, time: DateTime<Utc>) -> Self {
        Self { actor, time }
    }

    pub fn now(actor: Urn) -> Self {
        Self::new(actor, Utc::now())
    }
}

/// Run and ingestion provenance stamped on every committed aspect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_observed: Option<DateTime<Utc>>,
    /// Producer trace properties (pipeline name, client version, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl SystemMetadata {
    pub fn new(
        run_id: impl Into<String>,
        last_observed: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id: Some(run_id.into()),
            last_observed: Some(last_observed),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// No run id and no observation time.
    pub fn is_empty(&self) -> bool {
        self.run_id.is_none() && self.last_observed.is_none()
    }
}
