use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::stamp::{AuditStamp, SystemMetadata};
use crate::urn::Urn;

/// urn -> names of the aspects touched or known for that urn.
pub type UrnAspectMap = BTreeMap<Urn, BTreeSet<String>>;

/// urn -> aspect name -> value.
pub type NestedMap<T> = BTreeMap<Urn, BTreeMap<String, T>>;

/// Most recently committed value of one (urn, aspect).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestAspect {
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_metadata: Option<SystemMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_stamp: Option<AuditStamp>,
    #[serde(default)]
    pub version: u64,
}

impl LatestAspect {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            system_metadata: None,
            audit_stamp: None,
            version: 0,
        }
    }

    pub fn with_system_metadata(mut self, metadata: SystemMetadata) -> Self {
        self.system_metadata = Some(metadata);
        self
    }

    pub fn with_audit_stamp(mut self, stamp: AuditStamp) -> Self {
        self.audit_stamp = Some(stamp);
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }
}

/// Read-only view of stored state handed to the write pipeline for one
/// batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LatestAspects {
    inner: NestedMap<LatestAspect>,
}

impl LatestAspects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        urn: Urn,
        aspect_name: impl Into<String>,
        aspect: LatestAspect,
    ) {
        self.inner
            .entry(urn)
            .or_default()
            .insert(aspect_name.into(), aspect);
    }

    pub fn with(
        mut self,
        urn: Urn,
        aspect_name: impl Into<String>,
        aspect: LatestAspect,
    ) -> Self {
        self.insert(urn, aspect_name, aspect);
        self
    }

    pub fn get(&self, urn: &Urn, aspect_name: &str) -> Option<&LatestAspect> {
        self.inner.get(urn).and_then(|aspects| aspects.get(aspect_name))
    }

    pub fn contains(&self, urn: &Urn, aspect_name: &str) -> bool {
        self.get(urn, aspect_name).is_some()
    }

    /// True when the urn has at least one stored aspect.
    pub fn contains_urn(&self, urn: &Urn) -> bool {
        self.inner.get(urn).is_some_and(|aspects| !aspects.is_empty())
    }

    pub fn into_inner(self) -> NestedMap<LatestAspect> {
        self.inner
    }

    pub fn urn_aspect_map(&self) -> UrnAspectMap {
        self.inner
            .iter()
            .filter(|(_, aspects)| !aspects.is_empty())
            .map(|(urn, aspects)| {
                (urn.clone(), aspects.keys().cloned().collect())
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<NestedMap<LatestAspect>> for LatestAspects {
    fn from(inner: NestedMap<LatestAspect>) -> Self {
        Self { inner }
    }
}
