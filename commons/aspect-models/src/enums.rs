use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Operation requested by a change proposal.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
pub enum ChangeKind {
    #[serde(rename = "UPSERT")]
    Upsert,
    /// Upsert that only succeeds when the aspect does not exist yet.
    #[serde(rename = "CREATE")]
    Create,
    /// Upsert that only succeeds when the entity has no aspects yet.
    #[serde(rename = "CREATE_ENTITY")]
    CreateEntity,
    #[serde(rename = "PATCH")]
    Patch,
    #[serde(rename = "DELETE")]
    Delete,
}

impl ChangeKind {
    pub const ALL: [ChangeKind; 5] = [
        ChangeKind::Upsert,
        ChangeKind::Create,
        ChangeKind::CreateEntity,
        ChangeKind::Patch,
        ChangeKind::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Upsert => "UPSERT",
            ChangeKind::Create => "CREATE",
            ChangeKind::CreateEntity => "CREATE_ENTITY",
            ChangeKind::Patch => "PATCH",
            ChangeKind::Delete => "DELETE",
        }
    }

    /// Kinds whose payload is a complete record.
    pub fn carries_record(&self) -> bool {
        matches!(
            self,
            ChangeKind::Upsert | ChangeKind::Create | ChangeKind::CreateEntity
        )
    }
}

impl Default for ChangeKind {
    fn default() -> Self {
        Self::Upsert
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown change kind: {0}")]
pub struct UnknownChangeKind(pub String);

impl FromStr for ChangeKind {
    type Err = UnknownChangeKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChangeKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownChangeKind(s.to_string()))
    }
}

/// Storage class of an aspect. Admission throttling is tracked per class.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AspectClass {
    Versioned,
    Timeseries,
}

impl Default for AspectClass {
    fn default() -> Self {
        Self::Versioned
    }
}

impl fmt::Display for AspectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AspectClass::Versioned => f.write_str("versioned"),
            AspectClass::Timeseries => f.write_str("timeseries"),
        }
    }
}
