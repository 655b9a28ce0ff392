use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const URN_SCHEME: &str = "urn";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrnError {
    #[error("Urn must start with `urn:`: {0}")]
    MissingScheme(String),

    #[error("Urn is missing namespace, entity type or id: {0}")]
    Incomplete(String),
}

/// Globally unique entity identifier of the form
/// `urn:<namespace>:<entityType>:<id>`.
///
/// The id part is opaque and may itself contain `:` (nested urns such as
/// `urn:li:dataset:(urn:li:dataPlatform:hive,db.table,PROD)`).
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct Urn(String);

impl Urn {
    pub fn parse(raw: impl Into<String>) -> Result<Self, UrnError> {
        let raw = raw.into();
        let mut parts = raw.splitn(4, ':');
        if parts.next() != Some(URN_SCHEME) {
            return Err(UrnError::MissingScheme(raw));
        }
        let complete = parts.take(3).filter(|p| !p.is_empty()).count() == 3;
        if !complete {
            return Err(UrnError::Incomplete(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn namespace(&self) -> &str {
        self.segment(1)
    }

    pub fn entity_type(&self) -> &str {
        self.segment(2)
    }

    pub fn id(&self) -> &str {
        self.segment(3)
    }

    fn segment(&self, idx: usize) -> &str {
        self.0.splitn(4, ':').nth(idx).unwrap_or_default()
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Urn {
    type Err = UrnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Urn {
    type Error = UrnError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Urn> for String {
    fn from(value: Urn) -> Self {
        value.0
    }
}

impl AsRef<str> for Urn {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
