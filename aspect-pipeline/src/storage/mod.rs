mod memory;

pub use memory::MemoryAspectStore;

use aspect_models::{ChangeKind, LatestAspects, Urn, UrnAspectMap};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeSet;

use crate::item::UpsertItem;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Latest-state provider. One call per phase of a batch.
#[async_trait]
pub trait LatestAspectReader: Send + Sync {
    /// Stored values for the requested keys. Missing keys are absent from
    /// the result.
    async fn latest_aspects(
        &self,
        keys: &UrnAspectMap,
    ) -> StorageResult<LatestAspects>;

    /// Subset of `urns` that have at least one stored aspect.
    async fn existing_entities(
        &self,
        urns: &BTreeSet<Urn>,
    ) -> StorageResult<BTreeSet<Urn>>;
}

/// Durable sink for resolved batches.
#[async_trait]
pub trait AspectCommitter: Send + Sync {
    /// Applies `batch.items` in order.
    async fn commit(&self, batch: CommitBatch) -> StorageResult<CommitReceipt>;
}

/// Final ordered upserts of one batch and the aspects new to storage.
#[derive(Debug, Clone, Default)]
pub struct CommitBatch {
    pub items: Vec<UpsertItem>,
    pub delta: UrnAspectMap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommittedVersion {
    pub urn: Urn,
    pub aspect_name: String,
    pub change_kind: ChangeKind,
    /// None for tombstones.
    pub version: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitReceipt {
    pub versions: Vec<CommittedVersion>,
}

impl CommitReceipt {
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}
