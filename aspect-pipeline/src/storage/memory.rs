use aspect_models::{
    LatestAspect, LatestAspects, NestedMap, Urn, UrnAspectMap,
};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    AspectCommitter, CommitBatch, CommitReceipt, CommittedVersion,
    LatestAspectReader, StorageResult,
};
use crate::item::BatchItem;

type MemoryStore = Arc<RwLock<NestedMap<LatestAspect>>>;

/// Last-write-wins aspect store. Versions start at 0 and grow by one per
/// committed write; tombstones remove the aspect.
#[derive(Debug, Clone, Default)]
pub struct MemoryAspectStore {
    store: MemoryStore,
}

impl MemoryAspectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(state: LatestAspects) -> Self {
        Self {
            store: Arc::new(RwLock::new(state.into_inner())),
        }
    }

    pub async fn get(
        &self,
        urn: &Urn,
        aspect_name: &str,
    ) -> Option<LatestAspect> {
        let store = self.store.read().await;
        store.get(urn).and_then(|a| a.get(aspect_name)).cloned()
    }

    pub async fn snapshot(&self) -> LatestAspects {
        let store = self.store.read().await;
        LatestAspects::from(store.clone())
    }

    pub async fn len(&self) -> usize {
        let store = self.store.read().await;
        store.values().map(|a| a.len()).sum()
    }
}

#[async_trait]
impl LatestAspectReader for MemoryAspectStore {
    async fn latest_aspects(
        &self,
        keys: &UrnAspectMap,
    ) -> StorageResult<LatestAspects> {
        let store = self.store.read().await;
        let mut latest = LatestAspects::new();
        for (urn, names) in keys {
            let Some(stored) = store.get(urn) else {
                continue;
            };
            for name in names {
                if let Some(aspect) = stored.get(name) {
                    latest.insert(urn.clone(), name.clone(), aspect.clone());
                }
            }
        }
        Ok(latest)
    }

    async fn existing_entities(
        &self,
        urns: &BTreeSet<Urn>,
    ) -> StorageResult<BTreeSet<Urn>> {
        let store = self.store.read().await;
        Ok(urns
            .iter()
            .filter(|urn| store.get(*urn).is_some_and(|a| !a.is_empty()))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AspectCommitter for MemoryAspectStore {
    async fn commit(&self, batch: CommitBatch) -> StorageResult<CommitReceipt> {
        let mut store = self.store.write().await;
        let mut receipt = CommitReceipt::default();
        for item in batch.items {
            let urn = item.urn().clone();
            let aspect_name = item.aspect_name().to_string();
            let change_kind = item.change_kind();
            let version = if item.is_tombstone() {
                if let Some(aspects) = store.get_mut(&urn) {
                    aspects.remove(&aspect_name);
                    if aspects.is_empty() {
                        store.remove(&urn);
                    }
                }
                None
            } else {
                let aspects = store.entry(urn.clone()).or_default();
                let version = aspects
                    .get(&aspect_name)
                    .map(|current| current.version + 1)
                    .unwrap_or(0);
                let system_metadata = item.system_metadata().clone();
                let audit_stamp = item.audit_stamp().clone();
                let stored = LatestAspect::new(item.into_record())
                    .with_system_metadata(system_metadata)
                    .with_audit_stamp(audit_stamp)
                    .with_version(version);
                aspects.insert(aspect_name.clone(), stored);
                Some(version)
            };
            debug!(%urn, aspect = %aspect_name, ?version, "aspect committed");
            receipt.versions.push(CommittedVersion {
                urn,
                aspect_name,
                change_kind,
                version,
            });
        }
        Ok(receipt)
    }
}
