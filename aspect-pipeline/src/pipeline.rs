use aspect_models::{
    AspectClass, AspectProposal, AuditStamp, LatestAspects, Urn, UrnAspectMap,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::batch::{
    AspectsBatch, create_entity_urns, merge_nested, merge_urn_aspect_maps,
    new_urn_aspect_map, subtract_urn_aspect_map, urn_aspect_map,
};
use crate::config::{
    ConfigError, DuplicatePolicy, PipelineConfig, PipelineOptions,
};
use crate::error::{ItemFailure, PipelineError};
use crate::item::UpsertItem;
use crate::registry::{ExtensionRegistry, RegistryError};
use crate::side_effect::{apply_side_effects, finalize_side_effect_items};
use crate::storage::{
    AspectCommitter, CommitBatch, CommitReceipt, LatestAspectReader,
    MemoryAspectStore,
};
use crate::throttle::AdmissionThrottle;

/// Result of one committed batch. Partial success is explicit: `failures`
/// lists every submitted item that was not written.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Everything handed to storage, primary items first, then side-effect
    /// items.
    pub committed: Vec<UpsertItem>,
    pub side_effect_items: usize,
    pub delta: UrnAspectMap,
    pub failures: Vec<ItemFailure>,
    pub receipt: CommitReceipt,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Write path from proposals to committed upserts. Cheap to clone and safe
/// to share across tasks; batches are independent of each other.
#[derive(Clone)]
pub struct AspectWritePipeline {
    registry: Arc<dyn ExtensionRegistry>,
    reader: Arc<dyn LatestAspectReader>,
    committer: Arc<dyn AspectCommitter>,
    throttle: Arc<AdmissionThrottle>,
    options: Arc<PipelineOptions>,
}

impl AspectWritePipeline {
    pub fn new(
        registry: Arc<dyn ExtensionRegistry>,
        reader: Arc<dyn LatestAspectReader>,
        committer: Arc<dyn AspectCommitter>,
    ) -> Self {
        Self {
            registry,
            reader,
            committer,
            throttle: Arc::new(AdmissionThrottle::default()),
            options: Arc::new(PipelineOptions::default()),
        }
    }

    /// Reads and writes through the same in-memory store.
    pub fn with_store(
        registry: Arc<dyn ExtensionRegistry>,
        store: MemoryAspectStore,
    ) -> Self {
        let store = Arc::new(store);
        Self::new(registry, store.clone(), store)
    }

    pub fn with_throttle(mut self, throttle: Arc<AdmissionThrottle>) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = Arc::new(options);
        self
    }

    /// Applies throttle policy, duplicate policy and side-effect toggles
    /// from `config`.
    pub fn configure(
        self,
        config: &PipelineConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let throttle =
            Arc::new(AdmissionThrottle::new(config.throttle_policy()));
        Ok(self.with_throttle(throttle).with_options(config.options()?))
    }

    pub fn throttle(&self) -> &Arc<AdmissionThrottle> {
        &self.throttle
    }

    pub fn registry(&self) -> &Arc<dyn ExtensionRegistry> {
        &self.registry
    }

    /// Refuses the batch when a touched aspect class is over its backlog
    /// threshold. Names that do not resolve are left to item decoding.
    pub fn admit(
        &self,
        proposals: &[AspectProposal],
    ) -> Result<(), PipelineError> {
        let mut classes = BTreeSet::new();
        for proposal in proposals {
            if let Some(class) = self.aspect_class(proposal)? {
                classes.insert(class);
            }
        }
        self.throttle.check(classes)?;
        Ok(())
    }

    fn aspect_class(
        &self,
        proposal: &AspectProposal,
    ) -> Result<Option<AspectClass>, PipelineError> {
        let Ok(urn) = Urn::parse(proposal.entity_urn.as_str()) else {
            return Ok(None);
        };
        let resolved = self
            .registry
            .entity_spec(urn.entity_type())
            .and_then(|entity| {
                self.registry.aspect_spec(&entity, &proposal.aspect_name)
            });
        match resolved {
            Ok(aspect) => Ok(Some(aspect.class)),
            Err(RegistryError::Unavailable(reason)) => {
                Err(PipelineError::RegistryUnavailable(reason))
            }
            Err(_) => Ok(None),
        }
    }

    pub async fn ingest(
        &self,
        proposals: Vec<AspectProposal>,
        audit_stamp: AuditStamp,
    ) -> Result<BatchOutcome, PipelineError> {
        let token = CancellationToken::new();
        self.ingest_with_cancel(proposals, audit_stamp, token).await
    }

    /// Like [`ingest`](Self::ingest). Cancelling `token` before commit
    /// discards the batch with [`PipelineError::Cancelled`].
    pub async fn ingest_with_cancel(
        &self,
        proposals: Vec<AspectProposal>,
        audit_stamp: AuditStamp,
        token: CancellationToken,
    ) -> Result<BatchOutcome, PipelineError> {
        self.admit(&proposals)?;
        let submitted = proposals.len();
        let registry = self.registry.as_ref();

        let batch =
            AspectsBatch::from_proposals(proposals, &audit_stamp, registry)?;
        if let Some(dup) = batch.find_duplicate() {
            match self.options.duplicate_policy {
                DuplicatePolicy::Reject => return Err(dup.into()),
                DuplicatePolicy::Allow => {
                    debug!(
                        first = dup.first,
                        second = dup.second,
                        "duplicate items in batch"
                    );
                }
            }
        }

        let keys = batch.urn_aspect_map();
        let mut latest = self.read_latest(&keys, &token).await?;
        let entities = batch.create_entity_urns();
        let mut existing = self.read_existing(&entities, &token).await?;
        let resolved = batch.resolve(&latest, &existing, registry)?;

        let side_effects: Vec<_> = registry
            .side_effects()?
            .into_iter()
            .filter(|se| self.options.side_effects.is_enabled(&se.name))
            .collect();
        let produced: Vec<_> =
            apply_side_effects(&resolved.items, &side_effects, registry)
                .collect();

        // Second read for side-effect targets the first read did not cover.
        let derived: Vec<_> =
            produced.iter().filter_map(|r| r.as_ref().ok()).collect();
        let missing =
            subtract_urn_aspect_map(urn_aspect_map(derived.clone()), &keys);
        if !missing.is_empty() {
            let extra = self.read_latest(&missing, &token).await?;
            latest =
                merge_nested(extra.into_inner(), latest.into_inner()).into();
        }
        let unchecked: BTreeSet<Urn> = create_entity_urns(derived)
            .difference(&entities)
            .cloned()
            .collect();
        existing.extend(self.read_existing(&unchecked, &token).await?);
        let extra = finalize_side_effect_items(
            produced, &latest, &existing, registry,
        )?;

        let delta = merge_urn_aspect_maps(
            resolved.delta,
            new_urn_aspect_map(&latest.urn_aspect_map(), &extra),
        );
        let side_effect_items = extra.len();
        let mut committed = resolved.items;
        committed.extend(extra);

        if token.is_cancelled() {
            warn!(submitted, "batch cancelled before commit");
            return Err(PipelineError::Cancelled);
        }
        let receipt = if committed.is_empty() {
            CommitReceipt::default()
        } else {
            self.committer
                .commit(CommitBatch {
                    items: committed.clone(),
                    delta: delta.clone(),
                })
                .await?
        };
        info!(
            submitted,
            committed = committed.len(),
            side_effects = side_effect_items,
            failed = resolved.failures.len(),
            new_aspects = delta.values().map(|a| a.len()).sum::<usize>(),
            "batch committed"
        );
        Ok(BatchOutcome {
            committed,
            side_effect_items,
            delta,
            failures: resolved.failures,
            receipt,
        })
    }

    /// Retries admission refusals on the backoff schedule of the refused
    /// aspect class.
    pub async fn ingest_with_retry(
        &self,
        proposals: Vec<AspectProposal>,
        audit_stamp: AuditStamp,
        token: CancellationToken,
    ) -> Result<BatchOutcome, PipelineError> {
        let mut backoff = None;
        loop {
            let attempt = self
                .ingest_with_cancel(
                    proposals.clone(),
                    audit_stamp.clone(),
                    token.clone(),
                )
                .await;
            let exceeded = match attempt {
                Err(PipelineError::Throttled(e)) => e,
                other => return other,
            };
            let schedule = backoff.get_or_insert_with(|| {
                self.throttle.policy().for_class(exceeded.class).backoff()
            });
            let Some(delay) = schedule.next() else {
                return Err(exceeded.into());
            };
            warn!(
                class = %exceeded.class,
                ?delay,
                "batch throttled, backing off"
            );
            tokio::select! {
                _ = token.cancelled() => return Err(PipelineError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn read_latest(
        &self,
        keys: &UrnAspectMap,
        token: &CancellationToken,
    ) -> Result<LatestAspects, PipelineError> {
        if keys.is_empty() {
            return Ok(LatestAspects::new());
        }
        tokio::select! {
            _ = token.cancelled() => Err(PipelineError::Cancelled),
            latest = self.reader.latest_aspects(keys) => Ok(latest?),
        }
    }

    async fn read_existing(
        &self,
        urns: &BTreeSet<Urn>,
        token: &CancellationToken,
    ) -> Result<BTreeSet<Urn>, PipelineError> {
        if urns.is_empty() {
            return Ok(BTreeSet::new());
        }
        tokio::select! {
            _ = token.cancelled() => Err(PipelineError::Cancelled),
            existing = self.reader.existing_entities(urns) => Ok(existing?),
        }
    }
}
