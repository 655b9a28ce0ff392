//! Batch aggregation: classification, duplicate detection, resolution of
//! patches and deletes against the latest state, and urn/aspect diffing.

use aspect_models::{
    AspectProposal, AuditStamp, ChangeKind, LatestAspect, LatestAspects,
    NestedMap, Urn, UrnAspectMap,
};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::error::{
    DuplicateBatchItem, ItemError, ItemFailure, PipelineError,
};
use crate::item::{BatchItem, ChangeItem, UpsertItem};
use crate::mutation::apply_mutation_hooks;
use crate::patch::resolve_patch;
use crate::registry::ExtensionRegistry;
use crate::validation::validate_pre_commit;

/// Ordered change items of one submission, with the failures found while
/// decoding it.
#[derive(Debug, Clone, Default)]
pub struct AspectsBatch {
    /// (submission position, item)
    items: Vec<(usize, ChangeItem)>,
    rejected: Vec<ItemFailure>,
}

/// Outcome of [`AspectsBatch::resolve`].
#[derive(Debug, Clone, Default)]
pub struct ResolvedBatch {
    /// Aspects that are new relative to the snapshot.
    pub delta: UrnAspectMap,
    /// Surviving items in submission order.
    pub items: Vec<UpsertItem>,
    /// Decode and resolution failures ordered by position.
    pub failures: Vec<ItemFailure>,
}

impl AspectsBatch {
    pub fn new(items: Vec<ChangeItem>) -> Self {
        Self {
            items: items.into_iter().enumerate().collect(),
            rejected: Vec::new(),
        }
    }

    /// Decodes every proposal. Undecodable proposals are recorded as
    /// failures; an unavailable registry fails the whole batch.
    pub fn from_proposals(
        proposals: Vec<AspectProposal>,
        audit_stamp: &AuditStamp,
        registry: &dyn ExtensionRegistry,
    ) -> Result<Self, PipelineError> {
        let mut batch = Self::default();
        for (position, proposal) in proposals.into_iter().enumerate() {
            let urn = proposal.entity_urn.clone();
            let aspect_name = proposal.aspect_name.clone();
            let change_kind = proposal.change_kind;
            let decoded = ChangeItem::from_proposal(
                proposal,
                audit_stamp.clone(),
                registry,
            );
            match decoded {
                Ok(item) => batch.items.push((position, item)),
                Err(e) => {
                    let e = e.escalate()?;
                    debug!(position, %urn, "proposal rejected: {e}");
                    batch.rejected.push(ItemFailure::new(
                        position,
                        urn,
                        aspect_name,
                        change_kind,
                        e,
                    ));
                }
            }
        }
        Ok(batch)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> impl Iterator<Item = &ChangeItem> {
        self.items.iter().map(|(_, item)| item)
    }

    pub fn rejected(&self) -> &[ItemFailure] {
        &self.rejected
    }

    /// First pair of items that are equal by value, by submission position.
    pub fn find_duplicate(&self) -> Option<DuplicateBatchItem> {
        let mut seen: HashMap<String, usize> = HashMap::new();
        for (position, item) in &self.items {
            if let Some(first) = seen.insert(item.duplicate_key(), *position) {
                return Some(DuplicateBatchItem {
                    first,
                    second: *position,
                });
            }
        }
        None
    }

    pub fn contains_duplicates(&self) -> bool {
        self.find_duplicate().is_some()
    }

    pub fn urn_aspect_map(&self) -> UrnAspectMap {
        urn_aspect_map(self.items())
    }

    /// Urns targeted by CREATE_ENTITY items.
    pub fn create_entity_urns(&self) -> BTreeSet<Urn> {
        create_entity_urns(self.items())
    }

    /// Resolves every item against `latest` in submission order: patches
    /// are applied, deletes become tombstones, and each resulting upsert is
    /// validated, mutated and stamped. Failed items are dropped and
    /// recorded; siblings continue.
    ///
    /// `existing` holds the CREATE_ENTITY target urns that already have
    /// stored aspects.
    pub fn resolve(
        self,
        latest: &LatestAspects,
        existing: &BTreeSet<Urn>,
        registry: &dyn ExtensionRegistry,
    ) -> Result<ResolvedBatch, PipelineError> {
        let mut failures = self.rejected;
        let mut items = Vec::with_capacity(self.items.len());
        for (position, item) in self.items {
            let urn = item.urn().to_string();
            let aspect_name = item.aspect_name().to_string();
            let change_kind = item.change_kind();
            match resolve_item(item, latest, existing, registry) {
                Ok(Some(upsert)) => items.push(upsert),
                Ok(None) => {
                    debug!(
                        position,
                        %urn,
                        aspect = %aspect_name,
                        "delete of absent aspect skipped"
                    );
                }
                Err(e) => {
                    let e = e.escalate()?;
                    debug!(
                        position,
                        %urn,
                        aspect = %aspect_name,
                        "item failed: {e}"
                    );
                    failures.push(ItemFailure::new(
                        position,
                        urn,
                        aspect_name,
                        change_kind,
                        e,
                    ));
                }
            }
        }
        failures.sort_by_key(|f| f.position);
        let delta = new_urn_aspect_map(&latest.urn_aspect_map(), &items);
        Ok(ResolvedBatch {
            delta,
            items,
            failures,
        })
    }
}

/// Turns one change item into its final upsert, or `None` when there is
/// nothing to write.
fn resolve_item(
    item: ChangeItem,
    latest: &LatestAspects,
    existing: &BTreeSet<Urn>,
    registry: &dyn ExtensionRegistry,
) -> Result<Option<UpsertItem>, ItemError> {
    let previous = latest.get(item.urn(), item.aspect_name());
    let upsert = match item {
        ChangeItem::Upsert(upsert) => {
            check_create(&upsert, latest, existing)?;
            upsert
        }
        ChangeItem::Patch(patch) => resolve_patch(patch, previous)?,
        ChangeItem::Delete(delete) => match previous {
            Some(_) => delete.into_tombstone(),
            None => return Ok(None),
        },
    };
    prepare_for_commit(upsert, previous, registry).map(Some)
}

/// CREATE needs the aspect to be absent, CREATE_ENTITY needs the whole
/// entity to be absent from storage.
pub(crate) fn check_create(
    item: &UpsertItem,
    latest: &LatestAspects,
    existing: &BTreeSet<Urn>,
) -> Result<(), ItemError> {
    match item.change_kind() {
        ChangeKind::Create
            if latest.contains(item.urn(), item.aspect_name()) =>
        {
            Err(ItemError::AspectAlreadyExists {
                urn: item.urn().clone(),
                aspect: item.aspect_name().to_string(),
            })
        }
        ChangeKind::CreateEntity
            if existing.contains(item.urn())
                || latest.contains_urn(item.urn()) =>
        {
            Err(ItemError::EntityAlreadyExists(item.urn().clone()))
        }
        _ => Ok(()),
    }
}

/// Validation, then mutation, then system-metadata stamping.
pub(crate) fn prepare_for_commit(
    mut item: UpsertItem,
    previous: Option<&LatestAspect>,
    registry: &dyn ExtensionRegistry,
) -> Result<UpsertItem, ItemError> {
    validate_pre_commit(&item, previous, registry)?;
    apply_mutation_hooks(&mut item, previous, registry)?;
    item.ensure_system_metadata();
    Ok(item)
}

/// urn -> aspect names touched by `items`.
pub fn urn_aspect_map<'a, T>(
    items: impl IntoIterator<Item = &'a T>,
) -> UrnAspectMap
where
    T: BatchItem + 'a,
{
    let mut map = UrnAspectMap::new();
    for item in items {
        map.entry(item.urn().clone())
            .or_default()
            .insert(item.aspect_name().to_string());
    }
    map
}

/// Urns of the CREATE_ENTITY items among `items`.
pub fn create_entity_urns<'a, T>(
    items: impl IntoIterator<Item = &'a T>,
) -> BTreeSet<Urn>
where
    T: BatchItem + 'a,
{
    items
        .into_iter()
        .filter(|item| item.change_kind() == ChangeKind::CreateEntity)
        .map(|item| item.urn().clone())
        .collect()
}

/// Aspects touched by `items` that `existing` does not know yet. Urns whose
/// aspects are all known are left out.
pub fn new_urn_aspect_map<'a, T>(
    existing: &UrnAspectMap,
    items: impl IntoIterator<Item = &'a T>,
) -> UrnAspectMap
where
    T: BatchItem + 'a,
{
    subtract_urn_aspect_map(urn_aspect_map(items), existing)
}

/// Entries of `map` that are absent from `existing`.
pub fn subtract_urn_aspect_map(
    map: UrnAspectMap,
    existing: &UrnAspectMap,
) -> UrnAspectMap {
    map.into_iter()
        .filter_map(|(urn, aspects)| {
            let fresh: BTreeSet<String> = match existing.get(&urn) {
                Some(known) => aspects.difference(known).cloned().collect(),
                None => aspects,
            };
            (!fresh.is_empty()).then_some((urn, fresh))
        })
        .collect()
}

/// Union of two urn/aspect maps.
pub fn merge_urn_aspect_maps(
    mut a: UrnAspectMap,
    b: UrnAspectMap,
) -> UrnAspectMap {
    for (urn, aspects) in b {
        a.entry(urn).or_default().extend(aspects);
    }
    a
}

/// Merges two urn -> aspect -> value maps. `b` wins when both hold the same
/// (urn, aspect).
pub fn merge_nested<T>(mut a: NestedMap<T>, b: NestedMap<T>) -> NestedMap<T> {
    for (urn, aspects) in b {
        a.entry(urn).or_default().extend(aspects);
    }
    a
}
