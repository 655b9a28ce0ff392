//! Side effects derive additional upserts from a resolved batch. They run
//! exactly once per batch, over the primary items only.

use aspect_models::{LatestAspects, Urn};
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use tracing::warn;

use crate::batch::{check_create, prepare_for_commit};
use crate::config::ConfigError;
use crate::error::{ItemError, PipelineError};
use crate::item::{BatchItem, UpsertItem};
use crate::registry::{ExtensionRegistry, Scoped};

/// Lazily produced additional items.
pub type SideEffectItems<'a> =
    Box<dyn Iterator<Item = Result<UpsertItem, ItemError>> + 'a>;

pub trait SideEffect: Send + Sync {
    /// Items derived from one in-scope primary item.
    fn apply_item<'a>(
        &'a self,
        item: &'a UpsertItem,
        registry: &'a dyn ExtensionRegistry,
    ) -> SideEffectItems<'a>;
}

/// Per side effect on/off switches. Side effects that are not listed are
/// enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SideEffectToggles {
    toggles: HashMap<String, bool>,
}

impl SideEffectToggles {
    pub fn set(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.toggles.insert(name.into(), enabled);
        self
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.toggles.get(name).copied().unwrap_or(true)
    }
}

impl FromStr for SideEffectToggles {
    type Err = ConfigError;

    /// Parses `name=true,other=false`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut toggles = HashMap::new();
        for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((name, value)) = pair.split_once('=') else {
                return Err(ConfigError::ValidationError(format!(
                    "Side effect toggle `{pair}` must be name=true|false"
                )));
            };
            let enabled = value.trim().parse::<bool>().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "Side effect toggle `{pair}` must be name=true|false"
                ))
            })?;
            toggles.insert(name.trim().to_string(), enabled);
        }
        Ok(Self { toggles })
    }
}

/// Runs each side effect over the in-scope items of `items`. The result is
/// the flat concatenation of every side effect's output, evaluated lazily.
pub fn apply_side_effects<'a>(
    items: &'a [UpsertItem],
    side_effects: &'a [Scoped<dyn SideEffect>],
    registry: &'a dyn ExtensionRegistry,
) -> impl Iterator<Item = Result<UpsertItem, ItemError>> + 'a {
    side_effects.iter().flat_map(move |side_effect| {
        items
            .iter()
            .filter(move |item| {
                side_effect.scope.matches(
                    item.change_kind(),
                    item.entity_type(),
                    item.aspect_name(),
                )
            })
            .flat_map(move |item| side_effect.plugin.apply_item(item, registry))
    })
}

/// Checks CREATE kinds, then validates, mutates and stamps side-effect
/// output against the latest state. Failed items are dropped and logged;
/// only an unavailable registry fails the batch.
pub fn finalize_side_effect_items(
    produced: Vec<Result<UpsertItem, ItemError>>,
    latest: &LatestAspects,
    existing: &BTreeSet<Urn>,
    registry: &dyn ExtensionRegistry,
) -> Result<Vec<UpsertItem>, PipelineError> {
    let mut items = Vec::with_capacity(produced.len());
    for result in produced {
        let prepared = result.and_then(|item| {
            check_create(&item, latest, existing)?;
            let previous = latest.get(item.urn(), item.aspect_name());
            prepare_for_commit(item, previous, registry)
        });
        match prepared {
            Ok(item) => items.push(item),
            Err(e) => {
                let e = e.escalate()?;
                warn!(kind = e.kind(), "dropping side effect item: {e}");
            }
        }
    }
    Ok(items)
}
