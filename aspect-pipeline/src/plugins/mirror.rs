use aspect_models::Urn;
use std::iter;

use crate::error::ItemError;
use crate::item::{BatchItem, UpsertItem};
use crate::registry::ExtensionRegistry;
use crate::side_effect::{SideEffect, SideEffectItems};

/// Copies in-scope upserts onto a sibling urn obtained by replacing a
/// fragment of the source urn, e.g. `,PROD)` with `,DEV)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorAspectSideEffect {
    from: String,
    to: String,
}

impl MirrorAspectSideEffect {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn mirror_urn(&self, urn: &Urn) -> Option<String> {
        let raw = urn.as_str();
        (!self.from.is_empty() && raw.contains(&self.from))
            .then(|| raw.replace(&self.from, &self.to))
    }
}

impl SideEffect for MirrorAspectSideEffect {
    fn apply_item<'a>(
        &'a self,
        item: &'a UpsertItem,
        registry: &'a dyn ExtensionRegistry,
    ) -> SideEffectItems<'a> {
        if item.is_tombstone() {
            return Box::new(iter::empty());
        }
        let Some(target) = self.mirror_urn(item.urn()) else {
            return Box::new(iter::empty());
        };
        let mirrored = Urn::parse(target)
            .map_err(ItemError::from)
            .and_then(|urn| item.derive_for(urn, registry));
        Box::new(iter::once(mirrored))
    }
}
