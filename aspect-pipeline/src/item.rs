//! Change items: one proposed change to one (entity, aspect) pair.
//!
//! Items are only constructed through the validating factories in this
//! module, so holding one means its urn, entity type, aspect and change
//! kind all resolved against the registry.

use aspect_models::{
    AspectProposal, AspectSpec, AuditStamp, ChangeKind, EntitySpec,
    GenericPayload, JSON_CONTENT_TYPE, SystemMetadata, Urn,
};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::error::ItemError;
use crate::patch::JsonPatch;
use crate::registry::ExtensionRegistry;
use crate::system_metadata::{
    ensure_system_metadata, generate_system_metadata_if_empty,
};

/// Accessors shared by every change item variant.
pub trait BatchItem {
    fn urn(&self) -> &Urn;
    fn aspect_name(&self) -> &str;
    fn change_kind(&self) -> ChangeKind;

    fn entity_type(&self) -> &str {
        self.urn().entity_type()
    }
}

/// Fields common to every variant.
#[derive(Debug, Clone)]
pub struct ItemHeader {
    pub(crate) urn: Urn,
    pub(crate) aspect_name: String,
    pub(crate) entity_spec: Arc<EntitySpec>,
    pub(crate) aspect_spec: Arc<AspectSpec>,
    pub(crate) audit_stamp: AuditStamp,
    pub(crate) system_metadata: SystemMetadata,
    pub(crate) proposal: Option<Arc<AspectProposal>>,
}

impl ItemHeader {
    /// Resolves entity and aspect specs for `urn`.
    pub(crate) fn resolve(
        urn: Urn,
        aspect_name: impl Into<String>,
        audit_stamp: AuditStamp,
        system_metadata: Option<SystemMetadata>,
        registry: &dyn ExtensionRegistry,
    ) -> Result<Self, ItemError> {
        let aspect_name = aspect_name.into();
        let entity_spec = registry.entity_spec(urn.entity_type())?;
        let aspect_spec = registry.aspect_spec(&entity_spec, &aspect_name)?;
        Ok(Self {
            urn,
            aspect_name,
            entity_spec,
            aspect_spec,
            audit_stamp,
            system_metadata: generate_system_metadata_if_empty(system_metadata),
            proposal: None,
        })
    }

    pub fn urn(&self) -> &Urn {
        &self.urn
    }

    pub fn aspect_name(&self) -> &str {
        &self.aspect_name
    }

    pub fn entity_spec(&self) -> &EntitySpec {
        &self.entity_spec
    }

    pub fn aspect_spec(&self) -> &AspectSpec {
        &self.aspect_spec
    }

    pub fn audit_stamp(&self) -> &AuditStamp {
        &self.audit_stamp
    }

    pub fn system_metadata(&self) -> &SystemMetadata {
        &self.system_metadata
    }

    /// The wire proposal this item was decoded from, if any.
    pub fn proposal(&self) -> Option<&AspectProposal> {
        self.proposal.as_deref()
    }
}

/// Inputs shared by the validating factories.
#[derive(Debug, Clone)]
pub struct ItemDraft {
    pub urn: Urn,
    pub aspect_name: String,
    pub audit_stamp: AuditStamp,
    pub system_metadata: Option<SystemMetadata>,
}

impl ItemDraft {
    pub fn new(
        urn: Urn,
        aspect_name: impl Into<String>,
        audit_stamp: AuditStamp,
    ) -> Self {
        Self {
            urn,
            aspect_name: aspect_name.into(),
            audit_stamp,
            system_metadata: None,
        }
    }

    pub fn with_system_metadata(mut self, metadata: SystemMetadata) -> Self {
        self.system_metadata = Some(metadata);
        self
    }

    fn resolve(
        self,
        registry: &dyn ExtensionRegistry,
    ) -> Result<ItemHeader, ItemError> {
        ItemHeader::resolve(
            self.urn,
            self.aspect_name,
            self.audit_stamp,
            self.system_metadata,
            registry,
        )
    }
}

/// A change carrying a fully resolved record. The only form handed to
/// storage. Tombstones are upsert items of kind DELETE with a null record.
#[derive(Debug, Clone)]
pub struct UpsertItem {
    pub(crate) header: ItemHeader,
    pub(crate) change_kind: ChangeKind,
    pub(crate) record: Value,
}

impl UpsertItem {
    /// Validating factory for full-record changes (UPSERT, CREATE,
    /// CREATE_ENTITY).
    pub fn build(
        draft: ItemDraft,
        change_kind: ChangeKind,
        record: Value,
        registry: &dyn ExtensionRegistry,
    ) -> Result<Self, ItemError> {
        if !change_kind.carries_record() {
            return Err(ItemError::UnsupportedChangeType {
                kind: change_kind,
                aspect: draft.aspect_name,
            });
        }
        let header = draft.resolve(registry)?;
        Self::from_header(header, change_kind, record)
    }

    /// Checks the record against the aspect schema unless the item is a
    /// tombstone.
    pub(crate) fn from_header(
        header: ItemHeader,
        change_kind: ChangeKind,
        record: Value,
    ) -> Result<Self, ItemError> {
        if change_kind != ChangeKind::Delete {
            header.aspect_spec.check_record(&record).map_err(|reason| {
                ItemError::InvalidRecord {
                    aspect: header.aspect_name.clone(),
                    reason,
                }
            })?;
        }
        Ok(Self {
            header,
            change_kind,
            record,
        })
    }

    pub fn header(&self) -> &ItemHeader {
        &self.header
    }

    pub fn record(&self) -> &Value {
        &self.record
    }

    pub fn system_metadata(&self) -> &SystemMetadata {
        &self.header.system_metadata
    }

    pub fn audit_stamp(&self) -> &AuditStamp {
        &self.header.audit_stamp
    }

    pub fn aspect_spec(&self) -> &AspectSpec {
        &self.header.aspect_spec
    }

    pub fn is_tombstone(&self) -> bool {
        self.change_kind == ChangeKind::Delete
    }

    /// Re-stamps system metadata if a hook emptied it. No-op otherwise.
    pub fn ensure_system_metadata(&mut self) -> bool {
        ensure_system_metadata(&mut self.header.system_metadata)
    }

    /// Same record and provenance on another urn, checked against the
    /// registry like any new item.
    pub fn derive_for(
        &self,
        urn: Urn,
        registry: &dyn ExtensionRegistry,
    ) -> Result<Self, ItemError> {
        let draft = ItemDraft::new(
            urn,
            self.header.aspect_name.clone(),
            self.header.audit_stamp.clone(),
        )
        .with_system_metadata(self.header.system_metadata.clone());
        Self::build(draft, self.change_kind, self.record.clone(), registry)
    }

    pub fn into_record(self) -> Value {
        self.record
    }
}

impl PartialEq for UpsertItem {
    fn eq(&self, other: &Self) -> bool {
        self.header.urn == other.header.urn
            && self.header.aspect_name == other.header.aspect_name
            && self.change_kind == other.change_kind
            && self.record == other.record
            && self.header.system_metadata == other.header.system_metadata
    }
}

#[derive(Debug, Clone)]
pub struct PatchItem {
    pub(crate) header: ItemHeader,
    pub(crate) patch: JsonPatch,
}

impl PatchItem {
    pub fn build(
        draft: ItemDraft,
        patch: JsonPatch,
        registry: &dyn ExtensionRegistry,
    ) -> Result<Self, ItemError> {
        let header = draft.resolve(registry)?;
        Ok(Self { header, patch })
    }

    pub fn header(&self) -> &ItemHeader {
        &self.header
    }

    pub fn patch(&self) -> &JsonPatch {
        &self.patch
    }

    pub(crate) fn into_parts(self) -> (ItemHeader, JsonPatch) {
        (self.header, self.patch)
    }
}

impl PartialEq for PatchItem {
    fn eq(&self, other: &Self) -> bool {
        self.header.urn == other.header.urn
            && self.header.aspect_name == other.header.aspect_name
            && self.patch == other.patch
            && self.header.system_metadata == other.header.system_metadata
    }
}

#[derive(Debug, Clone)]
pub struct DeleteItem {
    pub(crate) header: ItemHeader,
}

impl DeleteItem {
    pub fn build(
        draft: ItemDraft,
        registry: &dyn ExtensionRegistry,
    ) -> Result<Self, ItemError> {
        let header = draft.resolve(registry)?;
        Ok(Self { header })
    }

    pub fn header(&self) -> &ItemHeader {
        &self.header
    }

    /// Tombstone upsert for an aspect that has a stored value.
    pub(crate) fn into_tombstone(self) -> UpsertItem {
        UpsertItem {
            header: self.header,
            change_kind: ChangeKind::Delete,
            record: Value::Null,
        }
    }
}

impl PartialEq for DeleteItem {
    fn eq(&self, other: &Self) -> bool {
        self.header.urn == other.header.urn
            && self.header.aspect_name == other.header.aspect_name
            && self.header.system_metadata == other.header.system_metadata
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeItem {
    Upsert(UpsertItem),
    Patch(PatchItem),
    Delete(DeleteItem),
}

impl ChangeItem {
    /// Decodes a wire proposal into a change item.
    pub fn from_proposal(
        proposal: AspectProposal,
        audit_stamp: AuditStamp,
        registry: &dyn ExtensionRegistry,
    ) -> Result<Self, ItemError> {
        let urn = Urn::parse(proposal.entity_urn.as_str())?;
        if !proposal.entity_type.is_empty()
            && proposal.entity_type != urn.entity_type()
        {
            return Err(ItemError::InvalidUrn(format!(
                "entity type `{}` does not match urn {urn}",
                proposal.entity_type
            )));
        }
        let mut header = ItemHeader::resolve(
            urn,
            proposal.aspect_name.as_str(),
            audit_stamp,
            proposal.system_metadata.clone(),
            registry,
        )?;
        let kind = proposal.change_kind;
        if !header.aspect_spec.supports(kind) {
            return Err(ItemError::UnsupportedChangeType {
                kind,
                aspect: header.aspect_name,
            });
        }

        let item = match kind {
            ChangeKind::Upsert
            | ChangeKind::Create
            | ChangeKind::CreateEntity => {
                let record =
                    decode_payload(&header, proposal.aspect.as_ref())?;
                header.proposal = Some(Arc::new(proposal));
                let upsert = UpsertItem::from_header(header, kind, record)?;
                ChangeItem::Upsert(upsert)
            }
            ChangeKind::Patch => {
                let ops = decode_payload(&header, proposal.aspect.as_ref())?;
                let patch = JsonPatch::from_value(ops)?;
                header.proposal = Some(Arc::new(proposal));
                ChangeItem::Patch(PatchItem { header, patch })
            }
            ChangeKind::Delete => {
                header.proposal = Some(Arc::new(proposal));
                ChangeItem::Delete(DeleteItem { header })
            }
        };
        Ok(item)
    }

    pub fn header(&self) -> &ItemHeader {
        match self {
            ChangeItem::Upsert(item) => &item.header,
            ChangeItem::Patch(item) => &item.header,
            ChangeItem::Delete(item) => &item.header,
        }
    }

    fn header_mut(&mut self) -> &mut ItemHeader {
        match self {
            ChangeItem::Upsert(item) => &mut item.header,
            ChangeItem::Patch(item) => &mut item.header,
            ChangeItem::Delete(item) => &mut item.header,
        }
    }

    pub fn system_metadata(&self) -> &SystemMetadata {
        &self.header().system_metadata
    }

    /// Stamps fresh system metadata when the item carries none. Calling it
    /// again is a no-op.
    pub fn ensure_system_metadata(&mut self) -> bool {
        ensure_system_metadata(&mut self.header_mut().system_metadata)
    }

    /// Canonical rendering of the fields that define item equality.
    pub(crate) fn duplicate_key(&self) -> String {
        let (kind, value) = match self {
            ChangeItem::Upsert(item) => (item.change_kind, item.record.clone()),
            ChangeItem::Patch(item) => (
                ChangeKind::Patch,
                serde_json::to_value(&item.patch).unwrap_or(Value::Null),
            ),
            ChangeItem::Delete(_) => (ChangeKind::Delete, Value::Null),
        };
        let header = self.header();
        json!([
            header.urn.as_str(),
            header.aspect_name,
            kind.as_str(),
            value,
            header.system_metadata,
        ])
        .to_string()
    }
}

fn decode_payload(
    header: &ItemHeader,
    payload: Option<&GenericPayload>,
) -> Result<Value, ItemError> {
    let Some(payload) = payload else {
        return Err(ItemError::PayloadDecode {
            aspect: header.aspect_name.clone(),
            reason: "missing payload".to_string(),
        });
    };
    if !payload.content_type.eq_ignore_ascii_case(JSON_CONTENT_TYPE) {
        return Err(ItemError::UnsupportedContentType(
            payload.content_type.clone(),
        ));
    }
    serde_json::from_slice(&payload.value).map_err(|e| {
        ItemError::PayloadDecode {
            aspect: header.aspect_name.clone(),
            reason: e.to_string(),
        }
    })
}

impl BatchItem for UpsertItem {
    fn urn(&self) -> &Urn {
        &self.header.urn
    }

    fn aspect_name(&self) -> &str {
        &self.header.aspect_name
    }

    fn change_kind(&self) -> ChangeKind {
        self.change_kind
    }
}

impl BatchItem for PatchItem {
    fn urn(&self) -> &Urn {
        &self.header.urn
    }

    fn aspect_name(&self) -> &str {
        &self.header.aspect_name
    }

    fn change_kind(&self) -> ChangeKind {
        ChangeKind::Patch
    }
}

impl BatchItem for DeleteItem {
    fn urn(&self) -> &Urn {
        &self.header.urn
    }

    fn aspect_name(&self) -> &str {
        &self.header.aspect_name
    }

    fn change_kind(&self) -> ChangeKind {
        ChangeKind::Delete
    }
}

impl BatchItem for ChangeItem {
    fn urn(&self) -> &Urn {
        &self.header().urn
    }

    fn aspect_name(&self) -> &str {
        &self.header().aspect_name
    }

    fn change_kind(&self) -> ChangeKind {
        match self {
            ChangeItem::Upsert(item) => item.change_kind,
            ChangeItem::Patch(_) => ChangeKind::Patch,
            ChangeItem::Delete(_) => ChangeKind::Delete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRegistry;
    use aspect_models::AspectSpec;
    use serde_json::json;

    fn registry() -> InMemoryRegistry {
        InMemoryRegistry::builder()
            .entity(
                EntitySpec::new("dataset")
                    .with_aspect(
                        AspectSpec::new("status")
                            .with_required_fields(["removed"]),
                    )
                    .with_aspect(
                        AspectSpec::new("datasetProfile")
                            .with_supported_changes([ChangeKind::Upsert]),
                    ),
            )
            .build()
    }

    fn urn() -> Urn {
        Urn::parse("urn:li:dataset:(urn:li:dataPlatform:hive,t,PROD)").unwrap()
    }

    fn audit() -> AuditStamp {
        AuditStamp::now(Urn::parse("urn:li:corpuser:tester").unwrap())
    }

    #[test]
    fn builds_upsert_with_generated_metadata() {
        let item = UpsertItem::build(
            ItemDraft::new(urn(), "status", audit()),
            ChangeKind::Upsert,
            json!({ "removed": false }),
            &registry(),
        )
        .unwrap();
        assert!(!item.system_metadata().is_empty());
        assert_eq!(item.entity_type(), "dataset");
        assert!(item.header().proposal().is_none());
    }

    #[test]
    fn supplied_metadata_is_used_as_is() {
        let meta = SystemMetadata::new("run-7", chrono::Utc::now());
        let item = UpsertItem::build(
            ItemDraft::new(urn(), "status", audit())
                .with_system_metadata(meta.clone()),
            ChangeKind::Upsert,
            json!({ "removed": true }),
            &registry(),
        )
        .unwrap();
        assert_eq!(item.system_metadata(), &meta);
    }

    #[test]
    fn construction_rejects_unresolved_names() {
        let chart = Urn::parse("urn:li:chart:x").unwrap();
        let err = DeleteItem::build(
            ItemDraft::new(chart, "status", audit()),
            &registry(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "UNRESOLVED_ENTITY_TYPE");

        let err = DeleteItem::build(
            ItemDraft::new(urn(), "schemaMetadata", audit()),
            &registry(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "UNRESOLVED_ASPECT");
    }

    #[test]
    fn record_must_match_aspect_schema() {
        let err = UpsertItem::build(
            ItemDraft::new(urn(), "status", audit()),
            ChangeKind::Upsert,
            json!({}),
            &registry(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "INVALID_RECORD");
    }

    #[test]
    fn proposal_decodes_by_change_kind() {
        let registry = registry();
        let upsert = AspectProposal::upsert(
            &urn(),
            "status",
            &json!({ "removed": true }),
        );
        let item =
            ChangeItem::from_proposal(upsert, audit(), &registry).unwrap();
        assert!(matches!(item, ChangeItem::Upsert(_)));
        assert!(item.header().proposal().is_some());

        let patch = AspectProposal::patch(
            &urn(),
            "status",
            &json!([{ "op": "replace", "path": "/removed", "value": true }]),
        );
        let item =
            ChangeItem::from_proposal(patch, audit(), &registry).unwrap();
        assert_eq!(item.change_kind(), ChangeKind::Patch);

        let delete = AspectProposal::delete(&urn(), "status");
        let item =
            ChangeItem::from_proposal(delete, audit(), &registry).unwrap();
        assert_eq!(item.change_kind(), ChangeKind::Delete);
    }

    #[test]
    fn proposal_errors_are_typed() {
        let registry = registry();
        let mut bad_urn = AspectProposal::delete(&urn(), "status");
        bad_urn.entity_urn = "dataset:x".into();

        let mut mismatched = AspectProposal::delete(&urn(), "status");
        mismatched.entity_type = "chart".into();

        let unsupported = AspectProposal::delete(&urn(), "datasetProfile");

        let mut text = AspectProposal::upsert(&urn(), "status", &json!({}));
        if let Some(payload) = text.aspect.as_mut() {
            payload.content_type = "text/plain".into();
        }

        let garbage = AspectProposal::new(&urn(), "status", ChangeKind::Upsert)
            .with_payload(GenericPayload {
                value: b"{oops".to_vec(),
                content_type: JSON_CONTENT_TYPE.into(),
            });

        let bad_patch =
            AspectProposal::patch(&urn(), "status", &json!({ "op": 1 }));

        let cases = [
            (bad_urn, "INVALID_URN"),
            (mismatched, "INVALID_URN"),
            (unsupported, "UNSUPPORTED_CHANGE_TYPE"),
            (text, "UNSUPPORTED_CONTENT_TYPE"),
            (garbage, "PAYLOAD_DECODE"),
            (bad_patch, "PATCH_APPLICATION"),
        ];
        for (proposal, kind) in cases {
            let err = ChangeItem::from_proposal(proposal, audit(), &registry)
                .unwrap_err();
            assert_eq!(err.kind(), kind, "{err}");
        }
    }

    #[test]
    fn equality_covers_value_fields() {
        let registry = registry();
        let meta = SystemMetadata::new("run-1", chrono::Utc::now());
        let build = |removed: bool| {
            UpsertItem::build(
                ItemDraft::new(urn(), "status", audit())
                    .with_system_metadata(meta.clone()),
                ChangeKind::Upsert,
                json!({ "removed": removed }),
                &registry,
            )
            .unwrap()
        };
        assert_eq!(build(true), build(true));
        assert_ne!(build(true), build(false));
        assert_eq!(
            ChangeItem::Upsert(build(true)).duplicate_key(),
            ChangeItem::Upsert(build(true)).duplicate_key()
        );
    }
}
