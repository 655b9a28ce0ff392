#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use aspect_models::{
    AspectClass, AspectSpec, AuditStamp, ChangeKind, EntitySpec, LatestAspect,
    LatestAspects, SystemMetadata, Urn,
};
use aspect_pipeline::mutation::MutationHook;
use aspect_pipeline::plugins::{
    MirrorAspectSideEffect, ProvenanceStampHook, RequiredFieldsValidator,
};
use aspect_pipeline::registry::{
    ExtensionRegistry, InMemoryRegistry, PluginScope, RegistryBuilder,
    RegistryError, RegistryResult, Scoped,
};
use aspect_pipeline::side_effect::SideEffect;
use aspect_pipeline::validation::PayloadValidator;
use aspect_pipeline::{AspectWritePipeline, MemoryAspectStore};
use chrono::{TimeZone, Utc};
use serde_json::json;

pub const PROD_ORDERS: &str =
    "urn:li:dataset:(urn:li:dataPlatform:hive,db.orders,PROD)";
pub const DEV_ORDERS: &str =
    "urn:li:dataset:(urn:li:dataPlatform:hive,db.orders,DEV)";
pub const PROD_USERS: &str =
    "urn:li:dataset:(urn:li:dataPlatform:hive,db.users,PROD)";

pub fn urn(raw: &str) -> Urn {
    Urn::parse(raw).unwrap()
}

pub fn actor() -> Urn {
    urn("urn:li:corpuser:ingestion")
}

pub fn audit() -> AuditStamp {
    let time = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    AuditStamp::new(actor(), time)
}

pub fn run_metadata(run_id: &str) -> SystemMetadata {
    let observed = Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap();
    SystemMetadata::new(run_id, observed)
}

pub fn dataset_entity() -> EntitySpec {
    EntitySpec::new("dataset")
        .with_key_aspect("datasetKey")
        .with_aspect(
            AspectSpec::new("status").with_required_fields(["removed"]),
        )
        .with_aspect(
            AspectSpec::new("ownership")
                .with_default_value(json!({ "owners": [] })),
        )
        .with_aspect(AspectSpec::new("globalTags"))
        .with_aspect(
            AspectSpec::new("datasetProfile")
                .with_class(AspectClass::Timeseries)
                .with_supported_changes([ChangeKind::Upsert]),
        )
}

pub fn corpuser_entity() -> EntitySpec {
    EntitySpec::new("corpuser").with_aspect(AspectSpec::new("corpUserInfo"))
}

pub fn base_registry() -> RegistryBuilder {
    InMemoryRegistry::builder()
        .entity(dataset_entity())
        .entity(corpuser_entity())
}

pub fn registry() -> Arc<InMemoryRegistry> {
    Arc::new(base_registry().build())
}

/// Mirrors PROD ownership and tag upserts onto the DEV sibling, requires
/// owners on ownership and stamps tags with their provenance.
pub fn plugin_registry() -> Arc<InMemoryRegistry> {
    Arc::new(
        base_registry()
            .side_effect(
                "mirror-dev",
                PluginScope::for_aspect("dataset", "ownership")
                    .with_operations([ChangeKind::Upsert, ChangeKind::Patch]),
                Arc::new(MirrorAspectSideEffect::new(",PROD)", ",DEV)")),
            )
            .validator(
                "owners-required",
                PluginScope::for_aspect("dataset", "ownership"),
                Arc::new(RequiredFieldsValidator::new(["owners"])),
            )
            .mutation_hook(
                "tag-provenance",
                PluginScope::for_aspect("dataset", "globalTags"),
                Arc::new(ProvenanceStampHook::new("lastModified")),
            )
            .build(),
    )
}

/// Latest state: PROD orders has status and ownership, DEV orders exists
/// with status only.
pub fn seeded_state() -> LatestAspects {
    LatestAspects::new()
        .with(
            urn(PROD_ORDERS),
            "status",
            LatestAspect::new(json!({ "removed": false }))
                .with_system_metadata(run_metadata("seed"))
                .with_version(3),
        )
        .with(
            urn(PROD_ORDERS),
            "ownership",
            LatestAspect::new(json!({ "owners": ["urn:li:corpuser:alice"] }))
                .with_system_metadata(run_metadata("seed"))
                .with_version(1),
        )
        .with(
            urn(DEV_ORDERS),
            "status",
            LatestAspect::new(json!({ "removed": false })).with_version(0),
        )
}

pub fn pipeline(
    registry: Arc<dyn ExtensionRegistry>,
    state: LatestAspects,
) -> (AspectWritePipeline, MemoryAspectStore) {
    let store = MemoryAspectStore::seeded(state);
    (AspectWritePipeline::with_store(registry, store.clone()), store)
}

/// Registry wrapper whose lookups start failing once switched off.
pub struct FlakyRegistry {
    inner: Arc<InMemoryRegistry>,
    available: AtomicBool,
}

impl FlakyRegistry {
    pub fn new(inner: Arc<InMemoryRegistry>) -> Self {
        Self {
            inner,
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> RegistryResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RegistryError::Unavailable("schema service offline".into()))
        }
    }
}

impl ExtensionRegistry for FlakyRegistry {
    fn entity_spec(
        &self,
        entity_type: &str,
    ) -> RegistryResult<Arc<EntitySpec>> {
        self.check()?;
        self.inner.entity_spec(entity_type)
    }

    fn aspect_spec(
        &self,
        entity: &EntitySpec,
        aspect_name: &str,
    ) -> RegistryResult<Arc<AspectSpec>> {
        self.check()?;
        self.inner.aspect_spec(entity, aspect_name)
    }

    fn validators(
        &self,
        change_kind: ChangeKind,
        entity_type: &str,
        aspect_name: &str,
    ) -> RegistryResult<Vec<Scoped<dyn PayloadValidator>>> {
        self.check()?;
        self.inner.validators(change_kind, entity_type, aspect_name)
    }

    fn mutation_hooks(
        &self,
        change_kind: ChangeKind,
        entity_type: &str,
        aspect_name: &str,
    ) -> RegistryResult<Vec<Scoped<dyn MutationHook>>> {
        self.check()?;
        self.inner.mutation_hooks(change_kind, entity_type, aspect_name)
    }

    fn side_effects(&self) -> RegistryResult<Vec<Scoped<dyn SideEffect>>> {
        self.check()?;
        self.inner.side_effects()
    }
}
