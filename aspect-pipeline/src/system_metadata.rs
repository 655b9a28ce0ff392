use aspect_models::SystemMetadata;
use chrono::Utc;
use uuid::Uuid;

/// Fresh provenance record: random run id, observed now.
pub fn generate_system_metadata() -> SystemMetadata {
    SystemMetadata::new(Uuid::new_v4().to_string(), Utc::now())
}

/// Returns `current` untouched when it is non-empty. Otherwise synthesizes
/// a fresh record, keeping any producer properties already present.
pub fn generate_system_metadata_if_empty(
    current: Option<SystemMetadata>,
) -> SystemMetadata {
    match current {
        Some(metadata) if !metadata.is_empty() => metadata,
        Some(metadata) => SystemMetadata {
            properties: metadata.properties,
            ..generate_system_metadata()
        },
        None => generate_system_metadata(),
    }
}

/// In-place variant. Returns true when a record was synthesized.
pub fn ensure_system_metadata(metadata: &mut SystemMetadata) -> bool {
    if !metadata.is_empty() {
        return false;
    }
    let current = std::mem::take(metadata);
    *metadata = generate_system_metadata_if_empty(Some(current));
    true
}
