//! Write path of the entity-aspect metadata store: proposals in, validated
//! and stamped upserts out.

pub mod batch;
pub mod cli;
pub mod config;
pub mod error;
pub mod item;
pub mod mutation;
pub mod patch;
pub mod pipeline;
pub mod plugins;
pub mod registry;
pub mod side_effect;
pub mod storage;
pub mod system_metadata;
pub mod throttle;
pub mod validation;

pub use batch::{AspectsBatch, ResolvedBatch};
pub use config::{ConfigError, DuplicatePolicy, PipelineConfig, PipelineOptions};
pub use error::{DuplicateBatchItem, ItemError, ItemFailure, PipelineError};
pub use item::{
    BatchItem, ChangeItem, DeleteItem, ItemDraft, PatchItem, UpsertItem,
};
pub use pipeline::{AspectWritePipeline, BatchOutcome};
pub use registry::{
    ExtensionRegistry, InMemoryRegistry, PluginScope, RegistryConfig,
    RegistryError,
};
pub use storage::{
    AspectCommitter, CommitReceipt, LatestAspectReader, MemoryAspectStore,
    StorageError,
};
pub use throttle::{AdmissionThrottle, ThrottleConfig, ThrottlePolicy};
