//! Command-line driver: runs a batch file through an in-memory pipeline.

use anyhow::Context;
use aspect_models::{
    AspectProposal, AuditStamp, ChangeKind, LatestAspects, SystemMetadata, Urn,
    UrnAspectMap,
};
use clap_stdin::FileOrStdin;
use envconfig::Envconfig;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::error::ItemFailure;
use crate::item::{BatchItem, UpsertItem};
use crate::pipeline::{AspectWritePipeline, BatchOutcome};
use crate::registry::{InMemoryRegistry, RegistryConfig};
use crate::storage::{CommitReceipt, MemoryAspectStore};

#[derive(clap::Parser, Clone, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct AspectCli {
    #[command(subcommand)]
    pub command: AspectCommands,
}

#[derive(clap::Subcommand, Clone, Debug)]
pub enum AspectCommands {
    /// Run a batch of proposals through the write pipeline
    #[clap(aliases = &["ingest", "r"])]
    Resolve {
        /// Registry document with entities and plugins
        #[arg(short, long)]
        registry: PathBuf,
        /// JSON array of proposals, `-` for stdin
        #[arg(short, long, default_value = "-")]
        batch: FileOrStdin,
        /// Latest state to seed the store with (urn -> aspect -> aspect)
        #[arg(short, long)]
        state: Option<PathBuf>,
        /// Actor recorded in the audit stamp
        #[arg(short, long, default_value = "urn:li:corpuser:system")]
        actor: Urn,
        #[arg(long)]
        pretty: bool,
    },
    /// Validate a registry document
    Check {
        #[arg(short, long)]
        registry: PathBuf,
    },
}

pub async fn run(cli: AspectCli) -> anyhow::Result<()> {
    match cli.command {
        AspectCommands::Resolve {
            registry,
            batch,
            state,
            actor,
            pretty,
        } => {
            let registry = load_registry(&registry)?;
            let reader = batch
                .into_reader()
                .context("failed to open batch input")?;
            let proposals: Vec<AspectProposal> = serde_json::from_reader(reader)
                .context("batch is not a JSON array of proposals")?;
            let store = match state {
                Some(path) => MemoryAspectStore::seeded(load_state(&path)?),
                None => MemoryAspectStore::new(),
            };
            let config = PipelineConfig::init_from_env()?;
            debug!("use pipeline config: {:?}", config);
            let pipeline =
                AspectWritePipeline::with_store(Arc::new(registry), store)
                    .configure(&config)?;
            let outcome =
                pipeline.ingest(proposals, AuditStamp::now(actor)).await?;
            let report = OutcomeReport::from(&outcome);
            let out = if pretty {
                serde_json::to_string_pretty(&report)?
            } else {
                serde_json::to_string(&report)?
            };
            println!("{out}");
        }
        AspectCommands::Check { registry } => {
            let registry = load_registry(&registry)?;
            let mut entities: Vec<_> = registry.entity_names().collect();
            entities.sort_unstable();
            println!(
                "registry ok: {} entities ({}), {} plugins",
                entities.len(),
                entities.join(", "),
                registry.plugin_count()
            );
        }
    }
    Ok(())
}

fn load_registry(path: &Path) -> anyhow::Result<InMemoryRegistry> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config = RegistryConfig::from_slice(&bytes)?;
    Ok(InMemoryRegistry::from_config(config)?)
}

fn load_state(path: &Path) -> anyhow::Result<LatestAspects> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("invalid state document {}", path.display()))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CommittedAspect<'a> {
    urn: &'a Urn,
    aspect_name: &'a str,
    change_kind: ChangeKind,
    record: &'a Value,
    system_metadata: &'a SystemMetadata,
}

impl<'a> From<&'a UpsertItem> for CommittedAspect<'a> {
    fn from(item: &'a UpsertItem) -> Self {
        Self {
            urn: item.urn(),
            aspect_name: item.aspect_name(),
            change_kind: item.change_kind(),
            record: item.record(),
            system_metadata: item.system_metadata(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutcomeReport<'a> {
    committed: Vec<CommittedAspect<'a>>,
    side_effect_items: usize,
    delta: &'a UrnAspectMap,
    failures: &'a [ItemFailure],
    receipt: &'a CommitReceipt,
}

impl<'a> From<&'a BatchOutcome> for OutcomeReport<'a> {
    fn from(outcome: &'a BatchOutcome) -> Self {
        Self {
            committed: outcome.committed.iter().map(Into::into).collect(),
            side_effect_items: outcome.side_effect_items,
            delta: &outcome.delta,
            failures: &outcome.failures,
            receipt: &outcome.receipt,
        }
    }
}
