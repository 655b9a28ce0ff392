use clap::Parser;
use std::process;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

use aspect_pipeline::cli::{self, AspectCli};

#[tokio::main]
async fn main() {
    init_log();
    let cli = AspectCli::parse();
    if let Err(e) = cli::run(cli).await {
        eprintln!("aspect-pipeline failed: {e:#}");
        process::exit(1);
    }
}

fn init_log() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("ASPECT_LOG")
                .from_env_lossy(),
        )
        .init();
}
