//! evalforge CLI entry point.
//!
//! Initializes logging, loads configuration and samples, and runs one
//! evaluation batch to completion.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use evalforge::checkpoint::CheckpointStore;
use evalforge::llm::CompletionClient;
use evalforge::pipeline::{load_samples, Config, Pipeline};

/// Launch an evaluation run.
#[derive(Debug, Parser)]
#[command(name = "evalforge", version, about)]
struct Cli {
    /// Path to the JSON configuration with models and scorers.
    #[arg(long)]
    config_path: PathBuf,

    /// Path to the folder of JSONL sample files.
    #[arg(long)]
    sample_path: PathBuf,

    /// Folder the runs are saved under.
    #[arg(long, default_value = "runs")]
    run_path: PathBuf,

    /// Name of the run; results land in a folder of this name.
    #[arg(long)]
    name: String,

    /// Maximum number of samples read per sample file.
    #[arg(long, default_value_t = usize::MAX)]
    max_samples_per_task: usize,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, default_value = "info", env = "EVALFORGE_LOG")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > --log-level CLI arg > default "info"
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone());
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)))
        .init();

    let run_root = cli.run_path.join(&cli.name);
    std::fs::create_dir_all(&run_root)
        .with_context(|| format!("creating run directory {}", run_root.display()))?;

    let config = Config::load(&cli.config_path).context("loading configuration")?;
    let samples =
        load_samples(&cli.sample_path, cli.max_samples_per_task).context("loading samples")?;
    anyhow::ensure!(!samples.is_empty(), "no samples found under {}", cli.sample_path.display());

    let backend = Arc::new(CompletionClient::from_env().context("configuring completion client")?);
    let store = CheckpointStore::new(run_root);

    let mut pipeline = Pipeline::new(config, store, backend);
    let summary = pipeline.run(samples).await?;

    println!(
        "Run '{}' finished in {}: {}/{} completions",
        cli.name,
        summary.elapsed,
        summary.snapshot.current,
        summary.snapshot.total
    );
    println!("{}", serde_json::to_string_pretty(&summary.snapshot)?);

    Ok(())
}
