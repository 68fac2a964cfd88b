//! # export-runner - One-Shot Batch Export
//!
//! Runs a single export batch against the staging cache and exits:
//!
//! - `0` - every subtree exported
//! - `1` - at least one subtree failed (summary on stderr)
//! - `2` - another exporter holds the cache lock; retry later
//!
//! ```bash
//! export-runner --config sync.yml
//! ```

use anyhow::Result;
use bsync_cache::default_handler_configs;
use bsync_core::{ExportError, SyncConfig};
use bsync_export::storage::storage_from_config;
use bsync_export::BatchExporter;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for the export runner
#[derive(Parser, Debug)]
#[command(name = "export-runner")]
#[command(about = "One-shot batch export of the JSON cache into parquet")]
struct Args {
    /// Path to the sync YAML configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Keep source cache files in place regardless of configuration
    #[arg(long)]
    keep_cache: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let cfg = SyncConfig::from_yaml_file(&args.config)?;

    let storage = storage_from_config(
        &cfg.output_root,
        cfg.object_store.as_ref(),
        &cfg.exporter.compression,
    )?;
    let exporter = BatchExporter::new(
        &cfg.cache_root,
        default_handler_configs(),
        storage,
        cfg.exporter.clear_filepaths && !args.keep_cache,
        cfg.exporter.clear_cache && !args.keep_cache,
        Duration::from_secs(cfg.exporter.subtree_deadline_seconds),
    );

    let summary = match exporter.run_once().await {
        Ok(summary) => summary,
        Err(ExportError::LockHeld) => {
            eprintln!("cache lock is held by another exporter; retry later");
            std::process::exit(2);
        }
        Err(e) => return Err(e.into()),
    };

    eprintln!(
        "run {}: {} files, {} rows, {} quarantined",
        summary.run_id,
        summary.files_written(),
        summary.rows_written(),
        summary.quarantined()
    );
    for (key, outcome) in &summary.subtrees {
        match &outcome.error {
            Some(error) => eprintln!(
                "  {:<20} FAILED: {error}",
                key.as_str()
            ),
            None => eprintln!(
                "  {:<20} {} files read, {} rows, {} quarantined",
                key.as_str(),
                outcome.files_read,
                outcome.rows_written,
                outcome.quarantined
            ),
        }
    }

    if summary.failed_subtrees() > 0 {
        std::process::exit(1);
    }
    Ok(())
}
