//! # stream-runner - Firehose Ingest Process
//!
//! Long-running entry point for the ingestion half of the engine: connects
//! to the upstream firehose, classifies commit operations against the
//! study-user registry, stages records in the JSON cache, and advances the
//! durable cursor. Optionally hosts the periodic exporter in-process.
//!
//! ## Usage
//!
//! ```bash
//! stream-runner --config sync.yml
//! RUST_LOG=debug stream-runner --config sync.yml --with-exporter
//! ```
//!
//! Exits non-zero when cursor persistence fails so an orchestrator can
//! restart the process from the last durable cursor.

use anyhow::{Context, Result};
use bsync_cache::registry::{run_refresher, RegistrySource, StudyUserRegistry};
use bsync_cache::{default_handler_configs, DirectoryManager, HandlerRegistry};
use bsync_core::config::CursorConfig;
use bsync_core::SyncConfig;
use bsync_export::exporter::run_periodic;
use bsync_export::storage::storage_from_config;
use bsync_export::BatchExporter;
use bsync_stream::{
    run_dispatcher, CursorStore, FileCursorStore, FirehoseClient, ObjectCursorStore,
    OperationsDispatcher,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for the stream runner
#[derive(Parser, Debug)]
#[command(name = "stream-runner")]
#[command(about = "Firehose stream ingestion into the JSON staging cache")]
struct Args {
    /// Path to the sync YAML configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Also run the periodic batch exporter inside this process
    #[arg(long)]
    with_exporter: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let cfg = SyncConfig::from_yaml_file(&args.config)?;

    let handler_configs = default_handler_configs();
    let dirs = DirectoryManager::new(&cfg.cache_root);
    dirs.create_skeleton(&handler_configs)
        .context("creating cache directory skeleton")?;

    // The first registry load is part of startup; a source that cannot be
    // read at all is a configuration problem, unlike later refresh failures
    // which keep the last good snapshot.
    let registry_source = RegistrySource::from_config(
        &cfg.registry.source,
        cfg.object_store.as_ref(),
    )?;
    let initial = registry_source
        .load()
        .await
        .context("loading initial study-user registry")?;
    info!(
        study_users = initial.len_study_users(),
        "loaded study-user registry"
    );
    let registry = Arc::new(StudyUserRegistry::new(initial));

    let cursor_store: Arc<dyn CursorStore> = match cfg.cursor_config() {
        CursorConfig::File { path } => Arc::new(FileCursorStore::new(path)),
        CursorConfig::ObjectStore { key } => {
            let os_cfg = cfg.object_store.as_ref().context(
                "cursor backend object_store requires object_store config",
            )?;
            let store = bsync_cache::registry::build_s3(os_cfg, &os_cfg.bucket)?;
            Arc::new(ObjectCursorStore::new(Arc::new(store), &key))
        }
    };

    let dispatcher = OperationsDispatcher::new(
        HandlerRegistry::new(&cfg.cache_root),
        registry.clone(),
        cursor_store.clone(),
        cfg.max_write_retries,
    );

    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(cfg.frame_queue_capacity);

    let client_cancel = cancel.child_token();
    let firehose_cfg = cfg.firehose.clone();
    let client_cursor = cursor_store.clone();
    let mut client_handle = tokio::spawn(async move {
        let mut client = FirehoseClient::new(&firehose_cfg);
        client.run(client_cursor, tx, client_cancel).await
    });

    let dispatcher_cancel = cancel.child_token();
    let dispatcher_handle =
        tokio::spawn(async move { run_dispatcher(dispatcher, rx, dispatcher_cancel).await });

    let refresher_handle = tokio::spawn(run_refresher(
        registry.clone(),
        registry_source,
        Duration::from_secs(cfg.registry.refresh_interval_seconds),
        cancel.child_token(),
    ));

    let exporter_handle = if args.with_exporter {
        let storage = storage_from_config(
            &cfg.output_root,
            cfg.object_store.as_ref(),
            &cfg.exporter.compression,
        )?;
        let exporter = Arc::new(BatchExporter::new(
            &cfg.cache_root,
            handler_configs,
            storage,
            cfg.exporter.clear_filepaths,
            cfg.exporter.clear_cache,
            Duration::from_secs(cfg.exporter.subtree_deadline_seconds),
        ));
        Some(tokio::spawn(run_periodic(
            exporter,
            Duration::from_secs(cfg.exporter.interval_seconds),
            cancel.child_token(),
        )))
    } else {
        None
    };

    let client_result = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
            cancel.cancel();
            None
        }
        result = &mut client_handle => {
            warn!("firehose client exited");
            cancel.cancel();
            Some(result)
        }
    };

    // The dispatcher drains queued frames before exiting; a cursor
    // persistence failure surfaces here as a non-zero exit, ahead of any
    // secondary client error.
    dispatcher_handle
        .await
        .context("dispatcher task panicked")?
        .context("dispatcher failed")?;
    if let Some(result) = client_result {
        result.context("client task panicked")??;
    }
    refresher_handle.abort();
    if let Some(handle) = exporter_handle {
        handle.abort();
    }
    info!("shutdown complete");
    Ok(())
}
