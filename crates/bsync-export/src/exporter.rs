//! Batch exporter.
//!
//! One run: take the cache lock, walk each subtree with its configured
//! read strategy, quarantine unparseable files, group records by (dataset,
//! partition date), write parquet + manifest per group, and only then clear
//! the subtree's source files. A failing subtree is abandoned for retry on
//! the next run; the others are unaffected.

use crate::datasets;
use crate::storage::{StorageRepository, StoredFile};
use bsync_cache::lock::{CacheLock, LockError};
use bsync_cache::{fileio, DirectoryManager, HandlerConfig, HandlerKey, ReadStrategy};
use bsync_core::{ExportError, NormalizedRecord};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Manifest written beside every parquet file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportManifest {
    pub dataset: String,
    pub partition_date: NaiveDate,
    pub file_id: String,
    pub record_count: usize,
    pub source_files: Vec<String>,
}

/// Per-subtree result of one run.
#[derive(Debug, Clone, Default)]
pub struct SubtreeOutcome {
    pub files_read: usize,
    pub rows_written: usize,
    pub quarantined: usize,
    pub bytes_written: u64,
    pub output_files: Vec<String>,
    pub error: Option<String>,
}

impl SubtreeOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Whole-run summary; the run itself only fails on lock contention.
#[derive(Debug, Default)]
pub struct ExportRunSummary {
    pub run_id: String,
    pub subtrees: Vec<(HandlerKey, SubtreeOutcome)>,
}

impl ExportRunSummary {
    pub fn failed_subtrees(&self) -> usize {
        self.subtrees.iter().filter(|(_, o)| !o.succeeded()).count()
    }

    pub fn files_written(&self) -> usize {
        self.subtrees.iter().map(|(_, o)| o.output_files.len()).sum()
    }

    pub fn rows_written(&self) -> usize {
        self.subtrees.iter().map(|(_, o)| o.rows_written).sum()
    }

    pub fn quarantined(&self) -> usize {
        self.subtrees.iter().map(|(_, o)| o.quarantined).sum()
    }
}

pub struct BatchExporter {
    dirs: DirectoryManager,
    handlers: Vec<HandlerConfig>,
    storage: Arc<dyn StorageRepository>,
    clear_filepaths: bool,
    clear_cache: bool,
    subtree_deadline: Duration,
}

impl BatchExporter {
    pub fn new(
        cache_root: &Path,
        handlers: Vec<HandlerConfig>,
        storage: Arc<dyn StorageRepository>,
        clear_filepaths: bool,
        clear_cache: bool,
        subtree_deadline: Duration,
    ) -> Self {
        Self {
            dirs: DirectoryManager::new(cache_root),
            handlers,
            storage,
            clear_filepaths,
            clear_cache,
            subtree_deadline,
        }
    }

    /// Runs one export batch. `ExportError::LockHeld` is the retry-later
    /// signal; every other failure is absorbed into its subtree's outcome.
    pub async fn run_once(&self) -> Result<ExportRunSummary, ExportError> {
        let _lock = match CacheLock::try_exclusive(self.dirs.root()) {
            Ok(lock) => lock,
            Err(LockError::Held(_)) => return Err(ExportError::LockHeld),
            Err(LockError::Io { source, .. }) => return Err(ExportError::Io(source)),
        };

        // Time-ordered so replays sort after the originals and file ids
        // never collide across runs.
        let run_id = Uuid::now_v7().simple().to_string();
        let mut summary = ExportRunSummary {
            run_id: run_id.clone(),
            subtrees: Vec::new(),
        };
        let mut seq = 0u32;

        for cfg in &self.handlers {
            let outcome =
                match tokio::time::timeout(self.subtree_deadline, self.export_subtree(cfg, &run_id, &mut seq))
                    .await
                {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(e)) => SubtreeOutcome {
                        error: Some(e.to_string()),
                        ..Default::default()
                    },
                    Err(_elapsed) => SubtreeOutcome {
                        error: Some(ExportError::DeadlineExceeded.to_string()),
                        ..Default::default()
                    },
                };
            if let Some(error) = &outcome.error {
                warn!(subtree = cfg.key.as_str(), error = %error, "subtree export failed");
            }
            summary.subtrees.push((cfg.key, outcome));
        }

        info!(
            run_id = %summary.run_id,
            files = summary.files_written(),
            rows = summary.rows_written(),
            quarantined = summary.quarantined(),
            failed_subtrees = summary.failed_subtrees(),
            "export run finished"
        );
        Ok(summary)
    }

    async fn export_subtree(
        &self,
        cfg: &HandlerConfig,
        run_id: &str,
        seq: &mut u32,
    ) -> Result<SubtreeOutcome, ExportError> {
        let subtree = self.dirs.root().join(cfg.subtree_rel());
        let mut outcome = SubtreeOutcome::default();

        let files = enumerate_subtree(&subtree, cfg.read_strategy)?;
        if files.is_empty() {
            return Ok(outcome);
        }

        let mut sources: Vec<PathBuf> = Vec::new();
        let mut groups: BTreeMap<(String, NaiveDate), Vec<(NormalizedRecord, String)>> =
            BTreeMap::new();
        for file in files {
            match fileio::read_json::<NormalizedRecord>(&file) {
                Ok(record) => {
                    outcome.files_read += 1;
                    let dataset = datasets::dataset_for(&record).to_string();
                    let rel = file
                        .strip_prefix(self.dirs.root())
                        .unwrap_or(&file)
                        .to_string_lossy()
                        .into_owned();
                    groups
                        .entry((dataset, record.partition_date))
                        .or_default()
                        .push((record, rel));
                    sources.push(file);
                }
                Err(fileio::ReadError::Parse { .. }) => {
                    let moved = fileio::move_to_quarantine(self.dirs.root(), &file)?;
                    outcome.quarantined += 1;
                    metrics::counter!("bsync_records_quarantined", 1);
                    warn!(from = %file.display(), to = %moved.display(), "quarantined unparseable cache file");
                }
                Err(fileio::ReadError::Io { source, .. }) => return Err(ExportError::Io(source)),
            }
        }

        for ((dataset, partition_date), entries) in groups {
            let records: Vec<NormalizedRecord> =
                entries.iter().map(|(r, _)| r.clone()).collect();
            let batch = datasets::batch_from_records(&records)
                .map_err(|e| ExportError::Encode(anyhow::Error::new(e)))?;
            let file_stem = format!("part-{run_id}-{seq:04}");
            *seq += 1;
            let stored: StoredFile = self
                .storage
                .export_batch(&dataset, partition_date, &file_stem, batch)
                .await?;
            self.storage
                .write_manifest(&ExportManifest {
                    dataset: dataset.clone(),
                    partition_date,
                    file_id: file_stem,
                    record_count: records.len(),
                    source_files: entries.iter().map(|(_, rel)| rel.clone()).collect(),
                })
                .await?;
            outcome.rows_written += records.len();
            outcome.bytes_written += stored.bytes;
            outcome.output_files.push(stored.path);
            metrics::counter!("bsync_export_files_written", 1);
            metrics::counter!("bsync_export_bytes_written", stored.bytes);
        }

        // Output is durable; now, and only now, release the staged input.
        if self.clear_cache {
            self.dirs.rebuild_subtree(cfg)?;
        } else if self.clear_filepaths {
            fileio::remove_files(&sources)?;
            self.dirs.prune_empty_dirs(cfg)?;
        }
        Ok(outcome)
    }
}

/// Enumerates a subtree according to its read strategy: flat subtrees hold
/// records directly, the nested and split strategies hold one level of
/// directories (uri suffix, follow status, or author id) with records
/// inside. The tag a directory level encodes is already stored on each
/// record, so enumeration only has to respect the shape.
fn enumerate_subtree(subtree: &Path, strategy: ReadStrategy) -> std::io::Result<Vec<PathBuf>> {
    if !subtree.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    match strategy {
        ReadStrategy::Flat => collect_record_files(subtree, &mut files)?,
        ReadStrategy::NestedByUri
        | ReadStrategy::SplitByFollowStatus
        | ReadStrategy::SplitByAuthor => {
            for entry in std::fs::read_dir(subtree)? {
                let entry = entry?;
                let name = entry.file_name();
                if name.to_string_lossy().starts_with('.') {
                    continue;
                }
                if entry.file_type()?.is_dir() {
                    collect_record_files(&entry.path(), &mut files)?;
                }
            }
        }
    }
    files.sort();
    Ok(files)
}

fn collect_record_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || !entry.file_type()?.is_file() {
            continue;
        }
        if name.ends_with(".json") {
            out.push(entry.path());
        }
    }
    Ok(())
}

/// Periodic export loop for running the exporter inside the stream process.
pub async fn run_periodic(
    exporter: Arc<BatchExporter>,
    interval: Duration,
    cancel: tokio_util::sync::CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
        match exporter.run_once().await {
            Ok(summary) => {
                if summary.failed_subtrees() > 0 {
                    warn!(
                        run_id = %summary.run_id,
                        failed = summary.failed_subtrees(),
                        "export run completed with failed subtrees"
                    );
                }
            }
            Err(ExportError::LockHeld) => {
                warn!("cache lock held; skipping this export interval");
            }
            Err(e) => {
                warn!(error = %e, "export run failed");
            }
        }
    }
}
