//! # bsync-export - Two-Phase Export
//!
//! The drain side of the engine: a periodic batch job that enumerates the
//! JSON cache subtree by subtree, quarantines unparseable files, groups
//! records by logical dataset and partition date, and writes hive-style
//! partitioned parquet through a storage adapter. Source files are deleted
//! only after their subtree's output is durable, so a crash mid-export
//! costs at most duplicate output on the next run, never data.

pub mod datasets;
pub mod exporter;
pub mod storage;

pub use exporter::{BatchExporter, ExportRunSummary, SubtreeOutcome};
pub use storage::{LocalStorage, ObjectStorage, StorageRepository, StoredFile};
