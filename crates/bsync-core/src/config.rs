//! YAML configuration surface for the stream runner and the exporter.
//!
//! # Example
//!
//! ```yaml
//! cache_root: /var/lib/bsync/cache
//! output_root: s3://research-lake/sync
//! frame_queue_capacity: 1024
//! firehose:
//!   endpoint: "wss://jetstream2.us-east.bsky.network/subscribe"
//! registry:
//!   source: /var/lib/bsync/study_users.jsonl
//!   refresh_interval_seconds: 300
//! exporter:
//!   interval_seconds: 300
//!   clear_filepaths: true
//! object_store:
//!   bucket: research-lake
//!   endpoint: "http://localhost:9000"
//!   access_key: minio
//!   secret_key: minio123
//!   region: us-east-1
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base path for the JSON staging cache.
    pub cache_root: PathBuf,

    /// Base path or `s3://bucket/prefix` URI for columnar output.
    pub output_root: String,

    /// Bounded queue size between the firehose client and the dispatcher.
    #[serde(default = "default_frame_queue_capacity")]
    pub frame_queue_capacity: usize,

    /// Per-handler cache write attempts before a decision is abandoned.
    #[serde(default = "default_max_write_retries")]
    pub max_write_retries: u32,

    #[serde(default)]
    pub firehose: FirehoseConfig,

    pub registry: RegistryConfig,

    #[serde(default)]
    pub exporter: ExporterConfig,

    /// Durable cursor backend. Defaults to a JSON file next to the cache.
    #[serde(default)]
    pub cursor: Option<CursorConfig>,

    /// S3-compatible credentials, required when `output_root`, the registry
    /// source, or the cursor backend point at an object store.
    #[serde(default)]
    pub object_store: Option<ObjectStoreConfig>,
}

impl SyncConfig {
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg: SyncConfig = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(cfg)
    }

    /// Resolved cursor backend, falling back to a file beside the cache root.
    pub fn cursor_config(&self) -> CursorConfig {
        self.cursor.clone().unwrap_or_else(|| CursorConfig::File {
            path: self.cache_root.join("cursor.json"),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirehoseConfig {
    /// WebSocket subscribe endpoint of the upstream commit stream.
    #[serde(default = "default_firehose_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_backoff_base")]
    pub reconnect_backoff_base_seconds: u64,

    #[serde(default = "default_backoff_cap")]
    pub reconnect_backoff_cap_seconds: u64,
}

impl Default for FirehoseConfig {
    fn default() -> Self {
        Self {
            endpoint: default_firehose_endpoint(),
            reconnect_backoff_base_seconds: default_backoff_base(),
            reconnect_backoff_cap_seconds: default_backoff_cap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Local path or `s3://bucket/key` of the line-delimited JSON snapshot.
    pub source: String,

    #[serde(default = "default_registry_refresh")]
    pub refresh_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExporterConfig {
    #[serde(default = "default_exporter_interval")]
    pub interval_seconds: u64,

    /// Delete source cache files after a subtree exports successfully.
    #[serde(default = "default_true")]
    pub clear_filepaths: bool,

    /// Tear down and rebuild the subtree directory skeleton after export.
    #[serde(default)]
    pub clear_cache: bool,

    /// Parquet compression codec: zstd, snappy, gzip, or uncompressed.
    #[serde(default = "default_compression")]
    pub compression: String,

    #[serde(default = "default_subtree_deadline")]
    pub subtree_deadline_seconds: u64,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_exporter_interval(),
            clear_filepaths: true,
            clear_cache: false,
            compression: default_compression(),
            subtree_deadline_seconds: default_subtree_deadline(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend")]
pub enum CursorConfig {
    #[serde(rename = "file")]
    File { path: PathBuf },
    #[serde(rename = "object_store")]
    ObjectStore { key: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    pub bucket: String,
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    #[serde(default)]
    pub allow_http: bool,
}

fn default_frame_queue_capacity() -> usize {
    1024
}

fn default_max_write_retries() -> u32 {
    3
}

fn default_firehose_endpoint() -> String {
    "wss://jetstream2.us-east.bsky.network/subscribe".to_string()
}

fn default_backoff_base() -> u64 {
    1
}

fn default_backoff_cap() -> u64 {
    60
}

fn default_registry_refresh() -> u64 {
    300
}

fn default_exporter_interval() -> u64 {
    300
}

fn default_compression() -> String {
    "zstd".to_string()
}

fn default_subtree_deadline() -> u64 {
    300
}

fn default_true() -> bool {
    true
}
