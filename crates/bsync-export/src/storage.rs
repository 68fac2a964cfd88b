//! Partitioned columnar storage adapters.
//!
//! Output paths follow `{root}/{dataset}/partition_date=YYYY-MM-DD/
//! part-{run_id}-{seq}.parquet`. Writes are atomic from the caller's
//! perspective: the local adapter stages to a temp sibling and renames,
//! the object-store adapter streams a multipart upload that only commits
//! on success.

use crate::exporter::ExportManifest;
use arrow_array::RecordBatch;
use async_trait::async_trait;
use bsync_cache::fileio;
use bsync_core::ExportError;
use chrono::NaiveDate;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// One committed output file.
#[derive(Debug, Clone)]
pub struct StoredFile {
    /// Root-relative path of the file.
    pub path: String,
    pub bytes: u64,
}

#[async_trait]
pub trait StorageRepository: Send + Sync {
    /// Encodes `batch` and commits it under the dataset partition.
    async fn export_batch(
        &self,
        dataset: &str,
        partition_date: NaiveDate,
        file_stem: &str,
        batch: RecordBatch,
    ) -> Result<StoredFile, ExportError>;

    /// Writes the manifest describing an already-committed file.
    async fn write_manifest(&self, manifest: &ExportManifest) -> Result<(), ExportError>;
}

pub fn partition_rel_path(dataset: &str, partition_date: NaiveDate, file_name: &str) -> String {
    format!("{dataset}/partition_date={partition_date}/{file_name}")
}

/// Parses the configured compression codec name.
pub fn compression_from_name(name: &str) -> Result<Compression, ExportError> {
    match name.to_ascii_lowercase().as_str() {
        "zstd" => Ok(Compression::ZSTD(ZstdLevel::default())),
        "snappy" => Ok(Compression::SNAPPY),
        "gzip" => Ok(Compression::GZIP(Default::default())),
        "uncompressed" | "none" => Ok(Compression::UNCOMPRESSED),
        other => Err(ExportError::Encode(anyhow::anyhow!(
            "unknown compression codec {other:?}"
        ))),
    }
}

fn parquet_bytes(batch: &RecordBatch, compression: Compression) -> Result<Vec<u8>, ExportError> {
    let props = WriterProperties::builder()
        .set_compression(compression)
        .build();
    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), Some(props))
        .map_err(|e| ExportError::Encode(anyhow::Error::new(e)))?;
    writer
        .write(batch)
        .map_err(|e| ExportError::Encode(anyhow::Error::new(e)))?;
    writer
        .close()
        .map_err(|e| ExportError::Encode(anyhow::Error::new(e)))?;
    Ok(buf)
}

/// Builds the adapter the configured `output_root` calls for: an
/// S3-compatible store for `s3://bucket/prefix` roots, the local
/// filesystem otherwise.
pub fn storage_from_config(
    output_root: &str,
    object_store: Option<&bsync_core::config::ObjectStoreConfig>,
    compression_name: &str,
) -> anyhow::Result<Arc<dyn StorageRepository>> {
    let compression =
        compression_from_name(compression_name).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    match output_root.strip_prefix("s3://") {
        Some(rest) => {
            let (bucket, prefix) = match rest.split_once('/') {
                Some((bucket, prefix)) if !prefix.is_empty() => {
                    (bucket, Some(prefix.trim_end_matches('/').to_string()))
                }
                Some((bucket, _)) => (bucket, None),
                None => (rest, None),
            };
            let cfg = object_store.ok_or_else(|| {
                anyhow::anyhow!("output root {output_root} requires object_store config")
            })?;
            let store = bsync_cache::registry::build_s3(cfg, bucket)?;
            Ok(Arc::new(ObjectStorage::new(
                Arc::new(store),
                prefix,
                compression,
            )))
        }
        None => Ok(Arc::new(LocalStorage::new(
            PathBuf::from(output_root),
            compression,
        ))),
    }
}

/// Local filesystem adapter: temp file + rename + directory fsync.
pub struct LocalStorage {
    root: PathBuf,
    compression: Compression,
}

impl LocalStorage {
    pub fn new(root: PathBuf, compression: Compression) -> Self {
        Self { root, compression }
    }
}

#[async_trait]
impl StorageRepository for LocalStorage {
    async fn export_batch(
        &self,
        dataset: &str,
        partition_date: NaiveDate,
        file_stem: &str,
        batch: RecordBatch,
    ) -> Result<StoredFile, ExportError> {
        let rel = partition_rel_path(dataset, partition_date, &format!("{file_stem}.parquet"));
        let bytes = parquet_bytes(&batch, self.compression)?;
        let size = bytes.len() as u64;
        let target = self.root.join(&rel);
        tokio::task::spawn_blocking(move || fileio::write_bytes_atomic(&target, &bytes))
            .await
            .map_err(|e| ExportError::Storage(anyhow::Error::new(e)))??;
        Ok(StoredFile {
            path: rel,
            bytes: size,
        })
    }

    async fn write_manifest(&self, manifest: &ExportManifest) -> Result<(), ExportError> {
        let rel = partition_rel_path(
            &manifest.dataset,
            manifest.partition_date,
            &format!("{}.manifest.json", manifest.file_id),
        );
        let target = self.root.join(rel);
        let manifest = manifest.clone();
        tokio::task::spawn_blocking(move || fileio::write_json_atomic(&target, &manifest))
            .await
            .map_err(|e| ExportError::Storage(anyhow::Error::new(e)))??;
        Ok(())
    }
}

/// S3-compatible adapter: streaming multipart upload, committed on success.
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
    compression: Compression,
}

impl ObjectStorage {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: Option<String>, compression: Compression) -> Self {
        Self {
            store,
            prefix,
            compression,
        }
    }

    fn object_path(&self, rel: &str) -> ObjectPath {
        match &self.prefix {
            Some(prefix) => ObjectPath::from(format!("{prefix}/{rel}")),
            None => ObjectPath::from(rel),
        }
    }

    async fn put_streaming(&self, rel: &str, bytes: Vec<u8>) -> Result<(), ExportError> {
        let path = self.object_path(rel);
        let (_id, mut writer) = self
            .store
            .put_multipart(&path)
            .await
            .map_err(|e| ExportError::Storage(anyhow::Error::new(e)))?;
        writer
            .write_all(&bytes)
            .await
            .map_err(|e| ExportError::Storage(anyhow::Error::new(e)))?;
        writer
            .shutdown()
            .await
            .map_err(|e| ExportError::Storage(anyhow::Error::new(e)))?;
        Ok(())
    }
}

#[async_trait]
impl StorageRepository for ObjectStorage {
    async fn export_batch(
        &self,
        dataset: &str,
        partition_date: NaiveDate,
        file_stem: &str,
        batch: RecordBatch,
    ) -> Result<StoredFile, ExportError> {
        let rel = partition_rel_path(dataset, partition_date, &format!("{file_stem}.parquet"));
        let bytes = parquet_bytes(&batch, self.compression)?;
        let size = bytes.len() as u64;
        self.put_streaming(&rel, bytes).await?;
        Ok(StoredFile {
            path: rel,
            bytes: size,
        })
    }

    async fn write_manifest(&self, manifest: &ExportManifest) -> Result<(), ExportError> {
        let rel = partition_rel_path(
            &manifest.dataset,
            manifest.partition_date,
            &format!("{}.manifest.json", manifest.file_id),
        );
        let bytes = serde_json::to_vec(manifest)
            .map_err(|e| ExportError::Encode(anyhow::Error::new(e)))?;
        self.put_streaming(&rel, bytes).await
    }
}
