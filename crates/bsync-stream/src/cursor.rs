//! Durable cursor stores.
//!
//! The cursor marks the last fully-dispatched frame. Stores never let the
//! persisted value move backwards: replays after a crash re-dispatch a
//! suffix of the stream, which is safe because cache writes are idempotent.

use async_trait::async_trait;
use bsync_cache::fileio;
use bsync_core::{Cursor, CursorError};
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load(&self) -> Result<Option<Cursor>, CursorError>;

    /// Persists `cursor` unless the stored value is already ahead of it.
    async fn persist(&self, cursor: Cursor) -> Result<(), CursorError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedCursor {
    stream_offset: Cursor,
}

/// Cursor in a JSON file, written with temp-and-rename durability.
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn load(&self) -> Result<Option<Cursor>, CursorError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let persisted: PersistedCursor = fileio::read_json(&self.path)
            .map_err(|e| CursorError::Load(anyhow::Error::new(e)))?;
        Ok(Some(persisted.stream_offset))
    }

    async fn persist(&self, cursor: Cursor) -> Result<(), CursorError> {
        if let Some(current) = self.load().await? {
            if current > cursor {
                return Ok(());
            }
        }
        fileio::write_json_atomic(
            &self.path,
            &PersistedCursor {
                stream_offset: cursor,
            },
        )
        .map_err(|e| CursorError::Persist(anyhow::Error::new(e)))
    }
}

/// Cursor as a single object in an S3-compatible store.
pub struct ObjectCursorStore {
    store: Arc<dyn ObjectStore>,
    path: ObjectPath,
}

impl ObjectCursorStore {
    pub fn new(store: Arc<dyn ObjectStore>, key: &str) -> Self {
        Self {
            store,
            path: ObjectPath::from(key),
        }
    }
}

#[async_trait]
impl CursorStore for ObjectCursorStore {
    async fn load(&self) -> Result<Option<Cursor>, CursorError> {
        match self.store.get(&self.path).await {
            Ok(result) => {
                let bytes = result
                    .bytes()
                    .await
                    .map_err(|e| CursorError::Load(anyhow::Error::new(e)))?;
                let persisted: PersistedCursor = serde_json::from_slice(&bytes)
                    .map_err(|e| CursorError::Load(anyhow::Error::new(e)))?;
                Ok(Some(persisted.stream_offset))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(CursorError::Load(anyhow::Error::new(e))),
        }
    }

    async fn persist(&self, cursor: Cursor) -> Result<(), CursorError> {
        if let Some(current) = self.load().await? {
            if current > cursor {
                return Ok(());
            }
        }
        let bytes = serde_json::to_vec(&PersistedCursor {
            stream_offset: cursor,
        })
        .map_err(|e| CursorError::Persist(anyhow::Error::new(e)))?;
        self.store
            .put(&self.path, bytes.into())
            .await
            .map_err(|e| CursorError::Persist(anyhow::Error::new(e)))?;
        Ok(())
    }
}

/// In-memory store for tests and dry runs.
#[derive(Default)]
pub struct MemoryCursorStore {
    inner: Mutex<Option<Cursor>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Cursor> {
        *self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self) -> Result<Option<Cursor>, CursorError> {
        Ok(self.current())
    }

    async fn persist(&self, cursor: Cursor) -> Result<(), CursorError> {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if inner.map_or(true, |current| current <= cursor) {
            *inner = Some(cursor);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCursorStore::new(dir.path().join("cursor.json"));
        assert!(store.load().await.unwrap().is_none());
        store.persist(Cursor(42)).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(Cursor(42)));
    }

    #[tokio::test]
    async fn file_store_never_rewinds() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCursorStore::new(dir.path().join("cursor.json"));
        store.persist(Cursor(100)).await.unwrap();
        store.persist(Cursor(99)).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(Cursor(100)));
        store.persist(Cursor(101)).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(Cursor(101)));
    }

    #[tokio::test]
    async fn memory_store_never_rewinds() {
        let store = MemoryCursorStore::new();
        store.persist(Cursor(10)).await.unwrap();
        store.persist(Cursor(5)).await.unwrap();
        assert_eq!(store.current(), Some(Cursor(10)));
    }
}
