//! Error taxonomy.
//!
//! Processors and handlers return typed results and never raise across the
//! dispatcher boundary; only cursor persistence failures and startup
//! misconfiguration propagate to the process boundary. The exporter reports
//! per-subtree results instead of failing a whole run.

use crate::frame::Cursor;
use std::time::Duration;

/// Failures while persisting a normalized record into the cache.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Record is structurally unable to satisfy the handler's requirements.
    /// Not retried.
    #[error("record missing required field: {0}")]
    InvalidRecord(&'static str),

    /// A nested path segment would escape the configured subtree. Not
    /// retried; the decision is discarded.
    #[error("nested path segment escapes the cache subtree: {0:?}")]
    PathViolation(String),

    /// Transient I/O; retried by the dispatcher up to its retry budget.
    #[error("cache write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache write exceeded the {0:?} deadline")]
    Timeout(Duration),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    /// Transient failures are worth another attempt; structural ones are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HandlerError::Io(_) | HandlerError::Timeout(_) | HandlerError::Other(_)
        )
    }
}

/// Failures of the durable cursor store.
#[derive(Debug, thiserror::Error)]
pub enum CursorError {
    #[error("failed to load cursor: {0}")]
    Load(#[source] anyhow::Error),

    #[error("failed to persist cursor: {0}")]
    Persist(#[source] anyhow::Error),
}

/// Fatal errors of the stream task. Anything else is counted and absorbed.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Cursor persistence failed after a frame's writes were already
    /// durable. The writes are idempotent on replay; the process exits
    /// non-zero so an orchestrator restarts it from the last good cursor.
    #[error("cursor persistence failed at offset {offset}: {source}")]
    CursorPersist {
        offset: Cursor,
        #[source]
        source: CursorError,
    },
}

/// Exporter failures. `LockHeld` is the retry-later signal; the rest abort
/// a single subtree, never the run.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("cache lock is held by another exporter")]
    LockHeld,

    #[error("subtree exceeded its export deadline")]
    DeadlineExceeded,

    #[error("columnar encoding failed: {0}")]
    Encode(#[source] anyhow::Error),

    #[error("storage write failed: {0}")]
    Storage(#[source] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
