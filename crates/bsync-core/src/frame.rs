use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, monotonically non-decreasing position in the upstream stream.
///
/// The engine never interprets the value beyond ordering; it is handed back
/// to the upstream verbatim when resuming a connection.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Cursor(pub u64);

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two commit operation kinds the engine consumes.
///
/// Upstream "update" operations are folded into `Create`: cache writes are
/// idempotent overwrites, so an update is just a create replayed with new
/// content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Create,
    Delete,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Create => "create",
            OpKind::Delete => "delete",
        }
    }
}

/// A single record operation inside a commit frame.
///
/// The payload is kept opaque; processors extract only the fields they need.
#[derive(Debug, Clone)]
pub struct RawOp {
    pub kind: OpKind,
    /// Record-type tag, e.g. `app.bsky.feed.post`.
    pub collection: String,
    pub record_key: String,
    pub payload: serde_json::Value,
}

/// One upstream commit event: an ordered batch of operations by one actor.
///
/// Frames are never persisted; they exist between the firehose client and
/// the dispatcher.
#[derive(Debug, Clone)]
pub struct CommitFrame {
    pub stream_offset: Cursor,
    pub actor_id: String,
    pub timestamp: DateTime<Utc>,
    pub ops: Vec<RawOp>,
}

impl CommitFrame {
    /// Builds the canonical `at://` uri for an op in this frame.
    pub fn record_uri(&self, op: &RawOp) -> String {
        format!("at://{}/{}/{}", self.actor_id, op.collection, op.record_key)
    }
}
