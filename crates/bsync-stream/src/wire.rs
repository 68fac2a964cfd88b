//! Upstream wire format.
//!
//! The upstream emits one JSON event per WebSocket text frame:
//!
//! ```json
//! {"did":"did:plc:abc","time_us":1725911162329308,"kind":"commit",
//!  "commit":{"rev":"...","operation":"create","collection":"app.bsky.feed.post",
//!            "rkey":"3kab...","record":{"text":"hi"}}}
//! ```
//!
//! `time_us` is the resumable stream offset. Non-commit kinds (identity,
//! account) are skipped; unknown operations and malformed JSON are parse
//! errors the client counts and skips without advancing the cursor.

use bsync_core::{CommitFrame, Cursor, OpKind, RawOp};
use chrono::{DateTime, Utc};
use serde::Deserialize;

pub const COLLECTION_POST: &str = "app.bsky.feed.post";
pub const COLLECTION_LIKE: &str = "app.bsky.feed.like";
pub const COLLECTION_FOLLOW: &str = "app.bsky.graph.follow";

/// Collections the client subscribes to.
pub const WANTED_COLLECTIONS: &[&str] = &[COLLECTION_POST, COLLECTION_LIKE, COLLECTION_FOLLOW];

#[derive(Debug, thiserror::Error)]
pub enum FrameParseError {
    #[error("malformed frame json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("commit event without commit body")]
    MissingCommit,

    #[error("unsupported commit operation {0:?}")]
    UnsupportedOperation(String),

    #[error("timestamp {0} out of range")]
    TimestampOutOfRange(u64),
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    did: String,
    time_us: u64,
    kind: String,
    #[serde(default)]
    commit: Option<WireCommit>,
}

#[derive(Debug, Deserialize)]
struct WireCommit {
    operation: String,
    collection: String,
    rkey: String,
    #[serde(default)]
    record: serde_json::Value,
}

/// Parses one wire event. `Ok(None)` means a well-formed event the engine
/// does not consume (identity, account).
pub fn parse_frame(raw: &str) -> Result<Option<CommitFrame>, FrameParseError> {
    let event: WireEvent = serde_json::from_str(raw)?;
    if event.kind != "commit" {
        return Ok(None);
    }
    let commit = event.commit.ok_or(FrameParseError::MissingCommit)?;

    // Updates carry full record content and cache writes are idempotent
    // overwrites, so they dispatch exactly like creates.
    let kind = match commit.operation.as_str() {
        "create" | "update" => OpKind::Create,
        "delete" => OpKind::Delete,
        other => return Err(FrameParseError::UnsupportedOperation(other.to_string())),
    };

    let timestamp = timestamp_from_micros(event.time_us)?;
    Ok(Some(CommitFrame {
        stream_offset: Cursor(event.time_us),
        actor_id: event.did,
        timestamp,
        ops: vec![RawOp {
            kind,
            collection: commit.collection,
            record_key: commit.rkey,
            payload: commit.record,
        }],
    }))
}

fn timestamp_from_micros(time_us: u64) -> Result<DateTime<Utc>, FrameParseError> {
    i64::try_from(time_us)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_micros)
        .ok_or(FrameParseError::TimestampOutOfRange(time_us))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_create_commit() {
        let raw = r#"{"did":"did:ex:A","time_us":1725911162329308,"kind":"commit",
            "commit":{"rev":"r","operation":"create","collection":"app.bsky.feed.post",
                      "rkey":"r1","record":{"text":"hi"}}}"#;
        let frame = parse_frame(raw).unwrap().unwrap();
        assert_eq!(frame.stream_offset, Cursor(1725911162329308));
        assert_eq!(frame.actor_id, "did:ex:A");
        assert_eq!(frame.ops.len(), 1);
        assert_eq!(frame.ops[0].kind, OpKind::Create);
        assert_eq!(frame.ops[0].collection, COLLECTION_POST);
        assert_eq!(frame.ops[0].record_key, "r1");
        assert_eq!(frame.ops[0].payload["text"], "hi");
    }

    #[test]
    fn parses_delete_commit_without_record() {
        let raw = r#"{"did":"did:ex:A","time_us":1,"kind":"commit",
            "commit":{"operation":"delete","collection":"app.bsky.feed.like","rkey":"l1"}}"#;
        let frame = parse_frame(raw).unwrap().unwrap();
        assert_eq!(frame.ops[0].kind, OpKind::Delete);
        assert!(frame.ops[0].payload.is_null());
    }

    #[test]
    fn update_dispatches_as_create() {
        let raw = r#"{"did":"did:ex:A","time_us":1,"kind":"commit",
            "commit":{"operation":"update","collection":"app.bsky.feed.post","rkey":"r1",
                      "record":{"text":"edited"}}}"#;
        let frame = parse_frame(raw).unwrap().unwrap();
        assert_eq!(frame.ops[0].kind, OpKind::Create);
    }

    #[test]
    fn identity_events_are_skipped() {
        let raw = r#"{"did":"did:ex:A","time_us":2,"kind":"identity"}"#;
        assert!(parse_frame(raw).unwrap().is_none());
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            parse_frame("{nope"),
            Err(FrameParseError::Json(_))
        ));
    }

    #[test]
    fn commit_without_body_is_a_parse_error() {
        let raw = r#"{"did":"did:ex:A","time_us":3,"kind":"commit"}"#;
        assert!(matches!(
            parse_frame(raw),
            Err(FrameParseError::MissingCommit)
        ));
    }
}
