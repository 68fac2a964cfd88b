//! Normalized record model.
//!
//! Raw commit payloads are opaque maps; processors turn them into a
//! [`NormalizedRecord`]: a routing envelope (operation, classification,
//! identity, enrichment timestamps) wrapped around a [`RecordBody`] sum type
//! carrying the per-shape required fields. Records that cannot supply their
//! required fields are rejected at the processor boundary instead of
//! surfacing half-formed entries in the cache.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Delete => "delete",
        }
    }
}

/// Classification assigned by a processor. Each record lands in exactly one
/// cache subtree per routing decision; a single op may fan out into several
/// decisions (a study-user post that is also in-network produces two).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Post,
    Like,
    Follow,
    LikeOnUserPost,
    ReplyToUserPost,
    InNetworkPost,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Post => "post",
            RecordType::Like => "like",
            RecordType::Follow => "follow",
            RecordType::LikeOnUserPost => "like_on_user_post",
            RecordType::ReplyToUserPost => "reply_to_user_post",
            RecordType::InNetworkPost => "in_network_post",
        }
    }
}

/// Direction tag for follow records. A follow where both sides are study
/// users is written twice, once per status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowStatus {
    Follower,
    Followee,
}

impl FollowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FollowStatus::Follower => "follower",
            FollowStatus::Followee => "followee",
        }
    }
}

/// Payload variants, one per record shape, each carrying its required fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum RecordBody {
    Post {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        created_at: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        reply_parent: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        reply_root: Option<String>,
        #[serde(skip_serializing_if = "Vec::is_empty", default)]
        langs: Vec<String>,
    },
    Like {
        subject_uri: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        created_at: Option<String>,
    },
    Follow {
        subject_id: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        created_at: Option<String>,
    },
    /// Minimal record identity for deletes; the cache keeps no payload for
    /// records it never saw created.
    Tombstone,
}

impl RecordBody {
    pub fn created_at(&self) -> Option<&str> {
        match self {
            RecordBody::Post { created_at, .. }
            | RecordBody::Like { created_at, .. }
            | RecordBody::Follow { created_at, .. } => created_at.as_deref(),
            RecordBody::Tombstone => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            RecordBody::Post { text, .. } => Some(text),
            _ => None,
        }
    }
}

/// A record as written to the JSON cache and read back by the exporter.
///
/// `synctimestamp` is the ingest wall-clock time; `partition_date` is its
/// UTC calendar day and the columnar partitioning key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub op: Operation,
    pub record_type: RecordType,
    pub author_id: String,
    pub record_key: String,
    pub record_uri: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub subject_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parent_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub follow_status: Option<FollowStatus>,
    pub synctimestamp: DateTime<Utc>,
    pub partition_date: NaiveDate,
    pub body: RecordBody,
}

impl NormalizedRecord {
    /// Derives the partition date from a sync timestamp. Kept in one place so
    /// the invariant `partition_date == calendar_day(synctimestamp)` cannot
    /// drift between processors.
    pub fn partition_date_for(synctimestamp: DateTime<Utc>) -> NaiveDate {
        synctimestamp.date_naive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> NormalizedRecord {
        let ts = Utc.with_ymd_and_hms(2024, 9, 1, 23, 59, 59).unwrap();
        NormalizedRecord {
            op: Operation::Create,
            record_type: RecordType::Post,
            author_id: "did:ex:A".into(),
            record_key: "r1".into(),
            record_uri: "at://did:ex:A/app.bsky.feed.post/r1".into(),
            subject_uri: None,
            parent_uri: None,
            follow_status: None,
            synctimestamp: ts,
            partition_date: NormalizedRecord::partition_date_for(ts),
            body: RecordBody::Post {
                text: "hi".into(),
                created_at: None,
                reply_parent: None,
                reply_root: None,
                langs: vec![],
            },
        }
    }

    #[test]
    fn partition_date_is_utc_calendar_day() {
        let r = sample();
        assert_eq!(r.partition_date.to_string(), "2024-09-01");
    }

    #[test]
    fn json_round_trip_preserves_record() {
        let r = sample();
        let json = serde_json::to_string(&r).unwrap();
        let back: NormalizedRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn tombstone_serializes_without_payload_fields() {
        let json = serde_json::to_value(RecordBody::Tombstone).unwrap();
        assert_eq!(json, serde_json::json!({ "shape": "tombstone" }));
    }
}
