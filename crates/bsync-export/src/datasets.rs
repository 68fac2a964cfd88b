//! Logical datasets and the columnar row shape.
//!
//! Every output row shares one flat schema; `dataset_for` decides which
//! logical dataset a cached record belongs to. Both follow subtrees feed
//! `scraped_user_social_network`; tombstones feed the dataset of their
//! record type with `operation = "delete"`.

use arrow_array::{ArrayRef, RecordBatch, StringArray};
use arrow_schema::{ArrowError, DataType, Field, Schema, SchemaRef};
use bsync_core::{NormalizedRecord, Operation, RecordType};
use std::sync::Arc;

pub const STUDY_USER_ACTIVITY_POST: &str = "study_user_activity_post";
pub const STUDY_USER_ACTIVITY_LIKE: &str = "study_user_activity_like";
pub const STUDY_USER_ACTIVITY_FOLLOW: &str = "study_user_activity_follow";
pub const STUDY_USER_ACTIVITY_REPLY: &str = "study_user_activity_reply";
pub const STUDY_USER_ACTIVITY_LIKE_ON_USER_POST: &str = "study_user_activity_like_on_user_post";
pub const STUDY_USER_ACTIVITY_REPLY_TO_USER_POST: &str = "study_user_activity_reply_to_user_post";
pub const SCRAPED_USER_SOCIAL_NETWORK: &str = "scraped_user_social_network";
pub const IN_NETWORK_USER_ACTIVITY: &str = "in_network_user_activity";

/// Maps a cached record to its logical dataset.
pub fn dataset_for(record: &NormalizedRecord) -> &'static str {
    match (record.op, record.record_type) {
        (Operation::Delete, RecordType::Post) => STUDY_USER_ACTIVITY_POST,
        (Operation::Delete, RecordType::Like) => STUDY_USER_ACTIVITY_LIKE,
        (Operation::Delete, RecordType::Follow) => STUDY_USER_ACTIVITY_FOLLOW,
        (Operation::Delete, _) => STUDY_USER_ACTIVITY_POST,
        (Operation::Create, RecordType::Post) => {
            if record.parent_uri.is_some() {
                STUDY_USER_ACTIVITY_REPLY
            } else {
                STUDY_USER_ACTIVITY_POST
            }
        }
        (Operation::Create, RecordType::Like) => STUDY_USER_ACTIVITY_LIKE,
        (Operation::Create, RecordType::Follow) => SCRAPED_USER_SOCIAL_NETWORK,
        (Operation::Create, RecordType::LikeOnUserPost) => STUDY_USER_ACTIVITY_LIKE_ON_USER_POST,
        (Operation::Create, RecordType::ReplyToUserPost) => STUDY_USER_ACTIVITY_REPLY_TO_USER_POST,
        (Operation::Create, RecordType::InNetworkPost) => IN_NETWORK_USER_ACTIVITY,
    }
}

/// The shared output schema. `synctimestamp` is ISO-8601 UTC and
/// `partition_date` its calendar day, duplicated into the row so readers
/// that lose the hive path still have the partition key.
pub fn output_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("operation", DataType::Utf8, false),
        Field::new("record_type", DataType::Utf8, false),
        Field::new("author_id", DataType::Utf8, false),
        Field::new("record_key", DataType::Utf8, false),
        Field::new("record_uri", DataType::Utf8, false),
        Field::new("subject_uri", DataType::Utf8, true),
        Field::new("parent_uri", DataType::Utf8, true),
        Field::new("follow_status", DataType::Utf8, true),
        Field::new("text", DataType::Utf8, true),
        Field::new("created_at", DataType::Utf8, true),
        Field::new("synctimestamp", DataType::Utf8, false),
        Field::new("partition_date", DataType::Utf8, false),
    ]))
}

/// Builds one arrow batch from a group of records.
pub fn batch_from_records(records: &[NormalizedRecord]) -> Result<RecordBatch, ArrowError> {
    let required = |f: fn(&NormalizedRecord) -> String| -> ArrayRef {
        Arc::new(StringArray::from(
            records.iter().map(f).collect::<Vec<_>>(),
        ))
    };
    let optional = |f: fn(&NormalizedRecord) -> Option<String>| -> ArrayRef {
        Arc::new(StringArray::from(
            records.iter().map(f).collect::<Vec<_>>(),
        ))
    };

    RecordBatch::try_new(
        output_schema(),
        vec![
            required(|r: &NormalizedRecord| r.op.as_str().to_string()),
            required(|r: &NormalizedRecord| r.record_type.as_str().to_string()),
            required(|r: &NormalizedRecord| r.author_id.clone()),
            required(|r: &NormalizedRecord| r.record_key.clone()),
            required(|r: &NormalizedRecord| r.record_uri.clone()),
            optional(|r: &NormalizedRecord| r.subject_uri.clone()),
            optional(|r: &NormalizedRecord| r.parent_uri.clone()),
            optional(|r: &NormalizedRecord| r.follow_status.map(|s| s.as_str().to_string())),
            optional(|r: &NormalizedRecord| r.body.text().map(str::to_string)),
            optional(|r: &NormalizedRecord| r.body.created_at().map(str::to_string)),
            required(|r: &NormalizedRecord| r.synctimestamp.to_rfc3339()),
            required(|r: &NormalizedRecord| r.partition_date.to_string()),
        ],
    )
}
