//! Record processors.
//!
//! A processor is a pure function from one raw commit operation plus a
//! registry snapshot to a list of routing decisions. Processors are keyed
//! by `(kind, collection)`; an op with no processor is a classification
//! miss, counted and dropped.

use crate::wire::{COLLECTION_FOLLOW, COLLECTION_LIKE, COLLECTION_POST};
use bsync_cache::{HandlerKey, RegistrySnapshot};
use bsync_core::{
    FollowStatus, NormalizedRecord, OpKind, Operation, RawOp, RecordBody, RecordType,
};
use chrono::{DateTime, Utc};

/// One classified record headed for one cache subtree.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub handler: HandlerKey,
    pub record: NormalizedRecord,
}

/// Per-op inputs shared by every processor.
pub struct OpContext<'a> {
    pub actor_id: &'a str,
    pub op: &'a RawOp,
    pub synctimestamp: DateTime<Utc>,
}

impl OpContext<'_> {
    fn record_uri(&self) -> String {
        format!(
            "at://{}/{}/{}",
            self.actor_id, self.op.collection, self.op.record_key
        )
    }

    fn envelope(
        &self,
        op: Operation,
        record_type: RecordType,
        body: RecordBody,
    ) -> NormalizedRecord {
        NormalizedRecord {
            op,
            record_type,
            author_id: self.actor_id.to_string(),
            record_key: self.op.record_key.clone(),
            record_uri: self.record_uri(),
            subject_uri: None,
            parent_uri: None,
            follow_status: None,
            synctimestamp: self.synctimestamp,
            partition_date: NormalizedRecord::partition_date_for(self.synctimestamp),
            body,
        }
    }
}

pub type ProcessorFn = fn(&OpContext<'_>, &RegistrySnapshot) -> Vec<RoutingDecision>;

/// Processor lookup table.
pub fn processor_for(kind: OpKind, collection: &str) -> Option<ProcessorFn> {
    match (kind, collection) {
        (OpKind::Create, COLLECTION_POST) => Some(process_post_create),
        (OpKind::Create, COLLECTION_LIKE) => Some(process_like_create),
        (OpKind::Create, COLLECTION_FOLLOW) => Some(process_follow_create),
        (OpKind::Delete, COLLECTION_POST | COLLECTION_LIKE | COLLECTION_FOLLOW) => {
            Some(process_delete)
        }
        _ => None,
    }
}

/// Posts and replies share a collection. A study-user post is always
/// emitted as `POST`; an in-network author adds `IN_NETWORK_POST`; a reply
/// whose parent is a known study-user post adds `REPLY_TO_USER_POST`
/// regardless of who the replier is.
fn process_post_create(ctx: &OpContext<'_>, snap: &RegistrySnapshot) -> Vec<RoutingDecision> {
    let payload = &ctx.op.payload;
    let reply_parent = payload["reply"]["parent"]["uri"]
        .as_str()
        .map(str::to_string);
    let reply_root = payload["reply"]["root"]["uri"].as_str().map(str::to_string);
    let body = RecordBody::Post {
        text: payload["text"].as_str().unwrap_or_default().to_string(),
        created_at: payload["createdAt"].as_str().map(str::to_string),
        reply_parent: reply_parent.clone(),
        reply_root,
        langs: payload["langs"]
            .as_array()
            .map(|langs| {
                langs
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default(),
    };

    let mut decisions = Vec::new();
    if snap.is_study_user(ctx.actor_id) {
        let mut record = ctx.envelope(Operation::Create, RecordType::Post, body.clone());
        record.parent_uri = reply_parent.clone();
        decisions.push(RoutingDecision {
            handler: HandlerKey::Post,
            record,
        });
    }
    if snap.is_in_network_user(ctx.actor_id) {
        let mut record = ctx.envelope(Operation::Create, RecordType::InNetworkPost, body.clone());
        record.parent_uri = reply_parent.clone();
        decisions.push(RoutingDecision {
            handler: HandlerKey::InNetworkPost,
            record,
        });
    }
    if let Some(parent) = reply_parent {
        if snap.study_user_post_author(&parent).is_some() {
            let mut record = ctx.envelope(Operation::Create, RecordType::ReplyToUserPost, body);
            record.parent_uri = Some(parent);
            decisions.push(RoutingDecision {
                handler: HandlerKey::ReplyToUserPost,
                record,
            });
        }
    }
    decisions
}

/// A like by a study user is emitted as `LIKE`; a like whose subject is a
/// known study-user post is additionally emitted as `LIKE_ON_USER_POST`,
/// whoever the liker is.
fn process_like_create(ctx: &OpContext<'_>, snap: &RegistrySnapshot) -> Vec<RoutingDecision> {
    let Some(subject_uri) = ctx.op.payload["subject"]["uri"].as_str().map(str::to_string) else {
        // A like without a subject cannot be classified at all.
        return Vec::new();
    };
    let body = RecordBody::Like {
        subject_uri: subject_uri.clone(),
        created_at: ctx.op.payload["createdAt"].as_str().map(str::to_string),
    };

    let mut decisions = Vec::new();
    if snap.is_study_user(ctx.actor_id) {
        let mut record = ctx.envelope(Operation::Create, RecordType::Like, body.clone());
        record.subject_uri = Some(subject_uri.clone());
        decisions.push(RoutingDecision {
            handler: HandlerKey::Like,
            record,
        });
    }
    if snap.study_user_post_author(&subject_uri).is_some() {
        let mut record = ctx.envelope(Operation::Create, RecordType::LikeOnUserPost, body);
        record.subject_uri = Some(subject_uri);
        decisions.push(RoutingDecision {
            handler: HandlerKey::LikeOnUserPost,
            record,
        });
    }
    decisions
}

/// A follow is emitted once per side that is a study user: with status
/// `FOLLOWEE` when the subject is enrolled, and `FOLLOWER` when the actor
/// is. Both can hold.
fn process_follow_create(ctx: &OpContext<'_>, snap: &RegistrySnapshot) -> Vec<RoutingDecision> {
    let Some(subject_id) = ctx.op.payload["subject"].as_str().map(str::to_string) else {
        return Vec::new();
    };
    let body = RecordBody::Follow {
        subject_id: subject_id.clone(),
        created_at: ctx.op.payload["createdAt"].as_str().map(str::to_string),
    };

    let mut decisions = Vec::new();
    if snap.is_study_user(&subject_id) {
        let mut record = ctx.envelope(Operation::Create, RecordType::Follow, body.clone());
        record.subject_uri = Some(subject_id.clone());
        record.follow_status = Some(FollowStatus::Followee);
        decisions.push(RoutingDecision {
            handler: HandlerKey::Follow,
            record,
        });
    }
    if snap.is_study_user(ctx.actor_id) {
        let mut record = ctx.envelope(Operation::Create, RecordType::Follow, body);
        record.subject_uri = Some(subject_id);
        record.follow_status = Some(FollowStatus::Follower);
        decisions.push(RoutingDecision {
            handler: HandlerKey::Follow,
            record,
        });
    }
    decisions
}

/// Deletes carry no payload, so classification falls back to the actor: a
/// study user's delete becomes a tombstone in the `delete/` subtree. The
/// in-network tree keeps no delete branch, so other deletes are dropped.
fn process_delete(ctx: &OpContext<'_>, snap: &RegistrySnapshot) -> Vec<RoutingDecision> {
    if !snap.is_study_user(ctx.actor_id) {
        return Vec::new();
    }
    let record_type = match ctx.op.collection.as_str() {
        COLLECTION_POST => RecordType::Post,
        COLLECTION_LIKE => RecordType::Like,
        COLLECTION_FOLLOW => RecordType::Follow,
        _ => return Vec::new(),
    };
    vec![RoutingDecision {
        handler: HandlerKey::Tombstone,
        record: ctx.envelope(Operation::Delete, record_type, RecordBody::Tombstone),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use bsync_cache::registry::parse_snapshot;
    use serde_json::json;

    fn snapshot() -> RegistrySnapshot {
        let raw = concat!(
            "{\"entry\":\"study_user\",\"actor_id\":\"did:ex:A\"}\n",
            "{\"entry\":\"in_network_user\",\"actor_id\":\"did:ex:A\"}\n",
            "{\"entry\":\"in_network_user\",\"actor_id\":\"did:ex:N\"}\n",
            "{\"entry\":\"study_user_post\",",
            "\"post_uri\":\"at://did:ex:A/app.bsky.feed.post/r1\",",
            "\"author_id\":\"did:ex:A\"}\n",
        );
        parse_snapshot(raw).0
    }

    fn ctx<'a>(actor: &'a str, op: &'a RawOp) -> OpContext<'a> {
        OpContext {
            actor_id: actor,
            op,
            synctimestamp: Utc::now(),
        }
    }

    fn post_op(rkey: &str, payload: serde_json::Value) -> RawOp {
        RawOp {
            kind: OpKind::Create,
            collection: COLLECTION_POST.into(),
            record_key: rkey.into(),
            payload,
        }
    }

    #[test]
    fn study_and_in_network_post_fans_out() {
        let op = post_op("r2", json!({"text": "hi"}));
        let decisions = process_post_create(&ctx("did:ex:A", &op), &snapshot());
        let keys: Vec<_> = decisions.iter().map(|d| d.handler).collect();
        assert_eq!(keys, vec![HandlerKey::Post, HandlerKey::InNetworkPost]);
        assert!(decisions
            .iter()
            .all(|d| d.record.record_uri == "at://did:ex:A/app.bsky.feed.post/r2"));
    }

    #[test]
    fn outsider_post_emits_nothing() {
        let op = post_op("r2", json!({"text": "hi"}));
        assert!(process_post_create(&ctx("did:ex:X", &op), &snapshot()).is_empty());
    }

    #[test]
    fn reply_to_study_post_is_emitted_for_any_author() {
        let op = post_op(
            "r9",
            json!({
                "text": "nice",
                "reply": {"parent": {"uri": "at://did:ex:A/app.bsky.feed.post/r1"},
                          "root": {"uri": "at://did:ex:A/app.bsky.feed.post/r1"}}
            }),
        );
        let decisions = process_post_create(&ctx("did:ex:X", &op), &snapshot());
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].handler, HandlerKey::ReplyToUserPost);
        assert_eq!(
            decisions[0].record.parent_uri.as_deref(),
            Some("at://did:ex:A/app.bsky.feed.post/r1")
        );
    }

    #[test]
    fn like_by_outsider_on_study_post_classifies_once() {
        let op = RawOp {
            kind: OpKind::Create,
            collection: COLLECTION_LIKE.into(),
            record_key: "l1".into(),
            payload: json!({"subject": {"uri": "at://did:ex:A/app.bsky.feed.post/r1"}}),
        };
        let decisions = process_like_create(&ctx("did:ex:B", &op), &snapshot());
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].handler, HandlerKey::LikeOnUserPost);
    }

    #[test]
    fn like_by_study_user_on_study_post_classifies_twice() {
        let op = RawOp {
            kind: OpKind::Create,
            collection: COLLECTION_LIKE.into(),
            record_key: "l2".into(),
            payload: json!({"subject": {"uri": "at://did:ex:A/app.bsky.feed.post/r1"}}),
        };
        let decisions = process_like_create(&ctx("did:ex:A", &op), &snapshot());
        let keys: Vec<_> = decisions.iter().map(|d| d.handler).collect();
        assert_eq!(keys, vec![HandlerKey::Like, HandlerKey::LikeOnUserPost]);
    }

    #[test]
    fn follow_between_study_users_emits_both_directions() {
        let raw = concat!(
            "{\"entry\":\"study_user\",\"actor_id\":\"did:ex:A\"}\n",
            "{\"entry\":\"study_user\",\"actor_id\":\"did:ex:B\"}\n",
        );
        let snap = parse_snapshot(raw).0;
        let op = RawOp {
            kind: OpKind::Create,
            collection: COLLECTION_FOLLOW.into(),
            record_key: "f1".into(),
            payload: json!({"subject": "did:ex:B"}),
        };
        let decisions = process_follow_create(&ctx("did:ex:A", &op), &snap);
        let statuses: Vec<_> = decisions
            .iter()
            .map(|d| d.record.follow_status.unwrap())
            .collect();
        assert_eq!(statuses, vec![FollowStatus::Followee, FollowStatus::Follower]);
        assert!(decisions.iter().all(|d| d.handler == HandlerKey::Follow));
    }

    #[test]
    fn delete_by_study_user_becomes_tombstone() {
        let op = RawOp {
            kind: OpKind::Delete,
            collection: COLLECTION_POST.into(),
            record_key: "gone".into(),
            payload: serde_json::Value::Null,
        };
        let decisions = process_delete(&ctx("did:ex:A", &op), &snapshot());
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].handler, HandlerKey::Tombstone);
        assert_eq!(decisions[0].record.op, Operation::Delete);
        assert_eq!(decisions[0].record.body, RecordBody::Tombstone);
    }

    #[test]
    fn delete_by_outsider_is_dropped() {
        let op = RawOp {
            kind: OpKind::Delete,
            collection: COLLECTION_POST.into(),
            record_key: "gone".into(),
            payload: serde_json::Value::Null,
        };
        assert!(process_delete(&ctx("did:ex:X", &op), &snapshot()).is_empty());
    }

    #[test]
    fn unknown_collection_has_no_processor() {
        assert!(processor_for(OpKind::Create, "app.bsky.feed.repost").is_none());
        assert!(processor_for(OpKind::Create, COLLECTION_POST).is_some());
        assert!(processor_for(OpKind::Delete, COLLECTION_FOLLOW).is_some());
    }
}
