//! Config-driven cache handlers.
//!
//! Each cache subtree is described by a [`HandlerConfig`]: a static base
//! path, an optional record-derived nested segment, the strategy the
//! exporter uses to enumerate it, and whether records must carry a follow
//! status. [`GenericHandler`] is the single write implementation driven by
//! that config; there is one handler instance per subtree in the
//! [`HandlerRegistry`].

use crate::fileio;
use crate::paths;
use bsync_core::{HandlerError, NormalizedRecord, RecordBody};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Identity of a cache subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HandlerKey {
    Post,
    Like,
    Follow,
    LikeOnUserPost,
    ReplyToUserPost,
    InNetworkPost,
    Tombstone,
}

impl HandlerKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKey::Post => "post",
            HandlerKey::Like => "like",
            HandlerKey::Follow => "follow",
            HandlerKey::LikeOnUserPost => "like_on_user_post",
            HandlerKey::ReplyToUserPost => "reply_to_user_post",
            HandlerKey::InNetworkPost => "in_network_post",
            HandlerKey::Tombstone => "tombstone",
        }
    }
}

/// How the exporter enumerates a subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStrategy {
    /// All JSON files directly under the subtree.
    Flat,
    /// One level of uri-suffix directories, flattened.
    NestedByUri,
    /// `follower/` and `followee/` subdirectories, records tagged by status.
    SplitByFollowStatus,
    /// One directory per author id, records tagged with the author.
    SplitByAuthor,
}

type NestedPathFn = fn(&NormalizedRecord) -> Result<String, HandlerError>;

/// Declarative description of one cache subtree.
#[derive(Debug, Clone, Copy)]
pub struct HandlerConfig {
    pub key: HandlerKey,
    pub base_segments: &'static [&'static str],
    pub nested_path: Option<NestedPathFn>,
    pub read_strategy: ReadStrategy,
    pub requires_follow_status: bool,
}

impl HandlerConfig {
    /// Subtree root relative to the cache root.
    pub fn subtree_rel(&self) -> PathBuf {
        self.base_segments.iter().collect()
    }

    /// Cache-relative path for a record, a pure function of its contents.
    pub fn relative_path(&self, record: &NormalizedRecord) -> Result<PathBuf, HandlerError> {
        if self.requires_follow_status && record.follow_status.is_none() {
            return Err(HandlerError::InvalidRecord("follow_status"));
        }
        let mut path = self.subtree_rel();
        if let Some(nested) = self.nested_path {
            let segment = nested(record)?;
            if !paths::is_safe_segment(&segment) {
                return Err(HandlerError::PathViolation(segment));
            }
            path.push(segment);
        }
        path.push(paths::filename(record));
        Ok(path)
    }
}

fn like_subject_suffix(record: &NormalizedRecord) -> Result<String, HandlerError> {
    record
        .subject_uri
        .as_deref()
        .map(paths::uri_suffix)
        .ok_or(HandlerError::InvalidRecord("subject_uri"))
}

fn reply_parent_suffix(record: &NormalizedRecord) -> Result<String, HandlerError> {
    record
        .parent_uri
        .as_deref()
        .map(paths::uri_suffix)
        .ok_or(HandlerError::InvalidRecord("parent_uri"))
}

fn follow_status_segment(record: &NormalizedRecord) -> Result<String, HandlerError> {
    record
        .follow_status
        .map(|s| s.as_str().to_string())
        .ok_or(HandlerError::InvalidRecord("follow_status"))
}

fn author_segment(record: &NormalizedRecord) -> Result<String, HandlerError> {
    if record.author_id.is_empty() {
        return Err(HandlerError::InvalidRecord("author_id"));
    }
    Ok(paths::sanitize_segment(&record.author_id))
}

/// The full set of cache subtrees, one config per classification.
pub fn default_handler_configs() -> Vec<HandlerConfig> {
    vec![
        HandlerConfig {
            key: HandlerKey::Post,
            base_segments: &[paths::STUDY_USER_ACTIVITY, "create", "post"],
            nested_path: None,
            read_strategy: ReadStrategy::Flat,
            requires_follow_status: false,
        },
        HandlerConfig {
            key: HandlerKey::Like,
            base_segments: &[paths::STUDY_USER_ACTIVITY, "create", "like"],
            nested_path: Some(like_subject_suffix),
            read_strategy: ReadStrategy::NestedByUri,
            requires_follow_status: false,
        },
        HandlerConfig {
            key: HandlerKey::Follow,
            base_segments: &[paths::STUDY_USER_ACTIVITY, "create", "follow"],
            nested_path: Some(follow_status_segment),
            read_strategy: ReadStrategy::SplitByFollowStatus,
            requires_follow_status: true,
        },
        HandlerConfig {
            key: HandlerKey::LikeOnUserPost,
            base_segments: &[paths::STUDY_USER_ACTIVITY, "create", "like_on_user_post"],
            nested_path: Some(like_subject_suffix),
            read_strategy: ReadStrategy::NestedByUri,
            requires_follow_status: false,
        },
        HandlerConfig {
            key: HandlerKey::ReplyToUserPost,
            base_segments: &[paths::STUDY_USER_ACTIVITY, "create", "reply_to_user_post"],
            nested_path: Some(reply_parent_suffix),
            read_strategy: ReadStrategy::NestedByUri,
            requires_follow_status: false,
        },
        HandlerConfig {
            key: HandlerKey::Tombstone,
            base_segments: &[paths::STUDY_USER_ACTIVITY, "delete"],
            nested_path: None,
            read_strategy: ReadStrategy::Flat,
            requires_follow_status: false,
        },
        HandlerConfig {
            key: HandlerKey::InNetworkPost,
            base_segments: &[paths::IN_NETWORK_USER_ACTIVITY, "create", "post"],
            nested_path: Some(author_segment),
            read_strategy: ReadStrategy::SplitByAuthor,
            requires_follow_status: false,
        },
    ]
}

/// Writes normalized records into one subtree. All side effects stay under
/// `root.join(config.subtree_rel())`.
#[derive(Debug, Clone)]
pub struct GenericHandler {
    config: HandlerConfig,
    root: PathBuf,
}

impl GenericHandler {
    pub fn new(config: HandlerConfig, root: &Path) -> Self {
        Self {
            config,
            root: root.to_path_buf(),
        }
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    /// Persists a record and returns the absolute path written.
    pub fn write(&self, record: &NormalizedRecord) -> Result<PathBuf, HandlerError> {
        self.validate(record)?;
        let rel = self.config.relative_path(record)?;
        let abs = self.root.join(rel);
        fileio::write_json_atomic(&abs, record)?;
        Ok(abs)
    }

    fn validate(&self, record: &NormalizedRecord) -> Result<(), HandlerError> {
        if record.author_id.is_empty() {
            return Err(HandlerError::InvalidRecord("author_id"));
        }
        if record.record_key.is_empty() {
            return Err(HandlerError::InvalidRecord("record_key"));
        }
        match (&self.config.key, &record.body) {
            (HandlerKey::Like | HandlerKey::LikeOnUserPost, RecordBody::Like { .. }) => Ok(()),
            (HandlerKey::Follow, RecordBody::Follow { .. }) => Ok(()),
            (
                HandlerKey::Post | HandlerKey::InNetworkPost | HandlerKey::ReplyToUserPost,
                RecordBody::Post { .. },
            ) => Ok(()),
            (HandlerKey::Tombstone, RecordBody::Tombstone) => Ok(()),
            _ => Err(HandlerError::InvalidRecord("body")),
        }
    }
}

/// All handlers, keyed by subtree.
#[derive(Debug, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<HandlerKey, GenericHandler>,
}

impl HandlerRegistry {
    pub fn new(cache_root: &Path) -> Self {
        Self::with_configs(cache_root, default_handler_configs())
    }

    pub fn with_configs(cache_root: &Path, configs: Vec<HandlerConfig>) -> Self {
        let handlers = configs
            .into_iter()
            .map(|cfg| (cfg.key, GenericHandler::new(cfg, cache_root)))
            .collect();
        Self { handlers }
    }

    pub fn get(&self, key: HandlerKey) -> Option<&GenericHandler> {
        self.handlers.get(&key)
    }

    pub fn configs(&self) -> Vec<HandlerConfig> {
        let mut configs: Vec<_> = self.handlers.values().map(|h| *h.config()).collect();
        configs.sort_by_key(|c| c.key);
        configs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bsync_core::{FollowStatus, Operation, RecordType};
    use chrono::Utc;

    fn post_record() -> NormalizedRecord {
        let ts = Utc::now();
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
    fn post_path_matches_layout() {
        let configs = default_handler_configs();
        let post = configs.iter().find(|c| c.key == HandlerKey::Post).unwrap();
        let rel = post.relative_path(&post_record()).unwrap();
        assert_eq!(
            rel,
            PathBuf::from("study_user_activity/create/post/author_id=did:ex:A_record_key=r1.json")
        );
    }

    #[test]
    fn follow_requires_status() {
        let configs = default_handler_configs();
        let follow = configs.iter().find(|c| c.key == HandlerKey::Follow).unwrap();
        let mut rec = post_record();
        rec.record_type = RecordType::Follow;
        rec.body = RecordBody::Follow {
            subject_id: "did:ex:B".into(),
            created_at: None,
        };
        assert!(matches!(
            follow.relative_path(&rec),
            Err(HandlerError::InvalidRecord("follow_status"))
        ));
        rec.follow_status = Some(FollowStatus::Followee);
        let rel = follow.relative_path(&rec).unwrap();
        assert!(rel.starts_with("study_user_activity/create/follow/followee"));
    }

    #[test]
    fn nested_like_path_uses_subject_suffix() {
        let configs = default_handler_configs();
        let cfg = configs
            .iter()
            .find(|c| c.key == HandlerKey::LikeOnUserPost)
            .unwrap();
        let mut rec = post_record();
        rec.record_type = RecordType::LikeOnUserPost;
        rec.subject_uri = Some("at://did:ex:A/app.bsky.feed.post/r1".into());
        rec.body = RecordBody::Like {
            subject_uri: "at://did:ex:A/app.bsky.feed.post/r1".into(),
            created_at: None,
        };
        let rel = cfg.relative_path(&rec).unwrap();
        assert_eq!(
            rel,
            PathBuf::from(
                "study_user_activity/create/like_on_user_post/\
                 did:ex:A_app.bsky.feed.post_r1/author_id=did:ex:A_record_key=r1.json"
            )
        );
    }

    #[test]
    fn write_is_idempotent_on_replay() {
        let dir = tempfile::tempdir().unwrap();
        let registry = HandlerRegistry::new(dir.path());
        let handler = registry.get(HandlerKey::Post).unwrap();
        let rec = post_record();
        let first = handler.write(&rec).unwrap();
        let second = handler.write(&rec).unwrap();
        assert_eq!(first, second);
        let back: NormalizedRecord = fileio::read_json(&first).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn mismatched_body_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let registry = HandlerRegistry::new(dir.path());
        let handler = registry.get(HandlerKey::Like).unwrap();
        let rec = post_record();
        assert!(matches!(
            handler.write(&rec),
            Err(HandlerError::InvalidRecord("body"))
        ));
    }
}
