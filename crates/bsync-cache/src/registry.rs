//! Study-user membership oracle.
//!
//! Classification runs against an immutable [`RegistrySnapshot`] published
//! through an atomic pointer swap; a background refresher rebuilds it from
//! an external line-delimited JSON source on an interval. Posts seen on the
//! live stream are layered on through a copy-on-write overlay so likes and
//! replies arriving moments later classify correctly without waiting for
//! the next refresh.

use arc_swap::ArcSwap;
use bsync_core::config::ObjectStoreConfig;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Immutable membership view used for an entire frame.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    study_users: HashSet<String>,
    in_network_users: HashSet<String>,
    post_index: HashMap<String, String>,
}

impl RegistrySnapshot {
    pub fn new(
        study_users: HashSet<String>,
        in_network_users: HashSet<String>,
        post_index: HashMap<String, String>,
    ) -> Self {
        Self {
            study_users,
            in_network_users,
            post_index,
        }
    }

    pub fn is_study_user(&self, actor_id: &str) -> bool {
        self.study_users.contains(actor_id)
    }

    pub fn is_in_network_user(&self, actor_id: &str) -> bool {
        self.in_network_users.contains(actor_id)
    }

    pub fn study_user_post_author(&self, post_uri: &str) -> Option<&str> {
        self.post_index.get(post_uri).map(String::as_str)
    }

    pub fn len_study_users(&self) -> usize {
        self.study_users.len()
    }

    pub fn len_post_index(&self) -> usize {
        self.post_index.len()
    }
}

/// One line of the external registry source.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum RegistryEntry {
    StudyUser { actor_id: String },
    InNetworkUser { actor_id: String },
    StudyUserPost { post_uri: String, author_id: String },
}

/// Parses a line-delimited JSON snapshot. Malformed lines are skipped and
/// counted rather than failing the whole load.
pub fn parse_snapshot(raw: &str) -> (RegistrySnapshot, usize) {
    let mut snapshot = RegistrySnapshot::default();
    let mut skipped = 0usize;
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<RegistryEntry>(line) {
            Ok(RegistryEntry::StudyUser { actor_id }) => {
                snapshot.study_users.insert(actor_id);
            }
            Ok(RegistryEntry::InNetworkUser { actor_id }) => {
                snapshot.in_network_users.insert(actor_id);
            }
            Ok(RegistryEntry::StudyUserPost { post_uri, author_id }) => {
                snapshot.post_index.insert(post_uri, author_id);
            }
            Err(e) => {
                skipped += 1;
                debug!(error = %e, "skipping malformed registry line");
            }
        }
    }
    (snapshot, skipped)
}

/// Where the external snapshot lives.
pub enum RegistrySource {
    File(PathBuf),
    Object {
        store: Arc<dyn ObjectStore>,
        path: ObjectPath,
    },
}

impl RegistrySource {
    /// Resolves a `source` string: `s3://bucket/key` against the configured
    /// object store, anything else as a local path.
    pub fn from_config(
        source: &str,
        object_store: Option<&ObjectStoreConfig>,
    ) -> anyhow::Result<Self> {
        match source.strip_prefix("s3://") {
            Some(rest) => {
                let (bucket, key) = rest
                    .split_once('/')
                    .ok_or_else(|| anyhow::anyhow!("registry source {source} has no key"))?;
                let cfg = object_store.ok_or_else(|| {
                    anyhow::anyhow!("registry source {source} requires object_store config")
                })?;
                let store = build_s3(cfg, bucket)?;
                Ok(RegistrySource::Object {
                    store: Arc::new(store),
                    path: ObjectPath::from(key),
                })
            }
            None => Ok(RegistrySource::File(PathBuf::from(source))),
        }
    }

    pub async fn load(&self) -> anyhow::Result<RegistrySnapshot> {
        let raw = match self {
            RegistrySource::File(path) => tokio::fs::read_to_string(path).await?,
            RegistrySource::Object { store, path } => {
                let data = store.get(path).await?.bytes().await?;
                String::from_utf8(data.to_vec())?
            }
        };
        let (snapshot, skipped) = parse_snapshot(&raw);
        if skipped > 0 {
            warn!(skipped, "registry snapshot contained malformed lines");
        }
        Ok(snapshot)
    }
}

/// Builds an S3-compatible store from the shared credentials block.
pub fn build_s3(
    cfg: &ObjectStoreConfig,
    bucket: &str,
) -> Result<impl ObjectStore, object_store::Error> {
    AmazonS3Builder::new()
        .with_bucket_name(bucket)
        .with_endpoint(&cfg.endpoint)
        .with_access_key_id(&cfg.access_key)
        .with_secret_access_key(&cfg.secret_key)
        .with_region(&cfg.region)
        .with_allow_http(cfg.allow_http)
        .build()
}

/// Membership oracle with an atomically swapped snapshot and a serialized
/// copy-on-write overlay for posts observed on the live stream.
pub struct StudyUserRegistry {
    current: ArcSwap<RegistrySnapshot>,
    overlay: Mutex<HashMap<String, String>>,
}

impl StudyUserRegistry {
    pub fn new(initial: RegistrySnapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
            overlay: Mutex::new(HashMap::new()),
        }
    }

    pub fn empty() -> Self {
        Self::new(RegistrySnapshot::default())
    }

    /// The current immutable view. Cheap; never blocks writers.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.load_full()
    }

    /// Records a just-seen study-user post so same-stream likes and replies
    /// classify against it immediately. Published as a copy-on-write delta
    /// over the current snapshot.
    pub fn insert_study_user_post(&self, post_uri: &str, author_id: &str) {
        let mut overlay = self
            .overlay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let newly_seen = overlay
            .insert(post_uri.to_string(), author_id.to_string())
            .is_none();
        if !newly_seen {
            return;
        }
        let mut next = (**self.current.load()).clone();
        next.post_index
            .insert(post_uri.to_string(), author_id.to_string());
        self.current.store(Arc::new(next));
    }

    /// Installs an externally refreshed snapshot. The refreshed source
    /// supersedes the overlay, which is cleared.
    pub fn install_refreshed(&self, snapshot: RegistrySnapshot) {
        let mut overlay = self
            .overlay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        overlay.clear();
        self.current.store(Arc::new(snapshot));
    }

    pub fn overlay_len(&self) -> usize {
        self.overlay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// Periodic refresh loop. A failed reload is logged and counted; the last
/// good snapshot keeps serving.
pub async fn run_refresher(
    registry: Arc<StudyUserRegistry>,
    source: RegistrySource,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
        match source.load().await {
            Ok(snapshot) => {
                info!(
                    study_users = snapshot.len_study_users(),
                    post_index = snapshot.len_post_index(),
                    "installed refreshed study-user registry"
                );
                registry.install_refreshed(snapshot);
            }
            Err(e) => {
                metrics::counter!("bsync_registry_refresh_failures", 1);
                warn!(error = %e, "registry refresh failed; keeping last good snapshot");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_line_delimited_entries() {
        let raw = r#"
{"entry":"study_user","actor_id":"did:ex:A"}
{"entry":"in_network_user","actor_id":"did:ex:N"}
{"entry":"study_user_post","post_uri":"at://did:ex:A/app.bsky.feed.post/r1","author_id":"did:ex:A"}
not json
"#;
        let (snap, skipped) = parse_snapshot(raw);
        assert!(snap.is_study_user("did:ex:A"));
        assert!(!snap.is_study_user("did:ex:N"));
        assert!(snap.is_in_network_user("did:ex:N"));
        assert_eq!(
            snap.study_user_post_author("at://did:ex:A/app.bsky.feed.post/r1"),
            Some("did:ex:A")
        );
        assert_eq!(skipped, 1);
    }

    #[test]
    fn overlay_is_visible_in_later_snapshots() {
        let registry = StudyUserRegistry::empty();
        let before = registry.snapshot();
        registry.insert_study_user_post("at://did:ex:A/app.bsky.feed.post/r1", "did:ex:A");
        // The snapshot taken before the insert is unchanged.
        assert!(before.study_user_post_author("at://did:ex:A/app.bsky.feed.post/r1").is_none());
        let after = registry.snapshot();
        assert_eq!(
            after.study_user_post_author("at://did:ex:A/app.bsky.feed.post/r1"),
            Some("did:ex:A")
        );
    }

    #[test]
    fn refresh_supersedes_overlay() {
        let registry = StudyUserRegistry::empty();
        registry.insert_study_user_post("at://u", "did:ex:A");
        assert_eq!(registry.overlay_len(), 1);

        let mut study = HashSet::new();
        study.insert("did:ex:B".to_string());
        registry.install_refreshed(RegistrySnapshot::new(
            study,
            HashSet::new(),
            HashMap::new(),
        ));
        assert_eq!(registry.overlay_len(), 0);
        let snap = registry.snapshot();
        assert!(snap.is_study_user("did:ex:B"));
        assert!(snap.study_user_post_author("at://u").is_none());
    }

    #[tokio::test]
    async fn file_source_loads_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.jsonl");
        std::fs::write(
            &path,
            "{\"entry\":\"study_user\",\"actor_id\":\"did:ex:A\"}\n",
        )
        .unwrap();
        let source = RegistrySource::from_config(path.to_str().unwrap(), None).unwrap();
        let snap = source.load().await.unwrap();
        assert!(snap.is_study_user("did:ex:A"));
    }
}
