//! Raw wire events through parse and dispatch to cache files.

use bsync_cache::registry::parse_snapshot;
use bsync_cache::{fileio, HandlerRegistry, StudyUserRegistry};
use bsync_core::{Cursor, NormalizedRecord, Operation};
use bsync_stream::wire::parse_frame;
use bsync_stream::{MemoryCursorStore, OperationsDispatcher};
use std::sync::Arc;

fn dispatcher(cache_root: &std::path::Path) -> (OperationsDispatcher, Arc<MemoryCursorStore>) {
    let snapshot = parse_snapshot(concat!(
        "{\"entry\":\"study_user\",\"actor_id\":\"did:ex:A\"}\n",
        "{\"entry\":\"in_network_user\",\"actor_id\":\"did:ex:N\"}\n",
    ))
    .0;
    let cursor = Arc::new(MemoryCursorStore::new());
    let dispatcher = OperationsDispatcher::new(
        HandlerRegistry::new(cache_root),
        Arc::new(StudyUserRegistry::new(snapshot)),
        cursor.clone(),
        3,
    );
    (dispatcher, cursor)
}

#[tokio::test]
async fn study_post_event_lands_in_cache_and_advances_cursor() {
    let cache = tempfile::tempdir().unwrap();
    let (dispatcher, cursor) = dispatcher(cache.path());

    let raw = r#"{"did":"did:ex:A","time_us":1000,"kind":"commit",
        "commit":{"operation":"create","collection":"app.bsky.feed.post",
                  "rkey":"r1","record":{"text":"hi","createdAt":"2024-09-01T00:00:00Z"}}}"#;
    let frame = parse_frame(raw).unwrap().unwrap();
    let result = dispatcher.dispatch(&frame).await.unwrap();
    assert_eq!(result.written, 1);

    let expected = cache
        .path()
        .join("study_user_activity/create/post/author_id=did:ex:A_record_key=r1.json");
    let record: NormalizedRecord = fileio::read_json(&expected).unwrap();
    assert_eq!(record.author_id, "did:ex:A");
    assert_eq!(record.record_key, "r1");
    assert_eq!(record.op, Operation::Create);
    assert_eq!(record.body.text(), Some("hi"));
    assert_eq!(
        record.partition_date,
        NormalizedRecord::partition_date_for(record.synctimestamp)
    );
    assert_eq!(cursor.current(), Some(Cursor(1000)));
}

#[tokio::test]
async fn delete_event_writes_a_tombstone() {
    let cache = tempfile::tempdir().unwrap();
    let (dispatcher, cursor) = dispatcher(cache.path());

    let raw = r#"{"did":"did:ex:A","time_us":2000,"kind":"commit",
        "commit":{"operation":"delete","collection":"app.bsky.feed.post","rkey":"r1"}}"#;
    let frame = parse_frame(raw).unwrap().unwrap();
    dispatcher.dispatch(&frame).await.unwrap();

    let expected = cache.path().join(
        "study_user_activity/delete/author_id=did:ex:A_record_type=post_record_key=r1.json",
    );
    let record: NormalizedRecord = fileio::read_json(&expected).unwrap();
    assert_eq!(record.op, Operation::Delete);
    assert_eq!(cursor.current(), Some(Cursor(2000)));
}

#[tokio::test]
async fn in_network_event_goes_to_the_author_subtree_only() {
    let cache = tempfile::tempdir().unwrap();
    let (dispatcher, _cursor) = dispatcher(cache.path());

    let raw = r#"{"did":"did:ex:N","time_us":3000,"kind":"commit",
        "commit":{"operation":"create","collection":"app.bsky.feed.post",
                  "rkey":"p1","record":{"text":"net"}}}"#;
    let frame = parse_frame(raw).unwrap().unwrap();
    let result = dispatcher.dispatch(&frame).await.unwrap();
    assert_eq!(result.written, 1);
    assert!(cache
        .path()
        .join("in_network_user_activity/create/post/did:ex:N/author_id=did:ex:N_record_key=p1.json")
        .exists());
    assert!(fileio::list_json_files(&cache.path().join("study_user_activity"))
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn like_after_post_resolves_through_the_overlay() {
    let cache = tempfile::tempdir().unwrap();
    let (dispatcher, _cursor) = dispatcher(cache.path());

    let post = parse_frame(
        r#"{"did":"did:ex:A","time_us":1,"kind":"commit",
            "commit":{"operation":"create","collection":"app.bsky.feed.post",
                      "rkey":"r1","record":{"text":"hi"}}}"#,
    )
    .unwrap()
    .unwrap();
    dispatcher.dispatch(&post).await.unwrap();

    // Liker is neither study nor in-network; only the overlay can match.
    let like = parse_frame(
        r#"{"did":"did:ex:B","time_us":2,"kind":"commit",
            "commit":{"operation":"create","collection":"app.bsky.feed.like","rkey":"l1",
                      "record":{"subject":{"uri":"at://did:ex:A/app.bsky.feed.post/r1"}}}}"#,
    )
    .unwrap()
    .unwrap();
    let result = dispatcher.dispatch(&like).await.unwrap();
    assert_eq!(result.written, 1);
    assert!(cache
        .path()
        .join("study_user_activity/create/like_on_user_post/did:ex:A_app.bsky.feed.post_r1")
        .join("author_id=did:ex:B_record_key=l1.json")
        .exists());
}
