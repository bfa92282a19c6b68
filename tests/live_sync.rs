//! End-to-end live query tests over the in-memory backend: open a query,
//! drive the feed, and verify the snapshots each merge policy materializes.
//!
//! These tests verify that:
//!
//! - each policy (UpsertById, Replace, AppendOnInsert, CounterAggregate)
//!   produces the documented snapshot shape from mixed feed traffic;
//! - filtered channels only see matching rows;
//! - schema validation coerces rows at the fetch/event boundary;
//! - channel establishment retries transient failures and surfaces a
//!   persistent error once the retry budget is exhausted.

use aula_link::{
    AppendOnInsert, ChangeEvent, ChannelOptions, CounterAggregate, FieldType, InsertPosition,
    LiveClient, LiveUpdate, MemoryBackend, MergePolicy, Replace, ResourceDescriptor, Row, RowKey,
    RowSchema, Subscription, UpsertById,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

// ── shared helpers ────────────────────────────────────────────────────────────

fn row(value: serde_json::Value) -> Row {
    Row::from_value(value).expect("test rows are objects")
}

fn insert(value: serde_json::Value) -> ChangeEvent {
    ChangeEvent::Inserted { row: row(value) }
}

fn update(value: serde_json::Value) -> ChangeEvent {
    ChangeEvent::Updated {
        row: row(value),
        previous: None,
    }
}

fn delete(value: serde_json::Value) -> ChangeEvent {
    ChangeEvent::Deleted { row: row(value) }
}

/// Build a client over a fresh in-memory backend.
fn memory_client() -> (LiveClient, MemoryBackend) {
    let backend = MemoryBackend::new();
    let client = LiveClient::builder()
        .backend(Arc::new(backend.clone()))
        .build()
        .expect("memory client should build");
    (client, backend)
}

/// Poll until `resource` has `count` open feeds, so emits cannot race the
/// channel's subscribe call.
async fn wait_for_feeds(backend: &MemoryBackend, resource: &str, count: usize) {
    for _ in 0..200 {
        if backend.feed_count(resource) == count {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {} feeds on '{}', found {}",
        count,
        resource,
        backend.feed_count(resource)
    );
}

/// Drain updates until the next snapshot.
async fn next_snapshot<P: MergePolicy>(sub: &mut Subscription<P>) -> P::Snapshot {
    loop {
        let step = timeout(Duration::from_secs(2), sub.next())
            .await
            .expect("update within 2s");
        match step {
            Some(LiveUpdate::Snapshot(snapshot)) => return snapshot,
            Some(_) => continue,
            None => panic!("subscription ended while waiting for a snapshot"),
        }
    }
}

// ── merge policies over a live feed ──────────────────────────────────────────

#[tokio::test]
async fn test_upsert_list_tracks_inserts_updates_and_deletes() {
    let (client, backend) = memory_client();
    backend.set_rows("news", vec![row(json!({"id": 1, "title": "Open day"}))]);

    let mut sub = client.open(ResourceDescriptor::table("news"), UpsertById::new("id"));
    assert_eq!(next_snapshot(&mut sub).await.len(), 1);
    wait_for_feeds(&backend, "news", 1).await;

    backend
        .emit("news", insert(json!({"id": 2, "title": "Spring fair"})))
        .await;
    assert_eq!(next_snapshot(&mut sub).await.len(), 2);

    backend
        .emit("news", update(json!({"id": 1, "title": "Open day (moved)"})))
        .await;
    let rows = next_snapshot(&mut sub).await;
    assert_eq!(rows.len(), 2, "update must not grow the list");
    assert_eq!(rows[0].get_str("title"), Some("Open day (moved)"));

    backend.emit("news", delete(json!({"id": 1}))).await;
    let rows = next_snapshot(&mut sub).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_i64("id"), Some(2));
}

#[tokio::test]
async fn test_replace_follows_the_settings_row() {
    let (client, backend) = memory_client();
    backend.set_rows(
        "settings",
        vec![row(json!({"id": 1, "phone": "555-0101", "email": "office@example.org"}))],
    );

    let descriptor = ResourceDescriptor::table("settings").filter_eq("id", 1);
    let mut sub = client.open(descriptor, Replace);
    let seeded = next_snapshot(&mut sub).await.expect("settings row exists");
    assert_eq!(seeded.get_str("phone"), Some("555-0101"));
    wait_for_feeds(&backend, "settings", 1).await;

    backend
        .emit(
            "settings",
            update(json!({"id": 1, "phone": "555-0202", "email": "office@example.org"})),
        )
        .await;
    let current = next_snapshot(&mut sub).await.expect("row still present");
    assert_eq!(current.get_str("phone"), Some("555-0202"));
}

#[tokio::test]
async fn test_append_on_insert_keeps_latest_comments() {
    let (client, backend) = memory_client();

    let mut sub = client.open(ResourceDescriptor::table("comments"), AppendOnInsert::new(2));
    assert!(next_snapshot(&mut sub).await.is_empty());
    wait_for_feeds(&backend, "comments", 1).await;

    backend.emit("comments", insert(json!({"id": "a"}))).await;
    assert_eq!(next_snapshot(&mut sub).await, vec![row(json!({"id": "a"}))]);

    backend.emit("comments", insert(json!({"id": "b"}))).await;
    assert_eq!(
        next_snapshot(&mut sub).await,
        vec![row(json!({"id": "b"})), row(json!({"id": "a"}))]
    );

    backend.emit("comments", insert(json!({"id": "c"}))).await;
    assert_eq!(
        next_snapshot(&mut sub).await,
        vec![row(json!({"id": "c"})), row(json!({"id": "b"}))],
        "oldest row ages out past the cap"
    );
}

#[tokio::test]
async fn test_counter_aggregate_tracks_likes_per_post() {
    let (client, backend) = memory_client();
    backend.set_rows(
        "likes",
        vec![
            row(json!({"id": 10, "post_id": 1})),
            row(json!({"id": 11, "post_id": 1})),
        ],
    );

    let mut sub = client.open(ResourceDescriptor::table("likes"), CounterAggregate::new("post_id"));
    let counters = next_snapshot(&mut sub).await;
    assert_eq!(counters.get(&RowKey::from("1")), Some(&2));
    wait_for_feeds(&backend, "likes", 1).await;

    backend
        .emit("likes", insert(json!({"id": 12, "post_id": 2})))
        .await;
    let counters = next_snapshot(&mut sub).await;
    assert_eq!(counters.get(&RowKey::from("2")), Some(&1));

    backend
        .emit("likes", delete(json!({"id": 10, "post_id": 1})))
        .await;
    let counters = next_snapshot(&mut sub).await;
    assert_eq!(counters.get(&RowKey::from("1")), Some(&1));
}

#[tokio::test]
async fn test_prepended_inserts_land_in_front() {
    let (client, backend) = memory_client();
    backend.set_rows("gallery", vec![row(json!({"id": 1}))]);

    let policy = UpsertById::new("id").with_position(InsertPosition::Prepend);
    let mut sub = client.open(ResourceDescriptor::table("gallery"), policy);
    assert_eq!(next_snapshot(&mut sub).await.len(), 1);
    wait_for_feeds(&backend, "gallery", 1).await;

    backend.emit("gallery", insert(json!({"id": 2}))).await;
    let rows = next_snapshot(&mut sub).await;
    assert_eq!(rows[0].get_i64("id"), Some(2));
    assert_eq!(rows[1].get_i64("id"), Some(1));
}

// ── filtering and schema ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_filtered_channel_only_sees_matching_rows() {
    let (client, backend) = memory_client();

    let descriptor = ResourceDescriptor::table("programs").filter_eq("unit", "preschool");
    let mut sub = client.open(descriptor, UpsertById::new("id"));
    assert!(next_snapshot(&mut sub).await.is_empty());
    wait_for_feeds(&backend, "programs", 1).await;

    backend
        .emit("programs", insert(json!({"id": 1, "unit": "kindergarten"})))
        .await;
    backend
        .emit("programs", insert(json!({"id": 2, "unit": "preschool"})))
        .await;

    let rows = next_snapshot(&mut sub).await;
    assert_eq!(rows.len(), 1, "kindergarten row must be filtered out");
    assert_eq!(rows[0].get_i64("id"), Some(2));
}

#[tokio::test]
async fn test_schema_coerces_rows_at_the_boundary() {
    let (client, backend) = memory_client();
    backend.set_rows("news", vec![row(json!({"id": "7", "title": "t"}))]);

    let schema = RowSchema::new("news")
        .required("id", FieldType::Integer)
        .required("title", FieldType::Text);
    let descriptor = ResourceDescriptor::table("news").with_schema(schema);
    let mut sub = client.open(descriptor, UpsertById::new("id"));

    let rows = next_snapshot(&mut sub).await;
    assert_eq!(rows[0].get_i64("id"), Some(7), "string id coerced on fetch");
    wait_for_feeds(&backend, "news", 1).await;

    // A feed row missing the required title is dropped, not merged.
    backend.emit("news", insert(json!({"id": 8}))).await;
    backend
        .emit("news", insert(json!({"id": "9", "title": "kept"})))
        .await;
    let rows = next_snapshot(&mut sub).await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].get_i64("id"), Some(9), "string id coerced on event");
}

// ── channel establishment and degraded mode ──────────────────────────────────

fn fast_retry() -> ChannelOptions {
    ChannelOptions::new()
        .with_retry_base_delay_ms(10)
        .with_retry_max_delay_ms(50)
        .with_max_retry_attempts(3)
}

#[tokio::test]
async fn test_channel_retries_transient_subscribe_failures() {
    let backend = MemoryBackend::new();
    backend.fail_subscribes(2);
    let client = LiveClient::builder()
        .backend(Arc::new(backend.clone()))
        .channel_options(fast_retry())
        .build()
        .unwrap();

    let mut sub = client.open(ResourceDescriptor::table("news"), UpsertById::new("id"));
    assert!(next_snapshot(&mut sub).await.is_empty());

    // Third attempt succeeds; events flow once the feed is up.
    wait_for_feeds(&backend, "news", 1).await;
    backend.emit("news", insert(json!({"id": 1}))).await;
    assert_eq!(next_snapshot(&mut sub).await.len(), 1);
}

#[tokio::test]
async fn test_exhausted_retries_surface_a_persistent_error() {
    let backend = MemoryBackend::new();
    backend.fail_subscribes(10);
    backend.set_rows("news", vec![row(json!({"id": 1, "title": "static"}))]);
    let client = LiveClient::builder()
        .backend(Arc::new(backend.clone()))
        .channel_options(fast_retry())
        .build()
        .unwrap();

    let mut sub = client.open(ResourceDescriptor::table("news"), UpsertById::new("id"));

    let mut snapshot = None;
    let mut persistent_error = None;
    for _ in 0..2 {
        match timeout(Duration::from_secs(2), sub.next())
            .await
            .expect("update within 2s")
        {
            Some(LiveUpdate::Snapshot(rows)) => snapshot = Some(rows),
            Some(LiveUpdate::FeedDown(error)) => persistent_error = Some(error),
            other => panic!("unexpected update: {:?}", other),
        }
    }

    let rows = snapshot.expect("static data still served");
    assert_eq!(rows.len(), 1);
    let error = persistent_error.expect("degraded mode reported");
    assert!(!error.recoverable, "retry budget exhausted means persistent");
    assert!(!sub.is_live());
}

#[tokio::test]
async fn test_feed_loss_reports_down_then_restored() {
    let (client, backend) = memory_client();

    let mut sub = client.open(ResourceDescriptor::table("gallery"), UpsertById::new("id"));
    assert!(next_snapshot(&mut sub).await.is_empty());
    wait_for_feeds(&backend, "gallery", 1).await;

    backend.drop_feeds("gallery");
    match timeout(Duration::from_secs(2), sub.next()).await.unwrap() {
        Some(LiveUpdate::FeedDown(error)) => assert!(error.recoverable),
        other => panic!("expected FeedDown, got {:?}", other),
    }
    assert!(!sub.is_live());

    match timeout(Duration::from_secs(2), sub.next()).await.unwrap() {
        Some(LiveUpdate::FeedRestored) => {}
        other => panic!("expected FeedRestored, got {:?}", other),
    }
    assert!(sub.is_live());

    // The reconnected feed carries changes again.
    wait_for_feeds(&backend, "gallery", 1).await;
    backend.emit("gallery", insert(json!({"id": 1}))).await;
    assert_eq!(next_snapshot(&mut sub).await.len(), 1);
}
