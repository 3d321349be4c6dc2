//! Version store flows: numbering, restore, diffing, persistence states and
//! realtime merging.

mod common;

use std::{sync::Arc, sync::atomic::Ordering, time::Duration};

use common::InMemoryRemote;
use models::{
    diff::DiffLineKind,
    version::{CreateSnapshot, PersistState, Snapshot},
};
use pretty_assertions::assert_eq;
use services::services::{
    config::RetryConfig,
    realtime::{ChangeEvent, ChangeKind, RealtimeHub, RemoteTable},
    remote::{RemoteError, RemoteStore},
    retry_queue::RetryQueue,
    versions::{VersionError, VersionService},
};
use uuid::Uuid;

fn service(remote: Arc<InMemoryRemote>) -> VersionService {
    let queue = RetryQueue::new(RetryConfig::default());
    VersionService::new(remote as Arc<dyn RemoteStore>, queue, RetryConfig::default())
}

fn create(section_id: Uuid, author_id: Uuid, content: &str) -> CreateSnapshot {
    CreateSnapshot {
        section_id,
        content: content.to_string(),
        author_id,
        change_summary: None,
    }
}

#[tokio::test]
async fn version_numbers_count_up_without_gaps() {
    let service = service(InMemoryRemote::new());
    let section_id = Uuid::new_v4();
    let author_id = Uuid::new_v4();

    for n in 0..5 {
        service
            .create_version(create(section_id, author_id, &format!("draft {n}")))
            .await;
    }

    let numbers: Vec<i64> = service
        .list_versions(section_id)
        .iter()
        .map(|v| v.record.version_number)
        .collect();
    assert_eq!(numbers, vec![5, 4, 3, 2, 1]);
}

#[tokio::test]
async fn restore_appends_instead_of_rewriting() {
    let service = service(InMemoryRemote::new());
    let section_id = Uuid::new_v4();
    let author_id = Uuid::new_v4();

    let v1 = service
        .create_version(create(section_id, author_id, "first draft"))
        .await;
    service
        .create_version(create(section_id, author_id, "second draft"))
        .await;

    let before: Vec<(i64, String)> = service
        .list_versions(section_id)
        .iter()
        .map(|v| (v.record.version_number, v.record.content_snapshot.clone()))
        .collect();

    let restored = service
        .restore_version(section_id, &v1, author_id)
        .await
        .unwrap();

    assert_eq!(restored.version_number, 3);
    assert_eq!(restored.content_snapshot, "first draft");
    assert_eq!(
        restored.change_summary.as_deref(),
        Some("Restored from version 1")
    );

    let after = service.list_versions(section_id);
    assert_eq!(after.len(), before.len() + 1);
    for (number, content) in before {
        let unchanged = after
            .iter()
            .find(|v| v.record.version_number == number)
            .unwrap();
        assert_eq!(unchanged.record.content_snapshot, content);
    }
}

#[tokio::test]
async fn restore_rejects_a_foreign_section() {
    let service = service(InMemoryRemote::new());
    let section_a = Uuid::new_v4();
    let section_b = Uuid::new_v4();
    let author_id = Uuid::new_v4();

    let v1 = service
        .create_version(create(section_a, author_id, "text"))
        .await;

    let result = service.restore_version(section_b, &v1, author_id).await;
    assert!(matches!(result, Err(VersionError::SectionMismatch(id)) if id == v1.id));
    assert!(service.list_versions(section_b).is_empty());
}

#[tokio::test]
async fn restore_by_number_requires_a_known_version() {
    let service = service(InMemoryRemote::new());
    let section_id = Uuid::new_v4();

    let result = service
        .restore_version_number(section_id, 7, Uuid::new_v4())
        .await;
    assert!(matches!(
        result,
        Err(VersionError::NotFound { version_number: 7, .. })
    ));
}

#[tokio::test]
async fn edit_and_compare_round_trip() {
    let service = service(InMemoryRemote::new());
    let section_id = Uuid::new_v4();
    let author_id = Uuid::new_v4();

    let v1 = service
        .create_version(create(section_id, author_id, "line1\nline2\nline3"))
        .await;
    let v2 = service
        .create_version(create(section_id, author_id, "line1\nlineX\nline3"))
        .await;

    let lines = service.compare_versions(&v1, &v2);
    let summary: Vec<(DiffLineKind, &str)> = lines
        .iter()
        .map(|l| (l.kind, l.content.as_str()))
        .collect();
    assert_eq!(
        summary,
        vec![
            (DiffLineKind::Unchanged, "line1"),
            (DiffLineKind::Removed, "line2"),
            (DiffLineKind::Added, "lineX"),
            (DiffLineKind::Unchanged, "line3"),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn transient_write_failure_confirms_after_retry() {
    let remote = InMemoryRemote::new();
    let service = service(remote.clone());
    let section_id = Uuid::new_v4();

    remote.fail_next(
        1,
        RemoteError::Http {
            status: 503,
            body: "upstream unavailable".to_string(),
        },
    );

    let snapshot = service
        .create_version(create(section_id, Uuid::new_v4(), "draft"))
        .await;
    assert_eq!(
        service.persist_state(section_id, snapshot.id),
        Some(PersistState::Pending)
    );

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(
        service.persist_state(section_id, snapshot.id),
        Some(PersistState::Confirmed)
    );
    assert_eq!(remote.snapshot_inserts.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn rejected_write_is_flagged_failed() {
    let remote = InMemoryRemote::new();
    let service = service(remote.clone());
    let section_id = Uuid::new_v4();

    remote.fail_always(RemoteError::Authorization);

    let snapshot = service
        .create_version(create(section_id, Uuid::new_v4(), "draft"))
        .await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(
        service.persist_state(section_id, snapshot.id),
        Some(PersistState::Failed)
    );
    // The version itself stays in the local history.
    assert_eq!(service.list_versions(section_id).len(), 1);
}

#[tokio::test]
async fn hydration_replaces_local_state() {
    let remote = InMemoryRemote::new();
    let section_id = Uuid::new_v4();
    let author_id = Uuid::new_v4();

    for n in 1..=3 {
        let data = create(section_id, author_id, &format!("server draft {n}"));
        remote
            .insert_snapshot(&Snapshot::from_create(&data, n))
            .await
            .unwrap();
    }

    let service = service(remote.clone());
    let count = service.load_section(section_id).await.unwrap();
    assert_eq!(count, 3);

    let versions = service.list_versions(section_id);
    assert_eq!(versions.len(), 3);
    assert!(versions.iter().all(|v| v.persist_state == PersistState::Confirmed));
    assert_eq!(versions[0].record.version_number, 3);
}

#[tokio::test(start_paused = true)]
async fn remote_inserts_merge_in_version_order() {
    let remote = InMemoryRemote::new();
    let service = service(remote.clone());
    let hub = RealtimeHub::new();
    let _watcher = service.watch_realtime(&hub);
    let section_id = Uuid::new_v4();
    let author_id = Uuid::new_v4();

    let local = service
        .create_version(create(section_id, author_id, "local draft"))
        .await;

    // Another client's version arrives over the change feed.
    let foreign = Snapshot::from_create(&create(section_id, author_id, "their draft"), 2);
    hub.publish(ChangeEvent {
        table: RemoteTable::Versions,
        kind: ChangeKind::Insert,
        record: serde_json::to_value(&foreign).unwrap(),
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    let versions = service.list_versions(section_id);
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].record.id, foreign.id);
    assert_eq!(versions[0].persist_state, PersistState::Confirmed);
    assert_eq!(versions[1].record.id, local.id);
}

#[tokio::test(start_paused = true)]
async fn change_feed_echo_confirms_a_pending_write() {
    let remote = InMemoryRemote::new();
    let service = service(remote.clone());
    let hub = RealtimeHub::new();
    let _watcher = service.watch_realtime(&hub);
    let section_id = Uuid::new_v4();

    remote.fail_next(1, RemoteError::Timeout);
    let snapshot = service
        .create_version(create(section_id, Uuid::new_v4(), "draft"))
        .await;
    assert_eq!(
        service.persist_state(section_id, snapshot.id),
        Some(PersistState::Pending)
    );

    // The write reached the backend after all; its echo arrives first.
    hub.publish(ChangeEvent {
        table: RemoteTable::Versions,
        kind: ChangeKind::Insert,
        record: serde_json::to_value(&snapshot).unwrap(),
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(
        service.persist_state(section_id, snapshot.id),
        Some(PersistState::Confirmed)
    );
}
