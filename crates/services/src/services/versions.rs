//! Append-only version history per section, persisted optimistically.

use std::sync::Arc;

use dashmap::DashMap;
use models::{
    diff::{DiffLine, diff},
    version::{CreateSnapshot, PersistState, Snapshot, Tracked},
};
use serde_json::json;
use thiserror::Error;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    config::RetryConfig,
    realtime::{ChangeEvent, ChangeKind, RealtimeHub, RemoteTable},
    remote::{RemoteError, RemoteStore},
    retry_queue::{QueuedAction, RetryQueue},
};

#[derive(Debug, Error)]
pub enum VersionError {
    #[error("version {version_number} not found for section {section_id}")]
    NotFound {
        section_id: Uuid,
        version_number: i64,
    },
    #[error("invalid operation: version {0} belongs to a different section")]
    SectionMismatch(Uuid),
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
}

type SectionHistories = DashMap<Uuid, Vec<Tracked<Snapshot>>>;

/// In-memory version store for the sections this client has open. History is
/// append-only: restores create new snapshots, nothing is ever rewritten.
#[derive(Clone)]
pub struct VersionService {
    sections: Arc<SectionHistories>,
    remote: Arc<dyn RemoteStore>,
    queue: RetryQueue,
    retry: RetryConfig,
}

impl VersionService {
    pub fn new(remote: Arc<dyn RemoteStore>, queue: RetryQueue, retry: RetryConfig) -> Self {
        Self {
            sections: Arc::new(DashMap::new()),
            remote,
            queue,
            retry,
        }
    }

    /// Create the next version of a section. Always succeeds locally; the
    /// backend write is confirmed asynchronously and routed through the
    /// retry queue on transient failure.
    pub async fn create_version(&self, data: CreateSnapshot) -> Snapshot {
        let snapshot = {
            let mut history = self.sections.entry(data.section_id).or_default();
            let next = history
                .last()
                .map(|t| t.record.version_number)
                .unwrap_or(0)
                + 1;
            let snapshot = Snapshot::from_create(&data, next);
            history.push(Tracked::pending(snapshot.clone()));
            snapshot
        };
        info!(
            section_id = %snapshot.section_id,
            version_number = snapshot.version_number,
            "created version"
        );
        self.persist_snapshot(snapshot.clone()).await;
        snapshot
    }

    /// Versions of a section, newest first, each carrying its confirmation
    /// state.
    pub fn list_versions(&self, section_id: Uuid) -> Vec<Tracked<Snapshot>> {
        let mut history = self
            .sections
            .get(&section_id)
            .map(|h| h.value().clone())
            .unwrap_or_default();
        history.sort_by(|a, b| b.record.version_number.cmp(&a.record.version_number));
        history
    }

    pub fn find_version(&self, section_id: Uuid, version_number: i64) -> Option<Snapshot> {
        self.sections.get(&section_id).and_then(|history| {
            history
                .iter()
                .find(|t| t.record.version_number == version_number)
                .map(|t| t.record.clone())
        })
    }

    /// Restore an old version by appending a new snapshot with its content.
    /// History is never rewritten, so the audit trail stays intact.
    pub async fn restore_version(
        &self,
        section_id: Uuid,
        target: &Snapshot,
        author_id: Uuid,
    ) -> Result<Snapshot, VersionError> {
        if target.section_id != section_id {
            return Err(VersionError::SectionMismatch(target.id));
        }
        let data = CreateSnapshot {
            section_id,
            content: target.content_snapshot.clone(),
            author_id,
            change_summary: Some(format!("Restored from version {}", target.version_number)),
        };
        Ok(self.create_version(data).await)
    }

    /// Look up a version by number and restore it.
    pub async fn restore_version_number(
        &self,
        section_id: Uuid,
        version_number: i64,
        author_id: Uuid,
    ) -> Result<Snapshot, VersionError> {
        let target = self
            .find_version(section_id, version_number)
            .ok_or(VersionError::NotFound {
                section_id,
                version_number,
            })?;
        self.restore_version(section_id, &target, author_id).await
    }

    /// Line-level edit script from `old` to `new`. Both snapshots must
    /// belong to the same section; this is a documented precondition, not
    /// checked here.
    pub fn compare_versions(&self, old: &Snapshot, new: &Snapshot) -> Vec<DiffLine> {
        diff(&old.content_snapshot, &new.content_snapshot)
    }

    pub fn persist_state(&self, section_id: Uuid, snapshot_id: Uuid) -> Option<PersistState> {
        self.sections.get(&section_id).and_then(|history| {
            history
                .iter()
                .find(|t| t.record.id == snapshot_id)
                .map(|t| t.persist_state)
        })
    }

    /// Replace local history for a section with the backend's. Returns the
    /// number of versions fetched.
    pub async fn load_section(&self, section_id: Uuid) -> Result<usize, VersionError> {
        let mut fetched = self.remote.list_snapshots(section_id).await?;
        fetched.sort_by_key(|s| s.version_number);
        let count = fetched.len();
        let history: Vec<Tracked<Snapshot>> = fetched.into_iter().map(Tracked::confirmed).collect();
        self.sections.insert(section_id, history);
        debug!(section_id = %section_id, count, "hydrated section history");
        Ok(count)
    }

    async fn persist_snapshot(&self, snapshot: Snapshot) {
        match self.remote.insert_snapshot(&snapshot).await {
            Ok(()) => {
                mark_state(
                    &self.sections,
                    snapshot.section_id,
                    snapshot.id,
                    PersistState::Confirmed,
                );
            }
            Err(e) if e.is_retryable() => {
                warn!(
                    snapshot_id = %snapshot.id,
                    error = %e,
                    "version persist failed, queueing retry"
                );
                self.enqueue_persist(snapshot);
            }
            Err(e) => {
                warn!(snapshot_id = %snapshot.id, error = %e, "version persist rejected");
                mark_state(
                    &self.sections,
                    snapshot.section_id,
                    snapshot.id,
                    PersistState::Failed,
                );
            }
        }
    }

    fn enqueue_persist(&self, snapshot: Snapshot) {
        let section_id = snapshot.section_id;
        let snapshot_id = snapshot.id;
        let remote = Arc::clone(&self.remote);
        let payload = json!({
            "section_id": section_id,
            "snapshot_id": snapshot_id,
            "version_number": snapshot.version_number,
        });

        let op_snapshot = snapshot.clone();
        let confirm_sections = Arc::clone(&self.sections);
        let fail_sections = Arc::clone(&self.sections);

        let action = QueuedAction::new("persist_version", payload, move || {
            let remote = Arc::clone(&remote);
            let snapshot = op_snapshot.clone();
            Box::pin(async move {
                remote
                    .insert_snapshot(&snapshot)
                    .await
                    .map_err(anyhow::Error::from)
            })
        })
        .with_max_retries(self.retry.max_retries)
        .with_backoff_base_ms(self.retry.backoff_base_ms)
        .on_success(move || {
            mark_state(
                &confirm_sections,
                section_id,
                snapshot_id,
                PersistState::Confirmed,
            );
        })
        .on_final_failure(move |err| {
            warn!(snapshot_id = %snapshot_id, error = %err, "version persist given up");
            mark_state(&fail_sections, section_id, snapshot_id, PersistState::Failed);
        });

        self.queue.enqueue(action);
    }

    /// Apply a change event from the backend feed. Unknown inserts merge
    /// into the history in version order; an event echoing a local write
    /// confirms it. Last write wins, there is no merge strategy.
    pub fn apply_remote_change(&self, event: &ChangeEvent) {
        if event.table != RemoteTable::Versions {
            return;
        }
        let snapshot: Snapshot = match serde_json::from_value(event.record.clone()) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "discarding malformed version change event");
                return;
            }
        };
        match event.kind {
            ChangeKind::Insert | ChangeKind::Update => {
                let mut history = self.sections.entry(snapshot.section_id).or_default();
                if let Some(existing) = history.iter_mut().find(|t| t.record.id == snapshot.id) {
                    existing.record = snapshot;
                    existing.persist_state = PersistState::Confirmed;
                } else {
                    debug!(
                        section_id = %snapshot.section_id,
                        version_number = snapshot.version_number,
                        "merging remote version"
                    );
                    history.push(Tracked::confirmed(snapshot));
                    history.sort_by_key(|t| t.record.version_number);
                }
            }
            // Versions are append-only; the backend never deletes them.
            ChangeKind::Delete => {}
        }
    }

    /// Spawn a watcher that applies `versions`-table events from the hub.
    pub fn watch_realtime(&self, hub: &RealtimeHub) -> JoinHandle<()> {
        let mut rx = hub.subscribe(RemoteTable::Versions);
        let service = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => service.apply_remote_change(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "version change feed lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

fn mark_state(
    sections: &SectionHistories,
    section_id: Uuid,
    snapshot_id: Uuid,
    state: PersistState,
) {
    if let Some(mut history) = sections.get_mut(&section_id) {
        if let Some(tracked) = history.iter_mut().find(|t| t.record.id == snapshot_id) {
            tracked.persist_state = state;
        }
    }
}
