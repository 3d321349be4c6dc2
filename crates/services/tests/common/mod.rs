//! In-memory stand-in for the hosted backend, with failure injection.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU32, Ordering},
};

use async_trait::async_trait;
use dashmap::DashMap;
use models::{comment::Comment, version::Snapshot};
use services::services::remote::{RemoteError, RemoteStore};
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryRemote {
    pub snapshots: DashMap<Uuid, Vec<Snapshot>>,
    pub comments: DashMap<Uuid, Comment>,
    failures_left: AtomicU32,
    failure: Mutex<Option<RemoteError>>,
    pub snapshot_inserts: AtomicU32,
    pub comment_inserts: AtomicU32,
    pub comment_updates: AtomicU32,
    pub comment_deletes: AtomicU32,
}

#[allow(dead_code)]
impl InMemoryRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `count` calls with the given error, then recover.
    pub fn fail_next(&self, count: u32, error: RemoteError) {
        self.failures_left.store(count, Ordering::SeqCst);
        *self.failure.lock().unwrap() = Some(error);
    }

    /// Fail every call until told otherwise.
    pub fn fail_always(&self, error: RemoteError) {
        self.fail_next(u32::MAX, error);
    }

    pub fn recover(&self) {
        self.failures_left.store(0, Ordering::SeqCst);
    }

    fn maybe_fail(&self) -> Result<(), RemoteError> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left == 0 {
            return Ok(());
        }
        if left != u32::MAX {
            self.failures_left.fetch_sub(1, Ordering::SeqCst);
        }
        Err(self
            .failure
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(RemoteError::Timeout))
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<(), RemoteError> {
        self.snapshot_inserts.fetch_add(1, Ordering::SeqCst);
        self.maybe_fail()?;
        let mut history = self.snapshots.entry(snapshot.section_id).or_default();
        if !history.iter().any(|s| s.id == snapshot.id) {
            history.push(snapshot.clone());
        }
        Ok(())
    }

    async fn list_snapshots(&self, section_id: Uuid) -> Result<Vec<Snapshot>, RemoteError> {
        self.maybe_fail()?;
        Ok(self
            .snapshots
            .get(&section_id)
            .map(|h| h.value().clone())
            .unwrap_or_default())
    }

    async fn insert_comment(&self, comment: &Comment) -> Result<(), RemoteError> {
        self.comment_inserts.fetch_add(1, Ordering::SeqCst);
        self.maybe_fail()?;
        self.comments.insert(comment.id, comment.clone());
        Ok(())
    }

    async fn update_comment(&self, comment: &Comment) -> Result<(), RemoteError> {
        self.comment_updates.fetch_add(1, Ordering::SeqCst);
        self.maybe_fail()?;
        self.comments.insert(comment.id, comment.clone());
        Ok(())
    }

    async fn delete_comment(&self, id: Uuid) -> Result<(), RemoteError> {
        self.comment_deletes.fetch_add(1, Ordering::SeqCst);
        self.maybe_fail()?;
        self.comments.remove(&id);
        Ok(())
    }

    async fn list_comments(&self, section_id: Uuid) -> Result<Vec<Comment>, RemoteError> {
        self.maybe_fail()?;
        Ok(self
            .comments
            .iter()
            .filter(|c| c.section_id == section_id)
            .map(|c| c.value().clone())
            .collect())
    }
}
