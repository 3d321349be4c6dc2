//! Threaded comments per section, persisted optimistically.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use models::{
    ModelError,
    comment::{Comment, CommentThread, CreateComment, build_threads, validate_content},
    version::{PersistState, Tracked},
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
pub enum CommentError {
    #[error("comment not found: {0}")]
    NotFound(Uuid),
    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
}

type CommentMap = DashMap<Uuid, Tracked<Comment>>;

/// In-memory comment store for the sections this client has open.
#[derive(Clone)]
pub struct CommentService {
    comments: Arc<CommentMap>,
    remote: Arc<dyn RemoteStore>,
    queue: RetryQueue,
    retry: RetryConfig,
}

impl CommentService {
    pub fn new(remote: Arc<dyn RemoteStore>, queue: RetryQueue, retry: RetryConfig) -> Self {
        Self {
            comments: Arc::new(DashMap::new()),
            remote,
            queue,
            retry,
        }
    }

    /// Add a comment. A set `parent_comment_id` must reference a known
    /// comment in the same section.
    pub async fn add_comment(&self, data: CreateComment) -> Result<Comment, CommentError> {
        data.validate()?;
        if let Some(parent_id) = data.parent_comment_id {
            let parent = self
                .comments
                .get(&parent_id)
                .ok_or(CommentError::NotFound(parent_id))?;
            if parent.record.section_id != data.section_id {
                return Err(CommentError::InvalidOperation(
                    "reply must target a comment in the same section",
                ));
            }
        }

        let comment = Comment::from_create(&data);
        self.comments
            .insert(comment.id, Tracked::pending(comment.clone()));
        info!(comment_id = %comment.id, section_id = %comment.section_id, "added comment");
        self.persist_insert(comment.clone()).await;
        Ok(comment)
    }

    /// Reply to an existing comment. The reply inherits the parent's
    /// section and carries no text-range anchor of its own.
    pub async fn add_reply(
        &self,
        parent_id: Uuid,
        author_id: Uuid,
        content: String,
    ) -> Result<Comment, CommentError> {
        let section_id = self
            .comments
            .get(&parent_id)
            .map(|parent| parent.record.section_id)
            .ok_or(CommentError::NotFound(parent_id))?;

        self.add_comment(CreateComment {
            section_id,
            author_id,
            content,
            parent_comment_id: Some(parent_id),
            text_range_start: None,
            text_range_end: None,
        })
        .await
    }

    pub async fn edit_comment(&self, id: Uuid, content: String) -> Result<Comment, CommentError> {
        validate_content(&content)?;
        let updated = {
            let mut entry = self
                .comments
                .get_mut(&id)
                .ok_or(CommentError::NotFound(id))?;
            entry.record.content = content;
            entry.record.updated_at = Utc::now();
            entry.persist_state = PersistState::Pending;
            entry.record.clone()
        };
        debug!(comment_id = %id, "edited comment");
        self.persist_update(updated.clone()).await;
        Ok(updated)
    }

    pub async fn resolve(&self, id: Uuid) -> Result<Comment, CommentError> {
        self.set_resolved(id, true).await
    }

    pub async fn unresolve(&self, id: Uuid) -> Result<Comment, CommentError> {
        self.set_resolved(id, false).await
    }

    /// Resolution state lives on root comments only; a reply is rejected
    /// untouched.
    async fn set_resolved(&self, id: Uuid, resolved: bool) -> Result<Comment, CommentError> {
        let updated = {
            let mut entry = self
                .comments
                .get_mut(&id)
                .ok_or(CommentError::NotFound(id))?;
            if !entry.record.is_root() {
                return Err(CommentError::InvalidOperation(
                    "only root comments can be resolved or unresolved",
                ));
            }
            entry.record.is_resolved = resolved;
            entry.record.resolved_at = resolved.then(Utc::now);
            entry.persist_state = PersistState::Pending;
            entry.record.clone()
        };
        info!(comment_id = %id, resolved, "changed comment resolution");
        self.persist_update(updated.clone()).await;
        Ok(updated)
    }

    /// Delete a comment. Replies are retained and show up as their own
    /// threads once the parent is gone. The removal is optimistic: a
    /// backend rejection rolls it back.
    pub async fn delete_comment(&self, id: Uuid) -> Result<(), CommentError> {
        let (_, removed) = self
            .comments
            .remove(&id)
            .ok_or(CommentError::NotFound(id))?;
        info!(comment_id = %id, "deleted comment");

        match self.remote.delete_comment(id).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_retryable() => {
                warn!(comment_id = %id, error = %e, "comment delete failed, queueing retry");
                self.enqueue_delete(removed);
                Ok(())
            }
            Err(e) => {
                warn!(comment_id = %id, error = %e, "comment delete rejected, restoring");
                self.comments.insert(id, removed);
                Err(e.into())
            }
        }
    }

    pub fn get(&self, id: Uuid) -> Option<Tracked<Comment>> {
        self.comments.get(&id).map(|entry| entry.value().clone())
    }

    pub fn persist_state(&self, id: Uuid) -> Option<PersistState> {
        self.comments.get(&id).map(|entry| entry.persist_state)
    }

    /// Display threads for a section: unresolved roots first, then resolved,
    /// replies in creation order beneath their root.
    pub fn threads_for_section(&self, section_id: Uuid) -> Vec<CommentThread> {
        let all: Vec<Comment> = self
            .comments
            .iter()
            .filter(|entry| entry.record.section_id == section_id)
            .map(|entry| entry.record.clone())
            .collect();
        build_threads(&all)
    }

    /// Replace local comments for a section with the backend's.
    pub async fn load_section(&self, section_id: Uuid) -> Result<usize, CommentError> {
        let fetched = self.remote.list_comments(section_id).await?;
        let count = fetched.len();
        self.comments
            .retain(|_, tracked| tracked.record.section_id != section_id);
        for comment in fetched {
            self.comments
                .insert(comment.id, Tracked::confirmed(comment));
        }
        debug!(section_id = %section_id, count, "hydrated section comments");
        Ok(count)
    }

    async fn persist_insert(&self, comment: Comment) {
        match self.remote.insert_comment(&comment).await {
            Ok(()) => mark_state(&self.comments, comment.id, PersistState::Confirmed),
            Err(e) if e.is_retryable() => {
                warn!(comment_id = %comment.id, error = %e, "comment persist failed, queueing retry");
                self.enqueue_write("persist_comment", comment, move |remote, comment| {
                    Box::pin(async move { remote.insert_comment(&comment).await })
                });
            }
            Err(e) => {
                warn!(comment_id = %comment.id, error = %e, "comment persist rejected");
                mark_state(&self.comments, comment.id, PersistState::Failed);
            }
        }
    }

    async fn persist_update(&self, comment: Comment) {
        match self.remote.update_comment(&comment).await {
            Ok(()) => mark_state(&self.comments, comment.id, PersistState::Confirmed),
            Err(e) if e.is_retryable() => {
                warn!(comment_id = %comment.id, error = %e, "comment update failed, queueing retry");
                self.enqueue_write("update_comment", comment, move |remote, comment| {
                    Box::pin(async move { remote.update_comment(&comment).await })
                });
            }
            Err(e) => {
                warn!(comment_id = %comment.id, error = %e, "comment update rejected");
                mark_state(&self.comments, comment.id, PersistState::Failed);
            }
        }
    }

    /// Queue a retryable write of the comment's current state. Re-sends the
    /// same record on every attempt; whoever writes last wins.
    fn enqueue_write<F>(&self, kind: &'static str, comment: Comment, send: F)
    where
        F: Fn(
                Arc<dyn RemoteStore>,
                Comment,
            ) -> futures::future::BoxFuture<'static, Result<(), RemoteError>>
            + Send
            + Sync
            + 'static,
    {
        let comment_id = comment.id;
        let remote = Arc::clone(&self.remote);
        let payload = json!({ "comment_id": comment_id, "section_id": comment.section_id });

        let confirm_comments = Arc::clone(&self.comments);
        let fail_comments = Arc::clone(&self.comments);

        let action = QueuedAction::new(kind, payload, move || {
            let remote = Arc::clone(&remote);
            let comment = comment.clone();
            let fut = send(remote, comment);
            Box::pin(async move { fut.await.map_err(anyhow::Error::from) })
        })
        .with_max_retries(self.retry.max_retries)
        .with_backoff_base_ms(self.retry.backoff_base_ms)
        .on_success(move || {
            mark_state(&confirm_comments, comment_id, PersistState::Confirmed);
        })
        .on_final_failure(move |err| {
            warn!(comment_id = %comment_id, error = %err, "comment write given up");
            mark_state(&fail_comments, comment_id, PersistState::Failed);
        });

        self.queue.enqueue(action);
    }

    fn enqueue_delete(&self, removed: Tracked<Comment>) {
        let comment_id = removed.record.id;
        let remote = Arc::clone(&self.remote);
        let payload = json!({ "comment_id": comment_id });

        let restore_comments = Arc::clone(&self.comments);
        let action = QueuedAction::new("delete_comment", payload, move || {
            let remote = Arc::clone(&remote);
            Box::pin(async move {
                remote
                    .delete_comment(comment_id)
                    .await
                    .map_err(anyhow::Error::from)
            })
        })
        .with_max_retries(self.retry.max_retries)
        .with_backoff_base_ms(self.retry.backoff_base_ms)
        .on_final_failure(move |err| {
            // The backend never applied the delete; bring the comment back.
            warn!(comment_id = %comment_id, error = %err, "comment delete given up, restoring");
            restore_comments.insert(comment_id, removed.clone());
        });

        self.queue.enqueue(action);
    }

    /// Apply a change event from the backend feed. Inserts and updates win
    /// over local state; deletes drop the comment.
    pub fn apply_remote_change(&self, event: &ChangeEvent) {
        if event.table != RemoteTable::Comments {
            return;
        }
        match event.kind {
            ChangeKind::Insert | ChangeKind::Update => {
                let comment: Comment = match serde_json::from_value(event.record.clone()) {
                    Ok(comment) => comment,
                    Err(e) => {
                        warn!(error = %e, "discarding malformed comment change event");
                        return;
                    }
                };
                self.comments
                    .insert(comment.id, Tracked::confirmed(comment));
            }
            ChangeKind::Delete => {
                let Some(id) = event
                    .record
                    .get("id")
                    .and_then(|v| v.as_str())
                    .and_then(|s| Uuid::parse_str(s).ok())
                else {
                    warn!("discarding comment delete event without an id");
                    return;
                };
                self.comments.remove(&id);
            }
        }
    }

    /// Spawn a watcher that applies `comments`-table events from the hub.
    pub fn watch_realtime(&self, hub: &RealtimeHub) -> JoinHandle<()> {
        let mut rx = hub.subscribe(RemoteTable::Comments);
        let service = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => service.apply_remote_change(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "comment change feed lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

fn mark_state(comments: &CommentMap, comment_id: Uuid, state: PersistState) {
    if let Some(mut entry) = comments.get_mut(&comment_id) {
        entry.persist_state = state;
    }
}
