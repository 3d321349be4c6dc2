//! In-memory queue of failed side-effecting operations, replayed with
//! exponential backoff once connectivity allows.
//!
//! Each action moves through `Pending -> Retrying` and leaves the queue by
//! succeeding, being classified as permanently failed, or exhausting its
//! retries. The queue lives for the browser-tab-equivalent lifetime of the
//! client; nothing is persisted across restarts.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use rand::Rng;
use serde_json::Value;
use strum_macros::{Display, EnumString};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{config::RetryConfig, network_monitor::NetworkStatus};

/// Error message fragments that mark a failure as permanent. Matched against
/// the rendered error, lowercased.
pub const NON_RETRYABLE_MARKERS: [&str; 5] = [
    "authentication",
    "authorization",
    "validation",
    "not_found",
    "bad_request",
];

pub fn is_non_retryable(message: &str) -> bool {
    let message = message.to_lowercase();
    NON_RETRYABLE_MARKERS.iter().any(|m| message.contains(m))
}

/// Exponential backoff with a hard ceiling. Jitter is added separately at
/// scheduling time.
pub fn backoff_delay_ms(base_ms: u64, retry_count: u32, max_ms: u64) -> u64 {
    let factor = 1u64 << retry_count.min(63);
    base_ms.saturating_mul(factor).min(max_ms)
}

pub type OperationFuture = BoxFuture<'static, Result<(), anyhow::Error>>;
pub type Operation = Arc<dyn Fn() -> OperationFuture + Send + Sync>;
pub type SuccessHook = Arc<dyn Fn() + Send + Sync>;
pub type FailureHook = Arc<dyn Fn(&anyhow::Error) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ActionState {
    Pending,
    Retrying,
}

/// A side-effecting operation awaiting (re-)execution. `kind` and `payload`
/// exist for logging and inspection; the work itself is the boxed operation.
#[derive(Clone)]
pub struct QueuedAction {
    pub id: Uuid,
    pub kind: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub state: ActionState,
    seq: u64,
    operation: Operation,
    on_success: Option<SuccessHook>,
    on_error: Option<FailureHook>,
    on_final_failure: Option<FailureHook>,
}

impl fmt::Debug for QueuedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedAction")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("retry_count", &self.retry_count)
            .field("max_retries", &self.max_retries)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl QueuedAction {
    pub fn new<F>(kind: impl Into<String>, payload: Value, operation: F) -> Self
    where
        F: Fn() -> OperationFuture + Send + Sync + 'static,
    {
        let defaults = RetryConfig::default();
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            payload,
            created_at: Utc::now(),
            retry_count: 0,
            max_retries: defaults.max_retries,
            backoff_base_ms: defaults.backoff_base_ms,
            state: ActionState::Pending,
            seq: 0,
            operation: Arc::new(operation),
            on_success: None,
            on_error: None,
            on_final_failure: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff_base_ms(mut self, backoff_base_ms: u64) -> Self {
        self.backoff_base_ms = backoff_base_ms;
        self
    }

    /// Fired once when the operation finally succeeds.
    pub fn on_success<F: Fn() + Send + Sync + 'static>(mut self, hook: F) -> Self {
        self.on_success = Some(Arc::new(hook));
        self
    }

    /// Fired on each transient failure that gets rescheduled.
    pub fn on_error<F: Fn(&anyhow::Error) + Send + Sync + 'static>(mut self, hook: F) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Fired once when the action is given up, either because the error was
    /// classified as permanent or because retries ran out.
    pub fn on_final_failure<F: Fn(&anyhow::Error) + Send + Sync + 'static>(
        mut self,
        hook: F,
    ) -> Self {
        self.on_final_failure = Some(Arc::new(hook));
        self
    }
}

enum FailurePlan {
    Final(QueuedAction),
    Reschedule {
        delay_ms: u64,
        on_error: Option<FailureHook>,
    },
    Gone,
}

struct QueueInner {
    actions: DashMap<Uuid, QueuedAction>,
    next_seq: AtomicU64,
    online: AtomicBool,
    config: RetryConfig,
}

/// Cheaply cloneable handle to the shared queue.
#[derive(Clone)]
pub struct RetryQueue {
    inner: Arc<QueueInner>,
}

impl RetryQueue {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                actions: DashMap::new(),
                next_seq: AtomicU64::new(0),
                online: AtomicBool::new(true),
                config,
            }),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.inner.config
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Feed the connectivity signal directly. Normally driven by
    /// [`watch_connectivity`](Self::watch_connectivity).
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.inner.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.actions.is_empty()
    }

    /// Ids of queued actions in enqueue order.
    pub fn pending_ids(&self) -> Vec<Uuid> {
        let mut entries: Vec<(u64, Uuid)> = self
            .inner
            .actions
            .iter()
            .map(|e| (e.seq, e.id))
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, id)| id).collect()
    }

    /// Add an action to the queue. When the client is online the first
    /// attempt is made immediately.
    pub fn enqueue(&self, mut action: QueuedAction) -> Uuid {
        let id = action.id;
        action.seq = self.inner.next_seq.fetch_add(1, Ordering::SeqCst);
        info!(action_id = %id, kind = %action.kind, "enqueued action");
        self.inner.actions.insert(id, action);

        if self.is_online() {
            let queue = self.clone();
            tokio::spawn(async move {
                queue.attempt(id).await;
            });
        }
        id
    }

    /// Remove an action without executing it. Returns true if it was present.
    pub fn remove(&self, id: Uuid) -> bool {
        self.inner.actions.remove(&id).is_some()
    }

    /// Execute one attempt of the given action. No-op if the action is gone
    /// or already in flight.
    pub async fn attempt(&self, id: Uuid) {
        let (operation, kind) = {
            let Some(mut entry) = self.inner.actions.get_mut(&id) else {
                return;
            };
            if entry.state == ActionState::Retrying {
                debug!(action_id = %id, "action already in flight, skipping");
                return;
            }
            entry.state = ActionState::Retrying;
            (entry.operation.clone(), entry.kind.clone())
        };

        debug!(action_id = %id, kind = %kind, "attempting action");
        match (operation)().await {
            Ok(()) => {
                if let Some((_, action)) = self.inner.actions.remove(&id) {
                    info!(action_id = %id, kind = %action.kind, "action succeeded");
                    if let Some(hook) = &action.on_success {
                        hook();
                    }
                }
            }
            Err(err) => self.handle_failure(id, err),
        }
    }

    fn handle_failure(&self, id: Uuid, err: anyhow::Error) {
        let message = format!("{err:#}");

        let plan = if is_non_retryable(&message) {
            match self.inner.actions.remove(&id) {
                Some((_, action)) => FailurePlan::Final(action),
                None => FailurePlan::Gone,
            }
        } else {
            let Some(mut entry) = self.inner.actions.get_mut(&id) else {
                return;
            };
            if entry.retry_count < entry.max_retries {
                let delay_ms = backoff_delay_ms(
                    entry.backoff_base_ms,
                    entry.retry_count,
                    self.inner.config.max_backoff_ms,
                );
                entry.retry_count += 1;
                entry.state = ActionState::Pending;
                FailurePlan::Reschedule {
                    delay_ms,
                    on_error: entry.on_error.clone(),
                }
            } else {
                drop(entry);
                match self.inner.actions.remove(&id) {
                    Some((_, action)) => FailurePlan::Final(action),
                    None => FailurePlan::Gone,
                }
            }
        };

        match plan {
            FailurePlan::Final(action) => {
                warn!(
                    action_id = %id,
                    kind = %action.kind,
                    retry_count = action.retry_count,
                    error = %message,
                    "action failed permanently"
                );
                if let Some(hook) = &action.on_final_failure {
                    hook(&err);
                }
            }
            FailurePlan::Reschedule { delay_ms, on_error } => {
                let jitter = rand::thread_rng().gen_range(0..=self.inner.config.max_jitter_ms);
                warn!(
                    action_id = %id,
                    delay_ms,
                    error = %message,
                    "action failed, rescheduling"
                );
                if let Some(hook) = &on_error {
                    hook(&err);
                }
                let queue = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    queue.attempt(id).await;
                });
            }
            FailurePlan::Gone => {}
        }
    }

    /// Attempt every queued action, in enqueue order, each after a small
    /// random stagger so the backend is not hit all at once.
    pub fn flush_all(&self) {
        let ids = self.pending_ids();
        if ids.is_empty() {
            return;
        }
        info!(count = ids.len(), "flushing queued actions");
        let max_stagger = self.inner.config.flush_stagger_ms;
        for id in ids {
            let stagger = rand::thread_rng().gen_range(0..=max_stagger);
            let queue = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(stagger)).await;
                queue.attempt(id).await;
            });
        }
    }

    /// Track the connectivity signal and flush the queue shortly after it
    /// reports the client back online.
    pub fn watch_connectivity(&self, mut rx: watch::Receiver<NetworkStatus>) -> JoinHandle<()> {
        let queue = self.clone();
        let debounce = Duration::from_millis(self.inner.config.reconnect_debounce_ms);
        let initial = rx.borrow().effectively_online();
        queue.set_online(initial);

        tokio::spawn(async move {
            let mut was_online = initial;
            while rx.changed().await.is_ok() {
                let online = rx.borrow().effectively_online();
                queue.set_online(online);
                if online && !was_online {
                    info!("connectivity restored, scheduling queue flush");
                    let flusher = queue.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(debounce).await;
                        if flusher.is_online() {
                            flusher.flush_all();
                        }
                    });
                }
                was_online = online;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_the_ceiling() {
        assert_eq!(backoff_delay_ms(1000, 0, 30_000), 1000);
        assert_eq!(backoff_delay_ms(1000, 1, 30_000), 2000);
        assert_eq!(backoff_delay_ms(1000, 2, 30_000), 4000);
        assert_eq!(backoff_delay_ms(1000, 10, 30_000), 30_000);
        assert_eq!(backoff_delay_ms(1000, 63, 30_000), 30_000);
    }

    #[test]
    fn classifier_matches_denylist_fragments() {
        assert!(is_non_retryable("validation failed: title is required"));
        assert!(is_non_retryable("Authentication rejected"));
        assert!(is_non_retryable("http 404: not_found: section"));
        assert!(!is_non_retryable("network error: connection reset"));
        assert!(!is_non_retryable("http 503: upstream unavailable"));
    }
}
