//! Assembly of the collaboration core. One instance per logged-in session;
//! no process-wide singletons.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::services::{
    comments::CommentService,
    config::CoreConfig,
    network_monitor::NetworkMonitorService,
    realtime::RealtimeHub,
    remote::{RemoteError, RemoteStore},
    retry_queue::RetryQueue,
    versions::VersionService,
};

/// Dependency-injected container wiring the monitor, queue, stores and
/// realtime watchers together. Constructed once at application start, torn
/// down on logout.
pub struct ClientCore {
    pub monitor: NetworkMonitorService,
    pub queue: RetryQueue,
    pub versions: VersionService,
    pub comments: CommentService,
    pub realtime: RealtimeHub,
    tasks: Vec<JoinHandle<()>>,
}

impl ClientCore {
    pub fn new(remote: Arc<dyn RemoteStore>, config: CoreConfig) -> Result<Self, RemoteError> {
        let monitor = NetworkMonitorService::new(config.monitor)?;
        let queue = RetryQueue::new(config.retry.clone());
        let realtime = RealtimeHub::new();
        let versions = VersionService::new(
            Arc::clone(&remote),
            queue.clone(),
            config.retry.clone(),
        );
        let comments = CommentService::new(remote, queue.clone(), config.retry);

        let tasks = vec![
            monitor.spawn(),
            queue.watch_connectivity(monitor.subscribe()),
            versions.watch_realtime(&realtime),
            comments.watch_realtime(&realtime),
        ];
        info!("collaboration core started");

        Ok(Self {
            monitor,
            queue,
            versions,
            comments,
            realtime,
            tasks,
        })
    }

    /// Abort all background loops. Idempotent; also runs on drop.
    pub fn shutdown(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("collaboration core stopped");
    }
}

impl Drop for ClientCore {
    fn drop(&mut self) {
        self.shutdown();
    }
}
