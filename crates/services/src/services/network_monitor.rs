//! Connectivity tracking: embedder-fed online state plus periodic liveness
//! probing of the backend health endpoint.

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tokio::{sync::watch, task::JoinHandle, time::interval};
use tracing::{debug, info, warn};
use ts_rs::TS;

use super::{config::MonitorConfig, remote::RemoteError};

/// Two independent connectivity signals. `is_online` is the OS-level network
/// state fed in by the embedder; `is_connected` is backend reachability as
/// seen by the liveness probe. A machine can be online while the backend is
/// unreachable, so callers get both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
pub struct NetworkStatus {
    pub is_online: bool,
    pub is_connected: bool,
}

impl NetworkStatus {
    pub fn effectively_online(&self) -> bool {
        self.is_online && self.is_connected
    }
}

impl Default for NetworkStatus {
    fn default() -> Self {
        Self {
            is_online: true,
            is_connected: true,
        }
    }
}

#[derive(Clone)]
pub struct NetworkMonitorService {
    http: Client,
    config: MonitorConfig,
    tx: watch::Sender<NetworkStatus>,
}

impl NetworkMonitorService {
    pub fn new(config: MonitorConfig) -> Result<Self, RemoteError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.probe_timeout_secs))
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let (tx, _) = watch::channel(NetworkStatus::default());
        Ok(Self { http, config, tx })
    }

    pub fn status(&self) -> NetworkStatus {
        *self.tx.borrow()
    }

    /// Receiver that observes every status transition. Identical updates are
    /// suppressed, so a change notification always means a real transition.
    pub fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.tx.subscribe()
    }

    /// Feed the OS-level online/offline signal (the browser event analogue).
    /// Does not touch `is_connected`.
    pub fn set_online(&self, is_online: bool) {
        self.tx.send_if_modified(|status| {
            if status.is_online == is_online {
                return false;
            }
            status.is_online = is_online;
            true
        });
    }

    fn set_connected(&self, is_connected: bool) {
        self.tx.send_if_modified(|status| {
            if status.is_connected == is_connected {
                return false;
            }
            status.is_connected = is_connected;
            true
        });
    }

    /// Spawn the periodic liveness probe loop.
    pub fn spawn(&self) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            info!(
                url = %monitor.config.health_url,
                interval_secs = monitor.config.probe_interval_secs,
                "starting liveness probe"
            );
            let mut ticker = interval(Duration::from_secs(monitor.config.probe_interval_secs));
            loop {
                ticker.tick().await;
                monitor.probe_once().await;
            }
        })
    }

    /// One liveness probe: HEAD against the health endpoint, any 2xx counts
    /// as healthy. Only `is_connected` is updated; the OS-level signal stays
    /// untouched.
    pub async fn probe_once(&self) {
        match self.http.head(&self.config.health_url).send().await {
            Ok(res) if res.status().is_success() => {
                debug!("liveness probe healthy");
                self.set_connected(true);
            }
            Ok(res) => {
                warn!(status = res.status().as_u16(), "liveness probe unhealthy");
                self.set_connected(false);
            }
            Err(e) => {
                warn!(error = %e, "liveness probe failed");
                self.set_connected(false);
            }
        }
    }
}
