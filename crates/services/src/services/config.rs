//! Tuning knobs for the sync layer, deserialisable from the app's config file.

use serde::{Deserialize, Serialize};

/// Retry and flush behavior of the action queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the initial attempt before an action is given up.
    pub max_retries: u32,
    /// First backoff delay; doubles on every retry.
    pub backoff_base_ms: u64,
    /// Ceiling on the computed backoff delay, jitter excluded.
    pub max_backoff_ms: u64,
    /// Random jitter added on top of each backoff delay.
    pub max_jitter_ms: u64,
    /// Random stagger applied per action when the whole queue is flushed,
    /// so a reconnect does not hammer the backend all at once.
    pub flush_stagger_ms: u64,
    /// Wait after an offline-to-online transition before flushing, to ride
    /// out flapping connections.
    pub reconnect_debounce_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 1000,
            max_backoff_ms: 30_000,
            max_jitter_ms: 1000,
            flush_stagger_ms: 2000,
            reconnect_debounce_ms: 1000,
        }
    }
}

/// Liveness probing of the backend health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub health_url: String,
    pub probe_interval_secs: u64,
    pub probe_timeout_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            health_url: "http://127.0.0.1:8080/api/health".to_string(),
            probe_interval_secs: 30,
            probe_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub monitor: MonitorConfig,
    pub retry: RetryConfig,
}
