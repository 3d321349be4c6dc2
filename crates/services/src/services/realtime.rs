//! Subscription bookkeeping for the backend change feed. Best-effort: slow
//! subscribers lag and drop events rather than blocking publishers.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumString};
use tokio::sync::broadcast;
use tracing::debug;
use ts_rs::TS;

const CHANNEL_CAPACITY: usize = 256;

/// Backend table a change event originates from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RemoteTable {
    Sections,
    Versions,
    Comments,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A change payload pushed by the backend, routed by table.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct ChangeEvent {
    pub table: RemoteTable,
    pub kind: ChangeKind,
    pub record: Value,
}

/// Per-table broadcast channels between the change-feed transport and the
/// in-memory stores.
#[derive(Clone, Default)]
pub struct RealtimeHub {
    channels: Arc<DashMap<RemoteTable, broadcast::Sender<ChangeEvent>>>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, table: RemoteTable) -> broadcast::Receiver<ChangeEvent> {
        self.channels
            .entry(table)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Fan an event out to the table's subscribers. Returns how many
    /// subscribers received it.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let Some(tx) = self.channels.get(&event.table) else {
            debug!(table = %event.table, "dropping change event, no subscribers");
            return 0;
        };
        tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self, table: RemoteTable) -> usize {
        self.channels
            .get(&table)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}
