use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

/// Backend confirmation state of an optimistically applied record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, EnumString, Display, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PersistState {
    /// Applied locally, not yet confirmed by the backend.
    #[default]
    Pending,
    /// The backend acknowledged the write.
    Confirmed,
    /// The write was rejected or exhausted its retries.
    Failed,
}

/// An immutable content snapshot of a section. Created on every save, never
/// mutated, never deleted; `version_number` strictly increases per section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct Snapshot {
    pub id: Uuid,
    pub section_id: Uuid,
    pub version_number: i64,
    pub content_snapshot: String,
    pub author_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub change_summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateSnapshot {
    pub section_id: Uuid,
    pub content: String,
    pub author_id: Uuid,
    pub change_summary: Option<String>,
}

impl Snapshot {
    pub fn from_create(data: &CreateSnapshot, version_number: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            section_id: data.section_id,
            version_number,
            content_snapshot: data.content.clone(),
            author_id: data.author_id,
            created_at: Utc::now(),
            change_summary: data.change_summary.clone(),
        }
    }
}

/// A record plus its confirmation state, so callers can tell optimistic data
/// from acknowledged data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct Tracked<T> {
    pub record: T,
    pub persist_state: PersistState,
}

impl<T> Tracked<T> {
    pub fn pending(record: T) -> Self {
        Self {
            record,
            persist_state: PersistState::Pending,
        }
    }

    pub fn confirmed(record: T) -> Self {
        Self {
            record,
            persist_state: PersistState::Confirmed,
        }
    }
}

impl<T> std::ops::Deref for Tracked<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.record
    }
}

impl<T> std::ops::DerefMut for Tracked<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.record
    }
}
