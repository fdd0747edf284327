//! Remote persistence contract.
//!
//! The engine keeps an optimistic local copy of the user's state and mirrors
//! it to a record store through this small CRUD surface. Implementations
//! only need last-write-wins semantics per record key.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tracking::models::{CompletionRecord, ListEntry, RankingEntry, TitleId};

/// Type of error returned by a record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    Connection, // Network error - retry
    Timeout,    // Request timeout - retry
    RateLimited, // Backend asked us to slow down - retry
    Storage,    // Backend storage failure - retry
    Rejected,   // Backend refused the record - NO retry
}

impl RemoteErrorKind {
    /// Returns true if this error type should trigger a retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RemoteErrorKind::Rejected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteErrorKind::Connection => "connection",
            RemoteErrorKind::Timeout => "timeout",
            RemoteErrorKind::RateLimited => "rate_limited",
            RemoteErrorKind::Storage => "storage",
            RemoteErrorKind::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} error: {message}", .kind.as_str())]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// A single unit of user state mirrored to the record store.
///
/// Serialized adjacently tagged: `{"type": "list_entry", "payload": {...}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SyncRecord {
    #[serde(rename = "list_entry")]
    ListEntry(ListEntry),

    #[serde(rename = "ranking_entry")]
    RankingEntry(RankingEntry),

    #[serde(rename = "completion_record")]
    CompletionRecord(CompletionRecord),

    #[serde(rename = "achievement_unlock")]
    AchievementUnlock(AchievementUnlock),
}

/// Persisted unlock of an achievement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementUnlock {
    pub achievement_id: String,
    pub unlocked_at: i64,
}

/// Identity of a record, used for deletes and de-duplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "id")]
pub enum RecordKey {
    #[serde(rename = "list_entry")]
    ListEntry(TitleId),

    #[serde(rename = "ranking_entry")]
    RankingEntry(TitleId),

    #[serde(rename = "completion_record")]
    CompletionRecord(String),

    #[serde(rename = "achievement_unlock")]
    AchievementUnlock(String),
}

impl SyncRecord {
    pub fn key(&self) -> RecordKey {
        match self {
            SyncRecord::ListEntry(entry) => RecordKey::ListEntry(entry.title_id),
            SyncRecord::RankingEntry(entry) => RecordKey::RankingEntry(entry.title_id),
            SyncRecord::CompletionRecord(record) => RecordKey::CompletionRecord(record.id.clone()),
            SyncRecord::AchievementUnlock(unlock) => {
                RecordKey::AchievementUnlock(unlock.achievement_id.clone())
            }
        }
    }

    /// Get the record type string for storage and logging.
    pub fn record_type(&self) -> &'static str {
        match self {
            SyncRecord::ListEntry(_) => "list_entry",
            SyncRecord::RankingEntry(_) => "ranking_entry",
            SyncRecord::CompletionRecord(_) => "completion_record",
            SyncRecord::AchievementUnlock(_) => "achievement_unlock",
        }
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKey::ListEntry(id) => write!(f, "list_entry/{}", id),
            RecordKey::RankingEntry(id) => write!(f, "ranking_entry/{}", id),
            RecordKey::CompletionRecord(id) => write!(f, "completion_record/{}", id),
            RecordKey::AchievementUnlock(id) => write!(f, "achievement_unlock/{}", id),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts or replaces the record identified by `record.key()`.
    async fn upsert(&self, user_id: usize, record: SyncRecord) -> Result<(), RemoteError>;

    /// Deletes the record with the given key.
    /// Deleting a missing record is not an error.
    async fn delete(&self, user_id: usize, key: RecordKey) -> Result<(), RemoteError>;

    /// Returns every record stored for the user.
    async fn list_by_user(&self, user_id: usize) -> Result<Vec<SyncRecord>, RemoteError>;
}
