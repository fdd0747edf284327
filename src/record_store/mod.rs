//! Remote persistence of tracking records.

mod memory_store;
mod retry_policy;
mod schema;
mod sqlite_store;
mod trait_def;

pub use memory_store::InMemoryRecordStore;
pub use retry_policy::RetryPolicy;
pub use sqlite_store::SqliteRecordStore;
pub use trait_def::{
    AchievementUnlock, RecordKey, RecordStore, RemoteError, RemoteErrorKind, SyncRecord,
};

#[cfg(test)]
pub use trait_def::MockRecordStore;
