use super::{RecordKey, RecordStore, RemoteError, SyncRecord};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

/// Record store kept entirely in memory, mostly for tests.
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: Mutex<HashMap<usize, BTreeMap<RecordKey, SyncRecord>>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the stored record for `key`, if any.
    pub fn get(&self, user_id: usize, key: &RecordKey) -> Option<SyncRecord> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.get(&user_id).and_then(|r| r.get(key)).cloned()
    }

    pub fn len(&self, user_id: usize) -> usize {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.get(&user_id).map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn upsert(&self, user_id: usize, record: SyncRecord) -> Result<(), RemoteError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records
            .entry(user_id)
            .or_default()
            .insert(record.key(), record);
        Ok(())
    }

    async fn delete(&self, user_id: usize, key: RecordKey) -> Result<(), RemoteError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(user_records) = records.get_mut(&user_id) {
            user_records.remove(&key);
        }
        Ok(())
    }

    async fn list_by_user(&self, user_id: usize) -> Result<Vec<SyncRecord>, RemoteError> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records
            .get(&user_id)
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::models::RankingEntry;

    #[tokio::test]
    async fn test_upsert_is_last_write_wins() {
        let store = InMemoryRecordStore::new();

        store
            .upsert(1, SyncRecord::RankingEntry(RankingEntry { title_id: 4, rank: 2 }))
            .await
            .unwrap();
        store
            .upsert(1, SyncRecord::RankingEntry(RankingEntry { title_id: 4, rank: 1 }))
            .await
            .unwrap();

        assert_eq!(store.len(1), 1);
        assert_eq!(
            store.get(1, &RecordKey::RankingEntry(4)),
            Some(SyncRecord::RankingEntry(RankingEntry { title_id: 4, rank: 1 }))
        );
        assert_eq!(store.len(2), 0);
    }

    #[tokio::test]
    async fn test_delete_unknown_user_is_ok() {
        let store = InMemoryRecordStore::new();
        store.delete(9, RecordKey::ListEntry(1)).await.unwrap();
        assert!(store.list_by_user(9).await.unwrap().is_empty());
    }
}
