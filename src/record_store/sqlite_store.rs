use super::schema::VERSIONED_SCHEMAS;
use super::{AchievementUnlock, RecordKey, RecordStore, RemoteError, RemoteErrorKind, SyncRecord};
use crate::sqlite_persistence::open_versioned;
use crate::tracking::models::{CompletionRecord, ListEntry, ListKind, Progress, RankingEntry};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// Record store backed by a local SQLite file.
///
/// Every call runs on the caller's task under a single connection lock.
#[derive(Clone)]
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl From<rusqlite::Error> for RemoteError {
    fn from(err: rusqlite::Error) -> Self {
        RemoteError::new(RemoteErrorKind::Storage, err.to_string())
    }
}

impl SqliteRecordStore {
    pub fn new<T: AsRef<Path>>(db_path: T) -> Result<Self> {
        let db_path = db_path.as_ref();
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open record database {:?}", db_path))?;
        open_versioned(&conn, VERSIONED_SCHEMAS)?;
        info!("Opened record database at {:?}", db_path);

        Ok(SqliteRecordStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        open_versioned(&conn, VERSIONED_SCHEMAS)?;
        Ok(SqliteRecordStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        f(&conn)
    }

    fn upsert_blocking(&self, user_id: usize, record: &SyncRecord) -> Result<(), RemoteError> {
        self.with_conn(|conn| {
            match record {
                SyncRecord::ListEntry(entry) => {
                    conn.execute(
                        "INSERT INTO list_entry (user_id, title_id, list, added_at, current_unit, total_units)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                         ON CONFLICT(user_id, title_id) DO UPDATE SET
                            list = excluded.list,
                            added_at = excluded.added_at,
                            current_unit = excluded.current_unit,
                            total_units = excluded.total_units",
                        params![
                            user_id,
                            entry.title_id,
                            entry.list.as_str(),
                            entry.added_at,
                            entry.progress.map(|p| p.current_unit),
                            entry.progress.map(|p| p.total_units),
                        ],
                    )?;
                }
                SyncRecord::RankingEntry(entry) => {
                    conn.execute(
                        "INSERT INTO ranking_entry (user_id, title_id, rank) VALUES (?1, ?2, ?3)
                         ON CONFLICT(user_id, title_id) DO UPDATE SET rank = excluded.rank",
                        params![user_id, entry.title_id, entry.rank],
                    )?;
                }
                SyncRecord::CompletionRecord(record) => {
                    let genres = serde_json::to_string(&record.genres)
                        .map_err(|e| RemoteError::new(RemoteErrorKind::Rejected, e.to_string()))?;
                    let cast = serde_json::to_string(&record.cast)
                        .map_err(|e| RemoteError::new(RemoteErrorKind::Rejected, e.to_string()))?;
                    conn.execute(
                        "INSERT INTO completion_record
                            (id, user_id, title_id, title, total_runtime_minutes, completed_at,
                             runtime_estimated, genres, cast_members)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                         ON CONFLICT(id) DO UPDATE SET
                            title = excluded.title,
                            total_runtime_minutes = excluded.total_runtime_minutes,
                            completed_at = excluded.completed_at,
                            runtime_estimated = excluded.runtime_estimated,
                            genres = excluded.genres,
                            cast_members = excluded.cast_members",
                        params![
                            record.id,
                            user_id,
                            record.title_id,
                            record.title,
                            record.total_runtime_minutes,
                            record.completed_at,
                            record.runtime_estimated,
                            genres,
                            cast,
                        ],
                    )?;
                }
                SyncRecord::AchievementUnlock(unlock) => {
                    conn.execute(
                        "INSERT INTO achievement_unlock (user_id, achievement_id, unlocked_at)
                         VALUES (?1, ?2, ?3)
                         ON CONFLICT(user_id, achievement_id) DO UPDATE SET
                            unlocked_at = excluded.unlocked_at",
                        params![user_id, unlock.achievement_id, unlock.unlocked_at],
                    )?;
                }
            }
            debug!("Upserted {} for user {}", record.key(), user_id);
            Ok(())
        })
    }

    fn delete_blocking(&self, user_id: usize, key: &RecordKey) -> Result<(), RemoteError> {
        self.with_conn(|conn| {
            let deleted = match key {
                RecordKey::ListEntry(title_id) => conn.execute(
                    "DELETE FROM list_entry WHERE user_id = ?1 AND title_id = ?2",
                    params![user_id, title_id],
                )?,
                RecordKey::RankingEntry(title_id) => conn.execute(
                    "DELETE FROM ranking_entry WHERE user_id = ?1 AND title_id = ?2",
                    params![user_id, title_id],
                )?,
                RecordKey::CompletionRecord(id) => conn.execute(
                    "DELETE FROM completion_record WHERE user_id = ?1 AND id = ?2",
                    params![user_id, id],
                )?,
                RecordKey::AchievementUnlock(id) => conn.execute(
                    "DELETE FROM achievement_unlock WHERE user_id = ?1 AND achievement_id = ?2",
                    params![user_id, id],
                )?,
            };
            debug!("Deleted {} for user {} ({} rows)", key, user_id, deleted);
            Ok(())
        })
    }

    fn list_blocking(&self, user_id: usize) -> Result<Vec<SyncRecord>, RemoteError> {
        self.with_conn(|conn| {
            let mut records = Vec::new();

            let mut stmt = conn.prepare(
                "SELECT title_id, list, added_at, current_unit, total_units
                 FROM list_entry WHERE user_id = ?1 ORDER BY added_at, title_id",
            )?;
            let rows = stmt.query_map(params![user_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<u32>>(3)?,
                    row.get::<_, Option<u32>>(4)?,
                ))
            })?;
            for row in rows {
                let (title_id, list, added_at, current_unit, total_units) = row?;
                let list = ListKind::from_str(&list).ok_or_else(|| {
                    RemoteError::new(
                        RemoteErrorKind::Storage,
                        format!("Unknown list '{}' for title {}", list, title_id),
                    )
                })?;
                let progress = match (current_unit, total_units) {
                    (Some(current_unit), Some(total_units)) => Some(Progress {
                        current_unit,
                        total_units,
                    }),
                    _ => None,
                };
                records.push(SyncRecord::ListEntry(ListEntry {
                    title_id,
                    list,
                    added_at,
                    progress,
                }));
            }

            let mut stmt = conn.prepare(
                "SELECT title_id, rank FROM ranking_entry WHERE user_id = ?1 ORDER BY rank",
            )?;
            let rows = stmt.query_map(params![user_id], |row| {
                Ok(RankingEntry {
                    title_id: row.get(0)?,
                    rank: row.get(1)?,
                })
            })?;
            for row in rows {
                records.push(SyncRecord::RankingEntry(row?));
            }

            let mut stmt = conn.prepare(
                "SELECT id, title_id, title, total_runtime_minutes, completed_at,
                        runtime_estimated, genres, cast_members
                 FROM completion_record WHERE user_id = ?1 ORDER BY completed_at, rowid",
            )?;
            let rows = stmt.query_map(params![user_id], |row| {
                Ok((
                    CompletionRecord {
                        id: row.get(0)?,
                        title_id: row.get(1)?,
                        title: row.get(2)?,
                        total_runtime_minutes: row.get(3)?,
                        completed_at: row.get(4)?,
                        runtime_estimated: row.get(5)?,
                        genres: Vec::new(),
                        cast: Vec::new(),
                    },
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })?;
            for row in rows {
                let (mut record, genres, cast) = row?;
                record.genres = serde_json::from_str(&genres).map_err(|e| {
                    RemoteError::new(RemoteErrorKind::Storage, format!("Bad genres: {}", e))
                })?;
                record.cast = serde_json::from_str(&cast).map_err(|e| {
                    RemoteError::new(RemoteErrorKind::Storage, format!("Bad cast: {}", e))
                })?;
                records.push(SyncRecord::CompletionRecord(record));
            }

            let mut stmt = conn.prepare(
                "SELECT achievement_id, unlocked_at FROM achievement_unlock
                 WHERE user_id = ?1 ORDER BY unlocked_at, achievement_id",
            )?;
            let rows = stmt.query_map(params![user_id], |row| {
                Ok(AchievementUnlock {
                    achievement_id: row.get(0)?,
                    unlocked_at: row.get(1)?,
                })
            })?;
            for row in rows {
                records.push(SyncRecord::AchievementUnlock(row?));
            }

            Ok(records)
        })
    }

    /// Number of completion records stored for the user.
    pub fn completion_count(&self, user_id: usize) -> Result<usize> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM completion_record WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[cfg(feature = "slowdown")]
async fn random_slowdown() {
    use rand::Rng;
    let millis = rand::rng().random_range(0..1500u64);
    tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
}

#[cfg(not(feature = "slowdown"))]
async fn random_slowdown() {}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn upsert(&self, user_id: usize, record: SyncRecord) -> Result<(), RemoteError> {
        random_slowdown().await;
        self.upsert_blocking(user_id, &record)
    }

    async fn delete(&self, user_id: usize, key: RecordKey) -> Result<(), RemoteError> {
        random_slowdown().await;
        self.delete_blocking(user_id, &key)
    }

    async fn list_by_user(&self, user_id: usize) -> Result<Vec<SyncRecord>, RemoteError> {
        random_slowdown().await;
        self.list_blocking(user_id)
    }
}
