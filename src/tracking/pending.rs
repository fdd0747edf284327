//! Sync operations that could not be confirmed remotely yet.
//!
//! The queue outlives a session: `sign_out` hands it back and the next
//! `sign_in` replays it.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::record_store::{RecordKey, SyncRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PendingOp {
    Upsert { record: SyncRecord },
    Delete { key: RecordKey },
}

impl PendingOp {
    pub fn key(&self) -> RecordKey {
        match self {
            PendingOp::Upsert { record } => record.key(),
            PendingOp::Delete { key } => key.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSyncQueue {
    ops: Vec<PendingOp>,
}

impl PendingSyncQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues `op`, replacing any older op on the same record.
    pub fn push(&mut self, op: PendingOp) {
        let key = op.key();
        self.ops.retain(|existing| existing.key() != key);
        self.ops.push(op);
    }

    pub fn push_upsert(&mut self, record: SyncRecord) {
        self.push(PendingOp::Upsert { record });
    }

    pub fn push_delete(&mut self, key: RecordKey) {
        self.push(PendingOp::Delete { key });
    }

    /// Removes `op` if it is still the latest op for its record.
    pub fn remove_if_current(&mut self, op: &PendingOp) -> bool {
        let before = self.ops.len();
        self.ops.retain(|existing| existing != op);
        self.ops.len() != before
    }

    /// Drops whatever op is queued for `key`. Returns true if there was one.
    pub fn remove_key(&mut self, key: &RecordKey) -> bool {
        let before = self.ops.len();
        self.ops.retain(|existing| existing.key() != *key);
        self.ops.len() != before
    }

    pub fn ops(&self) -> &[PendingOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Loads a queue saved by [`PendingSyncQueue::save`]. A missing file is
    /// an empty queue.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pending queue {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse pending queue {:?}", path))
    }

    /// Writes the queue as JSON, or removes the file when the queue is empty.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if self.is_empty() {
            if path.exists() {
                std::fs::remove_file(path)
                    .with_context(|| format!("Failed to remove pending queue {:?}", path))?;
            }
            return Ok(());
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write pending queue {:?}", path))
    }
}
