//! List Store: which of the three personal lists each title is in.
//!
//! Mutations for one title are serialized through a per-title async lock
//! and follow the same two phases: apply locally under a single write lock
//! (an atomic move, so a title is never observed in two lists or in none),
//! then persist through the retry policy. A terminal remote failure restores
//! the snapshot taken before the local apply.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, info, warn};

use super::error::{validate_title_id, TrackingError, ValidationError};
use super::models::{ListCounts, ListEntry, ListKind, Progress, TitleId};
use super::unix_now;
use crate::metrics;
use crate::record_store::{RecordKey, RecordStore, RetryPolicy, SyncRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// The record store accepted the change.
    Confirmed { attempts: u32 },
    /// Nothing had to change, nothing was sent.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationOutcome {
    pub title_id: TitleId,
    pub previous: Option<ListKind>,
    pub current: Option<ListKind>,
    /// Entry after the mutation.
    pub entry: Option<ListEntry>,
    pub confirmation: Confirmation,
}

impl MutationOutcome {
    pub fn is_unchanged(&self) -> bool {
        self.confirmation == Confirmation::Unchanged
    }

    /// True for a confirmed transition into `completed` from anywhere else.
    pub fn entered_completed(&self) -> bool {
        !self.is_unchanged()
            && self.current == Some(ListKind::Completed)
            && self.previous != Some(ListKind::Completed)
    }

    /// True if the completed set changed.
    pub fn touches_completed(&self) -> bool {
        !self.is_unchanged()
            && (self.current == Some(ListKind::Completed)
                || self.previous == Some(ListKind::Completed))
            && self.current != self.previous
    }
}

#[derive(Default)]
struct ListState {
    entries: HashMap<TitleId, ListEntry>,
    /// Progress of titles that left `watching`, restored if they come back.
    retained_progress: HashMap<TitleId, Progress>,
    /// Entries as last confirmed by the record store. Differs from
    /// `entries` only while a mutation is in flight.
    confirmed: HashMap<TitleId, ListEntry>,
}

struct Snapshot {
    entry: Option<ListEntry>,
    retained: Option<Progress>,
}

pub struct ListStore {
    user_id: usize,
    state: RwLock<ListState>,
    title_locks: Mutex<HashMap<TitleId, Arc<tokio::sync::Mutex<()>>>>,
    record_store: Arc<dyn RecordStore>,
    retry_policy: RetryPolicy,
}

impl ListStore {
    pub fn new(user_id: usize, record_store: Arc<dyn RecordStore>, retry_policy: RetryPolicy) -> Self {
        Self {
            user_id,
            state: RwLock::new(ListState::default()),
            title_locks: Mutex::new(HashMap::new()),
            record_store,
            retry_policy,
        }
    }

    // Reads

    pub fn current_list(&self, title_id: TitleId) -> Option<ListKind> {
        self.read_state().entries.get(&title_id).map(|e| e.list)
    }

    pub fn entry(&self, title_id: TitleId) -> Option<ListEntry> {
        self.read_state().entries.get(&title_id).cloned()
    }

    /// Entries of `list`, oldest first.
    pub fn entries(&self, list: ListKind) -> Vec<ListEntry> {
        let mut entries: Vec<ListEntry> = self
            .read_state()
            .entries
            .values()
            .filter(|e| e.list == list)
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.added_at, e.title_id));
        entries
    }

    pub fn all_entries(&self) -> Vec<ListEntry> {
        let mut entries: Vec<ListEntry> = self.read_state().entries.values().cloned().collect();
        entries.sort_by_key(|e| (e.added_at, e.title_id));
        entries
    }

    pub fn counts(&self) -> ListCounts {
        let mut counts = ListCounts::default();
        for entry in self.read_state().entries.values() {
            counts.bump(entry.list);
        }
        counts
    }

    /// Completed entries the record store has confirmed, oldest first.
    pub fn confirmed_completed_entries(&self) -> Vec<ListEntry> {
        let mut entries: Vec<ListEntry> = self
            .read_state()
            .confirmed
            .values()
            .filter(|e| e.list == ListKind::Completed)
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.added_at, e.title_id));
        entries
    }

    /// Counts over confirmed entries only. Unlike [`ListStore::counts`],
    /// an in-flight move is not visible here until it is confirmed.
    pub fn confirmed_counts(&self) -> ListCounts {
        let mut counts = ListCounts::default();
        for entry in self.read_state().confirmed.values() {
            counts.bump(entry.list);
        }
        counts
    }

    pub fn retained_progress(&self, title_id: TitleId) -> Option<Progress> {
        self.read_state().retained_progress.get(&title_id).copied()
    }

    /// Replaces the whole state with entries loaded from the record store.
    pub fn hydrate(&self, entries: Vec<ListEntry>) {
        let mut state = self.write_state();
        *state = ListState::default();
        for entry in entries {
            Self::insert_synced(&mut state, entry);
        }
        info!(
            "Hydrated {} list entries for user {}",
            state.entries.len(),
            self.user_id
        );
    }

    fn insert_synced(state: &mut ListState, mut entry: ListEntry) {
        if let Some(progress) = entry.progress.as_mut() {
            progress.current_unit = progress.current_unit.min(progress.total_units);
        }
        if entry.list != ListKind::Watching {
            if let Some(progress) = entry.progress.take() {
                state.retained_progress.insert(entry.title_id, progress);
            }
        } else {
            state.retained_progress.remove(&entry.title_id);
        }
        state.confirmed.insert(entry.title_id, entry.clone());
        state.entries.insert(entry.title_id, entry);
    }

    // Mutations

    /// Moves `title_id` into `target`, leaving whatever list it was in.
    ///
    /// Entering `watching` restores retained progress if there is any,
    /// otherwise starts at 0 of `total_units` when given. Finished retained
    /// progress restarts at 0 of the same total.
    pub async fn add_to_list(
        &self,
        title_id: TitleId,
        target: ListKind,
        total_units: Option<u32>,
    ) -> Result<MutationOutcome, TrackingError> {
        validate_title_id(title_id)?;
        let lock = self.title_lock(title_id);
        let _guard = lock.lock().await;
        self.add_locked("add_to_list", title_id, target, total_units)
            .await
    }

    /// Removes `title_id` from `list`. A title that is not in `list` is left
    /// alone and reported as unchanged.
    pub async fn remove_from_list(
        &self,
        title_id: TitleId,
        list: ListKind,
    ) -> Result<MutationOutcome, TrackingError> {
        validate_title_id(title_id)?;
        let lock = self.title_lock(title_id);
        let _guard = lock.lock().await;
        self.remove_locked("remove_from_list", title_id, list).await
    }

    /// Removes the title if it is already in `target`, moves it there otherwise.
    pub async fn toggle(
        &self,
        title_id: TitleId,
        target: ListKind,
    ) -> Result<MutationOutcome, TrackingError> {
        validate_title_id(title_id)?;
        let lock = self.title_lock(title_id);
        let _guard = lock.lock().await;
        if self.current_list(title_id) == Some(target) {
            self.remove_locked("toggle", title_id, target).await
        } else {
            self.add_locked("toggle", title_id, target, None).await
        }
    }

    /// Advances progress of a title in `watching`. Reaching the last unit
    /// moves the title to `completed` in the same critical section.
    pub async fn update_progress(
        &self,
        title_id: TitleId,
        current_unit: u32,
    ) -> Result<MutationOutcome, TrackingError> {
        validate_title_id(title_id)?;
        let lock = self.title_lock(title_id);
        let _guard = lock.lock().await;

        let previous = self.entry(title_id);
        let entry = match previous {
            Some(entry) if entry.list == ListKind::Watching => entry,
            other => {
                metrics::record_mutation("update_progress", "rejected");
                return Err(ValidationError::NotWatching {
                    title_id,
                    actual: other.map(|e| e.list),
                }
                .into());
            }
        };
        let progress = entry
            .progress
            .ok_or(ValidationError::NoProgress(title_id))?;
        if current_unit < progress.current_unit {
            metrics::record_mutation("update_progress", "rejected");
            return Err(ValidationError::ProgressRegression {
                title_id,
                current: progress.current_unit,
                requested: current_unit,
            }
            .into());
        }
        if current_unit > progress.total_units {
            metrics::record_mutation("update_progress", "rejected");
            return Err(ValidationError::ProgressOverflow {
                title_id,
                requested: current_unit,
                total: progress.total_units,
            }
            .into());
        }
        if current_unit == progress.current_unit {
            return Ok(self.unchanged("update_progress", entry));
        }

        let updated = Progress {
            current_unit,
            ..progress
        };
        let next = if updated.is_finished() {
            info!("Title {} reached its last unit, completing", title_id);
            ListEntry {
                title_id,
                list: ListKind::Completed,
                added_at: unix_now(),
                progress: None,
            }
        } else {
            ListEntry {
                progress: Some(updated),
                ..entry
            }
        };
        self.commit("update_progress", title_id, next, Some(updated))
            .await
    }

    async fn add_locked(
        &self,
        operation: &'static str,
        title_id: TitleId,
        target: ListKind,
        total_units: Option<u32>,
    ) -> Result<MutationOutcome, TrackingError> {
        let total_units = total_units.filter(|t| *t > 0);
        let previous = self.entry(title_id);

        if let Some(entry) = previous.as_ref().filter(|e| e.list == target) {
            let missing_progress = target == ListKind::Watching && entry.progress.is_none();
            return match total_units {
                Some(total) if missing_progress => {
                    let next = ListEntry {
                        progress: Some(Progress::new(total)),
                        ..entry.clone()
                    };
                    self.commit(operation, title_id, next, None).await
                }
                _ => Ok(self.unchanged(operation, entry.clone())),
            };
        }

        let progress = if target == ListKind::Watching {
            match self.retained_progress(title_id) {
                // A finished title coming back is a rewatch.
                Some(retained) if retained.is_finished() => {
                    Some(Progress::new(retained.total_units))
                }
                Some(retained) => Some(retained),
                None => total_units.map(Progress::new),
            }
        } else {
            None
        };
        let next = ListEntry {
            title_id,
            list: target,
            added_at: unix_now(),
            progress,
        };
        let leaving = previous.and_then(|e| e.progress);
        self.commit(operation, title_id, next, leaving).await
    }

    async fn remove_locked(
        &self,
        operation: &'static str,
        title_id: TitleId,
        list: ListKind,
    ) -> Result<MutationOutcome, TrackingError> {
        let previous = match self.entry(title_id) {
            Some(entry) if entry.list == list => entry,
            _ => {
                debug!("Title {} is not in {}, nothing to remove", title_id, list);
                metrics::record_mutation(operation, "unchanged");
                return Ok(MutationOutcome {
                    title_id,
                    previous: self.current_list(title_id),
                    current: self.current_list(title_id),
                    entry: self.entry(title_id),
                    confirmation: Confirmation::Unchanged,
                });
            }
        };

        let snapshot = self.apply(title_id, None, previous.progress);
        let key = RecordKey::ListEntry(title_id);
        let result = self
            .retry_policy
            .run(operation, || self.record_store.delete(self.user_id, key.clone()))
            .await;
        self.finish(operation, title_id, Some(previous.list), None, snapshot, result)
    }

    /// Applies `next` locally, then persists it.
    async fn commit(
        &self,
        operation: &'static str,
        title_id: TitleId,
        next: ListEntry,
        leaving_progress: Option<Progress>,
    ) -> Result<MutationOutcome, TrackingError> {
        let previous = self.current_list(title_id);
        let snapshot = self.apply(title_id, Some(next.clone()), leaving_progress);
        let result = self
            .retry_policy
            .run(operation, || {
                self.record_store
                    .upsert(self.user_id, SyncRecord::ListEntry(next.clone()))
            })
            .await;
        self.finish(operation, title_id, previous, Some(next), snapshot, result)
    }

    fn finish(
        &self,
        operation: &'static str,
        title_id: TitleId,
        previous: Option<ListKind>,
        next: Option<ListEntry>,
        snapshot: Snapshot,
        result: Result<((), u32), TrackingError>,
    ) -> Result<MutationOutcome, TrackingError> {
        match result {
            Ok(((), attempts)) => {
                {
                    let mut state = self.write_state();
                    match next.as_ref() {
                        Some(entry) => {
                            state.confirmed.insert(title_id, entry.clone());
                        }
                        None => {
                            state.confirmed.remove(&title_id);
                        }
                    }
                }
                metrics::record_mutation(operation, "confirmed");
                debug!(
                    "{} of title {} confirmed: {:?} -> {:?}",
                    operation,
                    title_id,
                    previous,
                    next.as_ref().map(|e| e.list)
                );
                Ok(MutationOutcome {
                    title_id,
                    previous,
                    current: next.as_ref().map(|e| e.list),
                    entry: next,
                    confirmation: Confirmation::Confirmed { attempts },
                })
            }
            Err(err) => {
                self.restore(title_id, snapshot);
                metrics::record_mutation(operation, "rolled_back");
                warn!(
                    "{} of title {} rolled back to {:?}: {}",
                    operation, title_id, previous, err
                );
                Err(err)
            }
        }
    }

    fn unchanged(&self, operation: &'static str, entry: ListEntry) -> MutationOutcome {
        metrics::record_mutation(operation, "unchanged");
        MutationOutcome {
            title_id: entry.title_id,
            previous: Some(entry.list),
            current: Some(entry.list),
            entry: Some(entry),
            confirmation: Confirmation::Unchanged,
        }
    }

    fn apply(
        &self,
        title_id: TitleId,
        next: Option<ListEntry>,
        leaving_progress: Option<Progress>,
    ) -> Snapshot {
        let mut state = self.write_state();
        let snapshot = Snapshot {
            entry: state.entries.get(&title_id).cloned(),
            retained: state.retained_progress.get(&title_id).copied(),
        };

        match next {
            Some(entry) => {
                if entry.list == ListKind::Watching {
                    state.retained_progress.remove(&title_id);
                } else if let Some(progress) = leaving_progress {
                    state.retained_progress.insert(title_id, progress);
                }
                state.entries.insert(title_id, entry);
            }
            None => {
                if let Some(progress) = leaving_progress {
                    state.retained_progress.insert(title_id, progress);
                }
                state.entries.remove(&title_id);
            }
        }
        snapshot
    }

    fn restore(&self, title_id: TitleId, snapshot: Snapshot) {
        let mut state = self.write_state();
        match snapshot.entry {
            Some(entry) => state.entries.insert(title_id, entry),
            None => state.entries.remove(&title_id),
        };
        match snapshot.retained {
            Some(progress) => state.retained_progress.insert(title_id, progress),
            None => state.retained_progress.remove(&title_id),
        };
    }

    fn title_lock(&self, title_id: TitleId) -> Arc<tokio::sync::Mutex<()>> {
        self.title_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(title_id)
            .or_default()
            .clone()
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, ListState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, ListState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
