//! Session-scoped owner of the tracking components.
//!
//! A [`TrackingSession`] exists between `sign_in` and `sign_out` of one
//! user. It wires the List Store, Ranking Store, Stats Aggregator,
//! Completion Pipeline and Achievement Engine together and runs two
//! background tasks: the premium watcher and the pending-sync retry loop.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::achievements::{
    default_definitions, Achievement, AchievementDefinition, AchievementEngine, EvaluationInput,
};
use super::completion::{CompletionEvent, CompletionPipeline, CompletionReport, CompletionSink};
use super::error::{TrackingError, ValidationError};
use super::events::EngineEvent;
use super::list_store::{Confirmation, ListStore, MutationOutcome};
use super::models::{
    CompletionRecord, ListCounts, ListEntry, ListKind, RankingEntry, TitleId,
};
use super::pending::{PendingOp, PendingSyncQueue};
use super::premium::PremiumStatus;
use super::ranking_store::{RankingChange, RankingStore};
use super::stats::{self, UserStats};
use super::unix_now;
use crate::catalog::CatalogProvider;
use crate::config::AppConfig;
use crate::metrics;
use crate::record_store::{
    AchievementUnlock, RecordKey, RecordStore, RemoteErrorKind, RetryPolicy, SyncRecord,
};

/// External collaborators of a session.
#[derive(Clone)]
pub struct SessionDeps {
    pub record_store: Arc<dyn RecordStore>,
    pub catalog: Arc<dyn CatalogProvider>,
    pub premium: PremiumStatus,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub retry_policy: RetryPolicy,
    pub metadata_timeout: Duration,
    pub pending_retry_interval: Duration,
    pub achievements: Vec<AchievementDefinition>,
    pub event_capacity: usize,
}

impl SessionConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            retry_policy: RetryPolicy::new(&config.sync),
            metadata_timeout: config.completion.metadata_timeout(),
            pending_retry_interval: config.sync.pending_retry_interval(),
            ..Default::default()
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            metadata_timeout: Duration::from_secs(3),
            pending_retry_interval: Duration::from_secs(60),
            achievements: default_definitions(),
            event_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankingOutcome {
    pub title_id: TitleId,
    pub previous_rank: Option<u32>,
    pub current_rank: Option<u32>,
    pub evicted: Option<TitleId>,
    pub confirmation: Confirmation,
}

pub struct TrackingSession {
    inner: Arc<SessionInner>,
    shutdown: CancellationToken,
    background: Vec<JoinHandle<()>>,
}

struct SessionInner {
    user_id: usize,
    lists: ListStore,
    ranking: RwLock<RankingStore>,
    ranking_lock: tokio::sync::Mutex<()>,
    history: RwLock<Vec<CompletionRecord>>,
    stats: RwLock<Arc<UserStats>>,
    achievements: Mutex<AchievementEngine>,
    premium: PremiumStatus,
    pending: Mutex<PendingSyncQueue>,
    flush_lock: tokio::sync::Mutex<()>,
    record_store: Arc<dyn RecordStore>,
    retry_policy: RetryPolicy,
    pipeline: CompletionPipeline,
    events: broadcast::Sender<EngineEvent>,
    in_flight: Mutex<Vec<JoinHandle<CompletionReport>>>,
    /// Reports of pipelines that finished before anyone settled them.
    finished_reports: Mutex<VecDeque<CompletionReport>>,
    /// Ranking size as last confirmed by the record store.
    ranked_confirmed: AtomicUsize,
}

const MAX_UNSETTLED_REPORTS: usize = 32;

impl TrackingSession {
    /// Loads the user's records, replays `carried_over` on top of them and
    /// starts the background tasks.
    pub async fn sign_in(
        user_id: usize,
        deps: SessionDeps,
        config: SessionConfig,
        carried_over: PendingSyncQueue,
    ) -> Result<Self, TrackingError> {
        let (mut records, _) = config
            .retry_policy
            .run("list_by_user", || deps.record_store.list_by_user(user_id))
            .await?;
        for op in carried_over.ops() {
            match op {
                PendingOp::Upsert { record } => {
                    let key = record.key();
                    match records.iter_mut().find(|r| r.key() == key) {
                        Some(existing) => *existing = record.clone(),
                        None => records.push(record.clone()),
                    }
                }
                PendingOp::Delete { key } => records.retain(|r| r.key() != *key),
            }
        }

        let mut entries = Vec::new();
        let mut ranking_entries = Vec::new();
        let mut history = Vec::new();
        let mut unlocks = Vec::new();
        for record in records {
            match record {
                SyncRecord::ListEntry(entry) => entries.push(entry),
                SyncRecord::RankingEntry(entry) => ranking_entries.push(entry),
                SyncRecord::CompletionRecord(record) => history.push(record),
                SyncRecord::AchievementUnlock(unlock) => unlocks.push(unlock),
            }
        }

        let mut pending = carried_over;
        let ranking = match RankingStore::from_entries(ranking_entries.clone()) {
            Ok(ranking) => ranking,
            Err(err) => {
                warn!("Repairing ranking of user {}: {}", user_id, err);
                let repaired = RankingStore::repaired(ranking_entries.clone());
                for entry in &ranking_entries {
                    if repaired.rank_of(entry.title_id).is_none() {
                        pending.push_delete(RecordKey::RankingEntry(entry.title_id));
                    }
                }
                for entry in repaired.entries() {
                    pending.push_upsert(SyncRecord::RankingEntry(entry));
                }
                repaired
            }
        };

        let lists = ListStore::new(
            user_id,
            deps.record_store.clone(),
            config.retry_policy.clone(),
        );
        lists.hydrate(entries);

        let mut engine = AchievementEngine::new(config.achievements.clone());
        engine.restore_unlocks(&unlocks);

        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let pipeline = CompletionPipeline::new(
            user_id,
            deps.catalog.clone(),
            deps.record_store.clone(),
            config.retry_policy.clone(),
            config.metadata_timeout,
        );
        metrics::set_pending_sync_records(pending.len());
        info!(
            "User {} signed in: {} completion records, {} unlocks, {} ranked, {} pending",
            user_id,
            history.len(),
            unlocks.len(),
            ranking.len(),
            pending.len()
        );

        let ranked = ranking.len();
        let inner = Arc::new(SessionInner {
            user_id,
            lists,
            ranking: RwLock::new(ranking),
            ranking_lock: tokio::sync::Mutex::new(()),
            history: RwLock::new(history),
            stats: RwLock::new(Arc::new(UserStats::default())),
            achievements: Mutex::new(engine),
            premium: deps.premium.clone(),
            pending: Mutex::new(pending),
            flush_lock: tokio::sync::Mutex::new(()),
            record_store: deps.record_store,
            retry_policy: config.retry_policy,
            pipeline,
            events,
            in_flight: Mutex::new(Vec::new()),
            finished_reports: Mutex::new(VecDeque::new()),
            ranked_confirmed: AtomicUsize::new(ranked),
        });

        // Flips after this point reach the watcher, earlier ones are seen
        // by the evaluation below.
        let mut premium_rx = deps.premium.subscribe();
        let was_premium = *premium_rx.borrow_and_update();
        inner.refresh_stats();
        inner.evaluate_achievements().await;

        let shutdown = CancellationToken::new();
        let background = vec![
            tokio::spawn(watch_premium(
                inner.clone(),
                premium_rx,
                was_premium,
                shutdown.child_token(),
            )),
            tokio::spawn(retry_pending(
                inner.clone(),
                config.pending_retry_interval,
                shutdown.child_token(),
            )),
        ];

        Ok(Self {
            inner,
            shutdown,
            background,
        })
    }

    pub fn user_id(&self) -> usize {
        self.inner.user_id
    }

    // List Store

    pub fn get_current_list(&self, title_id: TitleId) -> Option<ListKind> {
        self.inner.lists.current_list(title_id)
    }

    pub fn entry(&self, title_id: TitleId) -> Option<ListEntry> {
        self.inner.lists.entry(title_id)
    }

    pub fn list(&self, list: ListKind) -> Vec<ListEntry> {
        self.inner.lists.entries(list)
    }

    pub fn counts(&self) -> ListCounts {
        self.inner.lists.counts()
    }

    pub async fn add_to_list(
        &self,
        title_id: TitleId,
        target: ListKind,
        total_units: Option<u32>,
    ) -> Result<MutationOutcome, TrackingError> {
        let result = self
            .inner
            .lists
            .add_to_list(title_id, target, total_units)
            .await;
        self.inner.after_list_mutation("add_to_list", title_id, result).await
    }

    pub async fn remove_from_list(
        &self,
        title_id: TitleId,
        list: ListKind,
    ) -> Result<MutationOutcome, TrackingError> {
        let result = self.inner.lists.remove_from_list(title_id, list).await;
        self.inner
            .after_list_mutation("remove_from_list", title_id, result)
            .await
    }

    pub async fn toggle(
        &self,
        title_id: TitleId,
        target: ListKind,
    ) -> Result<MutationOutcome, TrackingError> {
        let result = self.inner.lists.toggle(title_id, target).await;
        self.inner.after_list_mutation("toggle", title_id, result).await
    }

    pub async fn update_progress(
        &self,
        title_id: TitleId,
        current_unit: u32,
    ) -> Result<MutationOutcome, TrackingError> {
        let result = self.inner.lists.update_progress(title_id, current_unit).await;
        self.inner
            .after_list_mutation("update_progress", title_id, result)
            .await
    }

    // Ranking Store

    pub async fn set_rank(&self, title_id: TitleId, rank: u32) -> Result<RankingOutcome, TrackingError> {
        self.inner
            .mutate_ranking("set_rank", title_id, |ranking| ranking.set_rank(title_id, rank))
            .await
    }

    pub async fn remove_rank(&self, title_id: TitleId) -> Result<RankingOutcome, TrackingError> {
        self.inner
            .mutate_ranking("remove_rank", title_id, |ranking| ranking.remove_rank(title_id))
            .await
    }

    pub fn ranking(&self) -> Vec<RankingEntry> {
        self.inner.read_ranking().entries()
    }

    pub fn rank_of(&self, title_id: TitleId) -> Option<u32> {
        self.inner.read_ranking().rank_of(title_id)
    }

    // Stats and achievements

    /// Latest stats snapshot. Never mutated after publication.
    pub fn stats(&self) -> Arc<UserStats> {
        self.inner
            .stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn completion_history(&self) -> Vec<CompletionRecord> {
        self.inner
            .history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn achievements(&self) -> Vec<Achievement> {
        self.inner.lock_achievements().achievements()
    }

    pub async fn evaluate_achievements(&self) -> BTreeSet<String> {
        self.inner.evaluate_achievements().await
    }

    pub fn premium(&self) -> &PremiumStatus {
        &self.inner.premium
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    // Sync

    pub fn pending_len(&self) -> usize {
        self.inner.lock_pending().len()
    }

    /// Tries every pending op once (with retries). Returns how many were
    /// confirmed.
    pub async fn flush_pending(&self) -> usize {
        self.inner.flush_pending().await
    }

    /// Waits for every in-flight completion pipeline. Also returns the
    /// reports of pipelines that finished since the last call.
    pub async fn settle(&self) -> Vec<CompletionReport> {
        let mut reports: Vec<CompletionReport> = self
            .inner
            .finished_reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        loop {
            let handles = std::mem::take(
                &mut *self
                    .inner
                    .in_flight
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
            );
            if handles.is_empty() {
                break;
            }
            for result in futures::future::join_all(handles).await {
                match result {
                    Ok(report) => reports.push(report),
                    Err(err) => error!("Completion task failed: {}", err),
                }
            }
        }
        reports
    }

    /// Stops background work, lets in-flight completions finish and
    /// returns whatever could not be synced for the next session.
    pub async fn sign_out(mut self) -> PendingSyncQueue {
        self.shutdown.cancel();
        for handle in self.background.drain(..) {
            if let Err(err) = handle.await {
                error!("Background task failed: {}", err);
            }
        }
        self.settle().await;
        if self.pending_len() > 0 {
            self.inner.flush_pending().await;
        }

        let queue = self.inner.lock_pending().clone();
        info!(
            "User {} signed out with {} pending record(s)",
            self.inner.user_id,
            queue.len()
        );
        queue
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl SessionInner {
    fn emit(&self, event: EngineEvent) {
        debug!("Emitting {}", event.event_type());
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn read_ranking(&self) -> std::sync::RwLockReadGuard<'_, RankingStore> {
        self.ranking.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, PendingSyncQueue> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_achievements(&self) -> std::sync::MutexGuard<'_, AchievementEngine> {
        self.achievements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(&self, op: PendingOp) {
        let mut pending = self.lock_pending();
        pending.push(op);
        metrics::set_pending_sync_records(pending.len());
    }

    async fn after_list_mutation(
        self: &Arc<Self>,
        operation: &str,
        title_id: TitleId,
        result: Result<MutationOutcome, TrackingError>,
    ) -> Result<MutationOutcome, TrackingError> {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                if err.is_terminal_remote() {
                    self.emit(EngineEvent::MutationRolledBack {
                        operation: operation.to_string(),
                        title_id,
                        reason: err.to_string(),
                    });
                }
                return Err(err);
            }
        };
        if outcome.is_unchanged() {
            return Ok(outcome);
        }
        self.forget_pending(&RecordKey::ListEntry(title_id));

        self.emit(EngineEvent::ListChanged {
            title_id,
            previous: outcome.previous,
            current: outcome.current,
            progress: outcome.entry.as_ref().and_then(|e| e.progress),
        });
        if outcome.touches_completed() {
            self.refresh_stats();
        }

        if outcome.entered_completed() {
            let completed_at = outcome
                .entry
                .as_ref()
                .map(|e| e.added_at)
                .unwrap_or_else(unix_now);
            self.spawn_completion(CompletionEvent {
                title_id,
                prior_list: outcome.previous,
                completed_at,
            });
        } else {
            self.evaluate_achievements().await;
        }
        Ok(outcome)
    }

    fn spawn_completion(self: &Arc<Self>, event: CompletionEvent) {
        debug!("Spawning completion pipeline for title {}", event.title_id);
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move { inner.pipeline.run(event, inner.as_ref()).await });

        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let (finished, running): (Vec<_>, Vec<_>) =
            in_flight.drain(..).partition(|h| h.is_finished());
        *in_flight = running;
        in_flight.push(handle);
        drop(in_flight);

        if finished.is_empty() {
            return;
        }
        let mut reports = self
            .finished_reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for handle in finished {
            match handle.now_or_never() {
                Some(Ok(report)) => reports.push_back(report),
                Some(Err(err)) => error!("Completion task failed: {}", err),
                None => {}
            }
        }
        while reports.len() > MAX_UNSETTLED_REPORTS {
            reports.pop_front();
        }
    }

    /// Drops a pending op that a confirmed write made obsolete.
    fn forget_pending(&self, key: &RecordKey) {
        let mut pending = self.lock_pending();
        if pending.remove_key(key) {
            debug!("Pending {} superseded by a confirmed write", key);
            metrics::set_pending_sync_records(pending.len());
        }
    }

    async fn mutate_ranking<F>(
        &self,
        operation: &'static str,
        title_id: TitleId,
        mutate: F,
    ) -> Result<RankingOutcome, TrackingError>
    where
        F: FnOnce(&mut RankingStore) -> Result<RankingChange, ValidationError>,
    {
        let _guard = self.ranking_lock.lock().await;
        let (before, change, current_rank) = {
            let mut ranking = self.ranking.write().unwrap_or_else(PoisonError::into_inner);
            let before = ranking.clone();
            let change = match mutate(&mut ranking) {
                Ok(change) => change,
                Err(err) => {
                    *ranking = before;
                    metrics::record_mutation(operation, "rejected");
                    return Err(err.into());
                }
            };
            (before, change, ranking.rank_of(title_id))
        };
        let previous_rank = before.rank_of(title_id);

        if change.is_empty() {
            metrics::record_mutation(operation, "unchanged");
            return Ok(RankingOutcome {
                title_id,
                previous_rank,
                current_rank,
                evicted: None,
                confirmation: Confirmation::Unchanged,
            });
        }

        // A flush must not replay stale ranks over this change.
        let persisted = {
            let _flush = self.flush_lock.lock().await;
            self.persist_ranking_change(operation, &change).await
        };
        match persisted {
            Ok(attempts) => {
                self.ranked_confirmed
                    .store(self.read_ranking().len(), Ordering::SeqCst);
                metrics::record_mutation(operation, "confirmed");
                if let Some(evicted) = change.evicted {
                    info!("Title {} evicted from the ranking by {}", evicted, title_id);
                }
                self.emit(EngineEvent::RankingChanged {
                    entries: self.read_ranking().entries(),
                    evicted: change.evicted,
                });
                self.evaluate_achievements().await;
                Ok(RankingOutcome {
                    title_id,
                    previous_rank,
                    current_rank,
                    evicted: change.evicted,
                    confirmation: Confirmation::Confirmed { attempts },
                })
            }
            Err(err) => {
                *self.ranking.write().unwrap_or_else(PoisonError::into_inner) = before.clone();
                // Part of the change may have landed remotely.
                let undo = change.reverse(&before);
                for title_id in undo.removed {
                    self.enqueue(PendingOp::Delete {
                        key: RecordKey::RankingEntry(title_id),
                    });
                }
                for entry in undo.upserted {
                    self.enqueue(PendingOp::Upsert {
                        record: SyncRecord::RankingEntry(entry),
                    });
                }
                metrics::record_mutation(operation, "rolled_back");
                warn!("{} of title {} rolled back: {}", operation, title_id, err);
                self.emit(EngineEvent::MutationRolledBack {
                    operation: operation.to_string(),
                    title_id,
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn persist_ranking_change(
        &self,
        operation: &str,
        change: &RankingChange,
    ) -> Result<u32, TrackingError> {
        let mut attempts = 0;
        for title_id in &change.removed {
            let key = RecordKey::RankingEntry(*title_id);
            let (_, used) = self
                .retry_policy
                .run(operation, || self.record_store.delete(self.user_id, key.clone()))
                .await?;
            self.forget_pending(&key);
            attempts = attempts.max(used);
        }
        for entry in &change.upserted {
            let (_, used) = self
                .retry_policy
                .run(operation, || {
                    self.record_store
                        .upsert(self.user_id, SyncRecord::RankingEntry(*entry))
                })
                .await?;
            self.forget_pending(&RecordKey::RankingEntry(entry.title_id));
            attempts = attempts.max(used);
        }
        Ok(attempts)
    }

    async fn flush_pending(&self) -> usize {
        let _guard = self.flush_lock.lock().await;
        let ops: Vec<PendingOp> = self.lock_pending().ops().to_vec();
        if ops.is_empty() {
            return 0;
        }
        debug!("Flushing {} pending op(s) for user {}", ops.len(), self.user_id);

        let mut flushed = 0;
        for op in ops {
            let result = match &op {
                PendingOp::Upsert { record } => {
                    self.retry_policy
                        .run("flush upsert", || {
                            self.record_store.upsert(self.user_id, record.clone())
                        })
                        .await
                }
                PendingOp::Delete { key } => {
                    self.retry_policy
                        .run("flush delete", || {
                            self.record_store.delete(self.user_id, key.clone())
                        })
                        .await
                }
            };
            match result {
                Ok(_) => {
                    if self.lock_pending().remove_if_current(&op) {
                        flushed += 1;
                    }
                }
                Err(TrackingError::TerminalRemote { source, .. })
                    if source.kind == RemoteErrorKind::Rejected =>
                {
                    error!("Dropping pending {}: {}", op.key(), source);
                    self.lock_pending().remove_if_current(&op);
                }
                Err(err) => warn!("Pending {} still not synced: {}", op.key(), err),
            }
        }

        let remaining = self.lock_pending().len();
        metrics::set_pending_sync_records(remaining);
        info!("Flushed {} pending op(s), {} remaining", flushed, remaining);
        flushed
    }
}

#[async_trait]
impl CompletionSink for SessionInner {
    fn current_list(&self, title_id: TitleId) -> Option<ListKind> {
        self.lists.current_list(title_id)
    }

    fn record_completion(&self, record: &CompletionRecord, persisted: bool) {
        self.history
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        if !persisted {
            self.enqueue(PendingOp::Upsert {
                record: SyncRecord::CompletionRecord(record.clone()),
            });
        }
        self.emit(EngineEvent::CompletionRecorded {
            record: record.clone(),
            persisted,
        });
    }

    fn refresh_stats(&self) -> Arc<UserStats> {
        let started = Instant::now();
        let completed = self.lists.confirmed_completed_entries();
        let stats = {
            let history = self.history.read().unwrap_or_else(PoisonError::into_inner);
            Arc::new(stats::recompute(&completed, &history))
        };
        *self.stats.write().unwrap_or_else(PoisonError::into_inner) = stats.clone();
        metrics::record_stats_recompute(started.elapsed());
        self.emit(EngineEvent::StatsUpdated {
            stats: stats.as_ref().clone(),
        });
        stats
    }

    async fn evaluate_achievements(&self) -> BTreeSet<String> {
        let stats = self
            .stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let input = EvaluationInput {
            stats: &stats,
            counts: self.lists.confirmed_counts(),
            ranking_count: self.ranked_confirmed.load(Ordering::SeqCst),
            is_premium: self.premium.is_premium(),
        };

        let now = unix_now();
        let (newly_unlocked, unlocked): (BTreeSet<String>, Vec<Achievement>) = {
            let mut engine = self.lock_achievements();
            let newly_unlocked = engine.evaluate(&input, now);
            let unlocked = newly_unlocked
                .iter()
                .filter_map(|id| engine.achievement(id))
                .collect();
            (newly_unlocked, unlocked)
        };
        if unlocked.is_empty() {
            return newly_unlocked;
        }

        for achievement in &unlocked {
            metrics::record_achievement_unlocked(achievement.rarity.as_str());
            let record = SyncRecord::AchievementUnlock(AchievementUnlock {
                achievement_id: achievement.id.clone(),
                unlocked_at: achievement.unlocked_at.unwrap_or(now),
            });
            let result = self
                .retry_policy
                .run("upsert achievement_unlock", || {
                    self.record_store.upsert(self.user_id, record.clone())
                })
                .await;
            match result {
                Ok(_) => self.forget_pending(&record.key()),
                Err(err) => {
                    warn!(
                        "Unlock of {} not persisted, queued for retry: {}",
                        achievement.id, err
                    );
                    self.enqueue(PendingOp::Upsert { record });
                }
            }
        }

        info!(
            "User {} unlocked {}",
            self.user_id,
            newly_unlocked.iter().cloned().collect::<Vec<_>>().join(", ")
        );
        self.emit(EngineEvent::AchievementsUnlocked {
            achievements: unlocked,
        });
        newly_unlocked
    }

    fn offer_share(&self, record: &CompletionRecord) {
        self.emit(EngineEvent::ShareOffered {
            title_id: record.title_id,
            title: record.title.clone(),
        });
    }
}

async fn watch_premium(
    inner: Arc<SessionInner>,
    mut rx: watch::Receiver<bool>,
    mut was_premium: bool,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let is_premium = *rx.borrow_and_update();
                if is_premium && !was_premium {
                    info!("User {} became premium, re-evaluating achievements", inner.user_id);
                    inner.evaluate_achievements().await;
                }
                was_premium = is_premium;
            }
        }
    }
    debug!("Premium watcher for user {} stopped", inner.user_id);
}

async fn retry_pending(inner: Arc<SessionInner>, period: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(10)));
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if !inner.lock_pending().is_empty() {
                    inner.flush_pending().await;
                }
            }
        }
    }
    debug!("Pending retry loop for user {} stopped", inner.user_id);
}
