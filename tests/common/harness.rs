//! Session harness and a record store whose failures tests control

use super::constants::TEST_USER_ID;
use super::fixtures::create_test_catalog;
use async_trait::async_trait;
use showtracker_engine::record_store::{
    InMemoryRecordStore, RecordKey, RecordStore, RemoteError, RemoteErrorKind, RetryPolicy,
    SyncRecord,
};
use showtracker_engine::tracking::{
    PendingSyncQueue, PremiumStatus, SessionConfig, SessionDeps, TrackingSession,
};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// In-memory record store that can be taken offline or told to fail the
/// next N calls.
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryRecordStore,
    offline: AtomicBool,
    rejecting: AtomicBool,
    failing_completions: AtomicBool,
    failures_left: AtomicUsize,
    latency_ms: AtomicU64,
    calls: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    /// Completion record upserts fail with a connection error, everything
    /// else goes through.
    pub fn set_failing_completions(&self, failing: bool) {
        self.failing_completions.store(failing, Ordering::SeqCst);
    }

    /// The next `count` calls fail with a retryable timeout.
    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Delays every write, so tests can act while one is in flight.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn get(&self, user_id: usize, key: &RecordKey) -> Option<SyncRecord> {
        self.inner.get(user_id, key)
    }

    pub fn len(&self, user_id: usize) -> usize {
        self.inner.len(user_id)
    }

    async fn delay(&self) {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
    }

    fn check(&self) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::new(RemoteErrorKind::Connection, "offline"));
        }
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(RemoteError::new(RemoteErrorKind::Rejected, "rejected"));
        }
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(RemoteError::new(RemoteErrorKind::Timeout, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn upsert(&self, user_id: usize, record: SyncRecord) -> Result<(), RemoteError> {
        self.delay().await;
        self.check()?;
        if matches!(record, SyncRecord::CompletionRecord(_))
            && self.failing_completions.load(Ordering::SeqCst)
        {
            return Err(RemoteError::new(RemoteErrorKind::Connection, "completions unavailable"));
        }
        self.inner.upsert(user_id, record).await
    }

    async fn delete(&self, user_id: usize, key: RecordKey) -> Result<(), RemoteError> {
        self.delay().await;
        self.check()?;
        self.inner.delete(user_id, key).await
    }

    async fn list_by_user(&self, user_id: usize) -> Result<Vec<SyncRecord>, RemoteError> {
        self.check()?;
        self.inner.list_by_user(user_id).await
    }
}

/// Retries fast and never flushes in the background, tests flush
/// explicitly.
pub fn fast_config() -> SessionConfig {
    SessionConfig {
        retry_policy: RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            backoff_multiplier: 2.0,
            attempt_timeout: Duration::from_millis(500),
        },
        metadata_timeout: Duration::from_millis(500),
        pending_retry_interval: Duration::from_secs(3600),
        ..Default::default()
    }
}

pub struct TestSession {
    pub session: TrackingSession,
    pub remote: Arc<FlakyStore>,
    pub premium: PremiumStatus,
}

impl TestSession {
    pub async fn spawn() -> Self {
        Self::spawn_with(
            Arc::new(FlakyStore::new()),
            PremiumStatus::default(),
            PendingSyncQueue::new(),
        )
        .await
    }

    pub async fn spawn_with(
        remote: Arc<FlakyStore>,
        premium: PremiumStatus,
        carried_over: PendingSyncQueue,
    ) -> Self {
        Self::spawn_configured(remote, premium, carried_over, fast_config()).await
    }

    pub async fn spawn_configured(
        remote: Arc<FlakyStore>,
        premium: PremiumStatus,
        carried_over: PendingSyncQueue,
        config: SessionConfig,
    ) -> Self {
        let deps = SessionDeps {
            record_store: remote.clone(),
            catalog: Arc::new(create_test_catalog()),
            premium: premium.clone(),
        };
        let session = TrackingSession::sign_in(TEST_USER_ID, deps, config, carried_over)
            .await
            .expect("Failed to sign in");
        Self {
            session,
            remote,
            premium,
        }
    }

    pub async fn sign_out(self) -> PendingSyncQueue {
        self.session.sign_out().await
    }
}

impl Deref for TestSession {
    type Target = TrackingSession;

    fn deref(&self) -> &TrackingSession {
        &self.session
    }
}
