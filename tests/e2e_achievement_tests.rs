//! End-to-end tests for achievement unlocks and premium gating

mod common;

use common::{
    fast_config, FlakyStore, TestSession, FILLER_COUNT, FILLER_FIRST_ID, SIGNAL_ID, TEST_USER_ID,
};
use showtracker_engine::tracking::MAX_RANKING_SIZE;
use showtracker_engine::record_store::{RecordKey, SyncRecord};
use showtracker_engine::tracking::{
    default_definitions, AchievementDefinition, AchievementRule, EngineEvent, ListKind,
    PendingSyncQueue, PremiumStatus, Rarity,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const LEGEND_ID: &str = "first-legend";

async fn spawn_with_legend(remote: Arc<FlakyStore>, premium: PremiumStatus) -> TestSession {
    let mut config = fast_config();
    config.achievements = default_definitions();
    config.achievements.push(
        AchievementDefinition::new(
            LEGEND_ID,
            "First Legend",
            Rarity::Legendary,
            AchievementRule::CompletedAtLeast { count: 1 },
        )
        .premium_only(),
    );
    TestSession::spawn_configured(remote, premium, PendingSyncQueue::new(), config).await
}

fn unlocked_at(session: &TestSession, id: &str) -> Option<i64> {
    session
        .achievements()
        .into_iter()
        .find(|a| a.id == id)
        .and_then(|a| a.unlocked_at)
}

async fn next_unlock_batch(events: &mut broadcast::Receiver<EngineEvent>) -> Vec<String> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(EngineEvent::AchievementsUnlocked { achievements }) => {
                    return achievements.into_iter().map(|a| a.id).collect();
                }
                Ok(_) => continue,
                Err(err) => panic!("Event stream failed: {}", err),
            }
        }
    })
    .await
    .expect("No unlock batch received")
}

#[tokio::test]
async fn test_premium_flip_materializes_deferred_unlock() {
    let session =
        spawn_with_legend(Arc::new(FlakyStore::new()), PremiumStatus::new(false)).await;

    session.toggle(SIGNAL_ID, ListKind::Completed).await.unwrap();
    let reports = session.settle().await;
    assert!(reports[0].newly_unlocked.contains("first-completion"));
    assert!(!reports[0].newly_unlocked.contains(LEGEND_ID));
    assert_eq!(unlocked_at(&session, LEGEND_ID), None);

    let mut events = session.subscribe();
    assert!(session.premium.set(true));

    let batch = next_unlock_batch(&mut events).await;
    assert_eq!(batch, vec![LEGEND_ID.to_string()]);
    assert!(unlocked_at(&session, LEGEND_ID).is_some());
    assert!(matches!(
        session
            .remote
            .get(TEST_USER_ID, &RecordKey::AchievementUnlock(LEGEND_ID.to_string())),
        Some(SyncRecord::AchievementUnlock(_))
    ));
    session.sign_out().await;
}

#[tokio::test]
async fn test_deferred_unlock_survives_shrinking_stats() {
    let session =
        spawn_with_legend(Arc::new(FlakyStore::new()), PremiumStatus::new(false)).await;
    session.toggle(SIGNAL_ID, ListKind::Completed).await.unwrap();
    session.settle().await;

    // Leaving completed drops the completed count back to zero
    session.toggle(SIGNAL_ID, ListKind::Completed).await.unwrap();
    assert_eq!(session.counts().completed, 0);

    let mut events = session.subscribe();
    session.premium.set(true);
    let batch = next_unlock_batch(&mut events).await;
    assert_eq!(batch, vec![LEGEND_ID.to_string()]);
    session.sign_out().await;
}

#[tokio::test]
async fn test_premium_user_unlocks_immediately() {
    let session = spawn_with_legend(Arc::new(FlakyStore::new()), PremiumStatus::new(true)).await;

    session.toggle(SIGNAL_ID, ListKind::Completed).await.unwrap();
    let reports = session.settle().await;

    assert!(reports[0].newly_unlocked.contains(LEGEND_ID));
    session.sign_out().await;
}

#[tokio::test]
async fn test_unlocks_are_monotonic() {
    let session = TestSession::spawn().await;
    session.toggle(SIGNAL_ID, ListKind::Completed).await.unwrap();
    session.settle().await;
    let first = unlocked_at(&session, "first-completion").unwrap();

    session.toggle(SIGNAL_ID, ListKind::Completed).await.unwrap();
    assert_eq!(unlocked_at(&session, "first-completion"), Some(first));
    assert!(session.evaluate_achievements().await.is_empty());
    session.sign_out().await;
}

#[tokio::test]
async fn test_unlocks_are_not_reannounced_after_sign_in() {
    let remote = Arc::new(FlakyStore::new());
    let session = TestSession::spawn_with(
        remote.clone(),
        PremiumStatus::default(),
        PendingSyncQueue::new(),
    )
    .await;
    session.toggle(SIGNAL_ID, ListKind::Completed).await.unwrap();
    session.settle().await;
    let first = unlocked_at(&session, "first-completion");
    session.sign_out().await;

    let session =
        TestSession::spawn_with(remote, PremiumStatus::default(), PendingSyncQueue::new()).await;
    assert_eq!(unlocked_at(&session, "first-completion"), first);
    assert!(session.evaluate_achievements().await.is_empty());
    session.sign_out().await;
}

#[tokio::test]
async fn test_watchlist_milestone() {
    let session = TestSession::spawn().await;
    for i in 0..9 {
        session
            .add_to_list(FILLER_FIRST_ID + i, ListKind::Watchlist, None)
            .await
            .unwrap();
    }
    assert_eq!(unlocked_at(&session, "planner"), None);

    let mut events = session.subscribe();
    session
        .add_to_list(FILLER_FIRST_ID + 9, ListKind::Watchlist, None)
        .await
        .unwrap();

    assert_eq!(next_unlock_batch(&mut events).await, vec!["planner".to_string()]);
    session.sign_out().await;
}

#[tokio::test]
async fn test_binge_starter_needs_five_completions() {
    let session = TestSession::spawn().await;
    assert!(FILLER_COUNT >= 5);

    for i in 0..5 {
        session
            .toggle(FILLER_FIRST_ID + i, ListKind::Completed)
            .await
            .unwrap();
        session.settle().await;
    }

    assert!(unlocked_at(&session, "binge-starter").is_some());
    assert_eq!(unlocked_at(&session, "seasoned-viewer"), None);
    session.sign_out().await;
}

#[tokio::test]
async fn test_unpersisted_unlock_is_queued() {
    let remote = Arc::new(FlakyStore::new());
    let session = spawn_with_legend(remote.clone(), PremiumStatus::new(false)).await;
    session.toggle(SIGNAL_ID, ListKind::Completed).await.unwrap();
    session.settle().await;

    let mut events = session.subscribe();
    remote.set_offline(true);
    session.premium.set(true);
    next_unlock_batch(&mut events).await;
    remote.set_offline(false);

    // Unlocked locally even though the store was unreachable
    assert!(unlocked_at(&session, LEGEND_ID).is_some());
    assert_eq!(session.pending_len(), 1);
    assert_eq!(session.flush_pending().await, 1);
    assert!(remote
        .get(TEST_USER_ID, &RecordKey::AchievementUnlock(LEGEND_ID.to_string()))
        .is_some());
    session.sign_out().await;
}

#[tokio::test]
async fn test_evaluation_ignores_move_that_is_still_persisting() {
    let session = TestSession::spawn().await;
    session.remote.set_latency(Duration::from_millis(30));
    session.remote.set_offline(true);

    let (moved, unlocked_meanwhile) = tokio::join!(
        session.toggle(SIGNAL_ID, ListKind::Completed),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(session.get_current_list(SIGNAL_ID), Some(ListKind::Completed));
            session.evaluate_achievements().await
        }
    );

    assert!(moved.unwrap_err().is_terminal_remote());
    assert!(unlocked_meanwhile.is_empty());
    assert_eq!(session.get_current_list(SIGNAL_ID), None);
    assert_eq!(unlocked_at(&session, "first-completion"), None);

    session.remote.set_offline(false);
    session.remote.set_latency(Duration::ZERO);
    assert!(session.evaluate_achievements().await.is_empty());
    session.sign_out().await;
}

#[tokio::test]
async fn test_evaluation_ignores_ranking_change_that_is_still_persisting() {
    let session = TestSession::spawn().await;
    for i in 0..MAX_RANKING_SIZE as i64 - 1 {
        session
            .set_rank(FILLER_FIRST_ID + i, i as u32 + 1)
            .await
            .unwrap();
    }
    session.remote.set_latency(Duration::from_millis(30));
    session.remote.set_offline(true);

    let (ranked, unlocked_meanwhile) = tokio::join!(
        session.set_rank(SIGNAL_ID, MAX_RANKING_SIZE as u32),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            session.evaluate_achievements().await
        }
    );

    assert!(ranked.is_err());
    assert!(unlocked_meanwhile.is_empty());
    assert_eq!(unlocked_at(&session, "curator"), None);
    session.remote.set_offline(false);
    session.remote.set_latency(Duration::ZERO);
    session.sign_out().await;
}
