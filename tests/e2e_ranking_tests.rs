//! End-to-end tests for the top-10 ranking

mod common;

use common::{TestSession, FILLER_FIRST_ID, SIGNAL_ID, TEST_USER_ID};
use showtracker_engine::record_store::SyncRecord;
use showtracker_engine::tracking::{Confirmation, EngineEvent, RankingEntry, MAX_RANKING_SIZE};
use showtracker_engine::{RecordStore, TrackingError, ValidationError};

async fn fill_ranking(session: &TestSession) {
    for i in 0..MAX_RANKING_SIZE as i64 {
        session
            .set_rank(FILLER_FIRST_ID + i, i as u32 + 1)
            .await
            .unwrap();
    }
}

async fn remote_ranking(session: &TestSession) -> Vec<RankingEntry> {
    let mut entries: Vec<RankingEntry> = session
        .remote
        .list_by_user(TEST_USER_ID)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|r| match r {
            SyncRecord::RankingEntry(entry) => Some(entry),
            _ => None,
        })
        .collect();
    entries.sort_by_key(|e| e.rank);
    entries
}

#[tokio::test]
async fn test_set_rank_on_full_ranking_shifts_and_evicts() {
    let session = TestSession::spawn().await;
    fill_ranking(&session).await;
    let former_third = FILLER_FIRST_ID + 2;
    let former_tenth = FILLER_FIRST_ID + 9;

    let outcome = session.set_rank(SIGNAL_ID, 3).await.unwrap();

    assert_eq!(outcome.current_rank, Some(3));
    assert_eq!(outcome.evicted, Some(former_tenth));
    let ranking = session.ranking();
    assert_eq!(ranking.len(), MAX_RANKING_SIZE);
    assert_eq!(session.rank_of(SIGNAL_ID), Some(3));
    assert_eq!(session.rank_of(former_third), Some(4));
    assert_eq!(session.rank_of(FILLER_FIRST_ID + 8), Some(10));
    assert_eq!(session.rank_of(former_tenth), None);
    assert_eq!(session.rank_of(FILLER_FIRST_ID), Some(1));

    assert_eq!(remote_ranking(&session).await, ranking);
    session.sign_out().await;
}

#[tokio::test]
async fn test_moving_a_ranked_title_keeps_ranks_dense() {
    let session = TestSession::spawn().await;
    for (i, rank) in [(0, 1), (1, 2), (2, 3), (3, 4)] {
        session.set_rank(FILLER_FIRST_ID + i, rank).await.unwrap();
    }

    let outcome = session.set_rank(FILLER_FIRST_ID, 3).await.unwrap();

    assert_eq!(outcome.previous_rank, Some(1));
    assert_eq!(outcome.current_rank, Some(3));
    assert_eq!(outcome.evicted, None);
    let ids: Vec<i64> = session.ranking().iter().map(|e| e.title_id).collect();
    assert_eq!(
        ids,
        vec![
            FILLER_FIRST_ID + 1,
            FILLER_FIRST_ID + 2,
            FILLER_FIRST_ID,
            FILLER_FIRST_ID + 3
        ]
    );
    let ranks: Vec<u32> = session.ranking().iter().map(|e| e.rank).collect();
    assert_eq!(ranks, vec![1, 2, 3, 4]);
    assert_eq!(remote_ranking(&session).await, session.ranking());
    session.sign_out().await;
}

#[tokio::test]
async fn test_rank_past_the_end_appends() {
    let session = TestSession::spawn().await;
    session.set_rank(FILLER_FIRST_ID, 1).await.unwrap();

    let outcome = session.set_rank(SIGNAL_ID, 8).await.unwrap();

    assert_eq!(outcome.current_rank, Some(2));
    session.sign_out().await;
}

#[tokio::test]
async fn test_setting_the_same_rank_is_unchanged() {
    let session = TestSession::spawn().await;
    session.set_rank(SIGNAL_ID, 1).await.unwrap();
    let calls = session.remote.calls();

    let outcome = session.set_rank(SIGNAL_ID, 1).await.unwrap();

    assert_eq!(outcome.confirmation, Confirmation::Unchanged);
    assert_eq!(session.remote.calls(), calls);
    session.sign_out().await;
}

#[tokio::test]
async fn test_out_of_range_ranks_are_rejected() {
    let session = TestSession::spawn().await;
    let calls = session.remote.calls();

    for rank in [0, 11] {
        let err = session.set_rank(SIGNAL_ID, rank).await.unwrap_err();
        assert!(matches!(
            err,
            TrackingError::Validation(ValidationError::InvalidRank(_))
        ));
    }
    assert!(session.ranking().is_empty());
    assert_eq!(session.remote.calls(), calls);
    session.sign_out().await;
}

#[tokio::test]
async fn test_remove_rank_closes_the_gap() {
    let session = TestSession::spawn().await;
    fill_ranking(&session).await;

    let outcome = session.remove_rank(FILLER_FIRST_ID + 4).await.unwrap();

    assert_eq!(outcome.previous_rank, Some(5));
    assert_eq!(outcome.current_rank, None);
    assert_eq!(session.ranking().len(), MAX_RANKING_SIZE - 1);
    assert_eq!(session.rank_of(FILLER_FIRST_ID + 5), Some(5));
    assert_eq!(remote_ranking(&session).await, session.ranking());
    session.sign_out().await;
}

#[tokio::test]
async fn test_failed_set_rank_rolls_back_and_compensates() {
    let session = TestSession::spawn().await;
    fill_ranking(&session).await;
    let before = session.ranking();
    let mut events = session.subscribe();

    session.remote.set_offline(true);
    let err = session.set_rank(SIGNAL_ID, 3).await.unwrap_err();
    session.remote.set_offline(false);

    assert!(err.is_terminal_remote());
    assert_eq!(session.ranking(), before);
    assert!(session.pending_len() > 0);
    match events.recv().await.unwrap() {
        EngineEvent::MutationRolledBack { operation, .. } => assert_eq!(operation, "set_rank"),
        other => panic!("Unexpected event: {:?}", other),
    }

    session.flush_pending().await;
    assert_eq!(session.pending_len(), 0);
    assert_eq!(remote_ranking(&session).await, before);
    session.sign_out().await;
}

#[tokio::test]
async fn test_full_ranking_unlocks_curator() {
    let session = TestSession::spawn().await;
    fill_ranking(&session).await;

    let curator = session
        .achievements()
        .into_iter()
        .find(|a| a.id == "curator")
        .unwrap();
    assert!(curator.unlocked_at.is_some());
    session.sign_out().await;
}

#[tokio::test]
async fn test_confirmed_change_supersedes_queued_compensation() {
    let session = TestSession::spawn().await;
    let first = FILLER_FIRST_ID;
    let failed = FILLER_FIRST_ID + 1;
    let latest = FILLER_FIRST_ID + 2;
    session.set_rank(first, 1).await.unwrap();

    session.remote.set_offline(true);
    assert!(session.set_rank(failed, 1).await.is_err());
    session.remote.set_offline(false);
    assert_eq!(session.pending_len(), 2);

    session.set_rank(latest, 1).await.unwrap();
    // Only the delete of the title that never made it is still owed.
    assert_eq!(session.pending_len(), 1);

    session.flush_pending().await;
    assert_eq!(session.pending_len(), 0);
    let local = session.ranking();
    assert_eq!(
        local,
        vec![
            RankingEntry { title_id: latest, rank: 1 },
            RankingEntry { title_id: first, rank: 2 },
        ]
    );
    assert_eq!(remote_ranking(&session).await, local);
    session.sign_out().await;
}
