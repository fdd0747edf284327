//! Completion Pipeline.
//!
//! Runs once per transition into `completed`, as a detached task:
//! `Pending -> RuntimeFetched -> Persisted -> StatsRefreshed ->
//! AchievementsEvaluated -> ShareOffered`. Catalog failures degrade the
//! record, persistence failures are reported but never undo the move.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::TrackingError;
use super::models::{CompletionRecord, ListKind, TitleId, TitleMetadata};
use super::stats::UserStats;
use crate::catalog::{CatalogError, CatalogProvider};
use crate::metrics;
use crate::record_store::{RecordStore, RetryPolicy, SyncRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStage {
    Pending,
    RuntimeFetched,
    Persisted,
    StatsRefreshed,
    AchievementsEvaluated,
    ShareOffered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionEvent {
    pub title_id: TitleId,
    /// List the title was in before entering `completed`.
    pub prior_list: Option<ListKind>,
    pub completed_at: i64,
}

#[derive(Debug, Clone)]
pub struct CompletionReport {
    pub record: CompletionRecord,
    /// Stages reached, in order.
    pub stages: Vec<CompletionStage>,
    pub persisted: bool,
    pub metadata_error: Option<TrackingError>,
    pub persist_error: Option<TrackingError>,
    pub newly_unlocked: BTreeSet<String>,
    pub share_offered: bool,
}

impl CompletionReport {
    pub fn reached(&self, stage: CompletionStage) -> bool {
        self.stages.contains(&stage)
    }
}

/// Session-side hooks the pipeline drives after building the record.
#[async_trait]
pub trait CompletionSink: Send + Sync {
    fn current_list(&self, title_id: TitleId) -> Option<ListKind>;

    /// Appends the record to the local history. Unpersisted records must be
    /// queued for a later retry.
    fn record_completion(&self, record: &CompletionRecord, persisted: bool);

    fn refresh_stats(&self) -> Arc<UserStats>;

    async fn evaluate_achievements(&self) -> BTreeSet<String>;

    fn offer_share(&self, record: &CompletionRecord);
}

pub struct CompletionPipeline {
    user_id: usize,
    catalog: Arc<dyn CatalogProvider>,
    record_store: Arc<dyn RecordStore>,
    retry_policy: RetryPolicy,
    metadata_timeout: Duration,
}

impl CompletionPipeline {
    pub fn new(
        user_id: usize,
        catalog: Arc<dyn CatalogProvider>,
        record_store: Arc<dyn RecordStore>,
        retry_policy: RetryPolicy,
        metadata_timeout: Duration,
    ) -> Self {
        Self {
            user_id,
            catalog,
            record_store,
            retry_policy,
            metadata_timeout,
        }
    }

    pub async fn run(&self, event: CompletionEvent, sink: &dyn CompletionSink) -> CompletionReport {
        let title_id = event.title_id;
        let mut stages = vec![CompletionStage::Pending];
        debug!("Completion of title {} pending", title_id);

        let (runtime, metadata) = tokio::join!(
            tokio::time::timeout(self.metadata_timeout, self.catalog.get_title_runtime(title_id)),
            tokio::time::timeout(self.metadata_timeout, self.catalog.get_title_metadata(title_id)),
        );
        let mut metadata_error = None;
        let (total_runtime_minutes, runtime_estimated) = match flatten(runtime, self.metadata_timeout) {
            Ok(minutes) => (minutes, false),
            Err(reason) => {
                warn!("Runtime of title {} unavailable, recording 0: {}", title_id, reason);
                metadata_error = Some(TrackingError::MetadataUnavailable { title_id, reason });
                (0, true)
            }
        };
        let metadata = match flatten(metadata, self.metadata_timeout) {
            Ok(metadata) => metadata,
            Err(reason) => {
                warn!("Metadata of title {} unavailable: {}", title_id, reason);
                metadata_error.get_or_insert(TrackingError::MetadataUnavailable { title_id, reason });
                TitleMetadata {
                    name: format!("Title {}", title_id),
                    ..Default::default()
                }
            }
        };
        stages.push(CompletionStage::RuntimeFetched);

        let record = CompletionRecord {
            id: Uuid::new_v4().to_string(),
            title_id,
            title: metadata.name,
            total_runtime_minutes,
            completed_at: event.completed_at,
            runtime_estimated,
            genres: metadata.genres,
            cast: metadata.cast,
        };

        let persist_result = self
            .retry_policy
            .run("upsert completion_record", || {
                self.record_store
                    .upsert(self.user_id, SyncRecord::CompletionRecord(record.clone()))
            })
            .await;
        let (persisted, persist_error) = match persist_result {
            Ok(_) => {
                stages.push(CompletionStage::Persisted);
                (true, None)
            }
            Err(err) => {
                warn!(
                    "Completion record {} for title {} not persisted, queued for retry: {}",
                    record.id, title_id, err
                );
                (false, Some(err))
            }
        };
        sink.record_completion(&record, persisted);
        metrics::record_completion(persisted);

        sink.refresh_stats();
        stages.push(CompletionStage::StatsRefreshed);

        let newly_unlocked = sink.evaluate_achievements().await;
        stages.push(CompletionStage::AchievementsEvaluated);

        let share_offered = event.prior_list != Some(ListKind::Completed)
            && sink.current_list(title_id) == Some(ListKind::Completed);
        if share_offered {
            sink.offer_share(&record);
            stages.push(CompletionStage::ShareOffered);
        } else {
            debug!("Title {} left completed, share skipped", title_id);
        }

        info!(
            "Completion of '{}' ({}) finished: {} min{}, persisted={}, {} unlock(s)",
            record.title,
            title_id,
            record.total_runtime_minutes,
            if runtime_estimated { " (estimated)" } else { "" },
            persisted,
            newly_unlocked.len()
        );

        CompletionReport {
            record,
            stages,
            persisted,
            metadata_error,
            persist_error,
            newly_unlocked,
            share_offered,
        }
    }
}

fn flatten<T>(
    result: Result<Result<T, CatalogError>, tokio::time::error::Elapsed>,
    timeout: Duration,
) -> Result<T, String> {
    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(err.to_string()),
        Err(_) => Err(format!("catalog timed out after {}ms", timeout.as_millis())),
    }
}
