//! Events pushed to UI subscribers.
//!
//! Serialized as `{"type": "...", "payload": {...}}`, like every other
//! sync unit in the engine.

use serde::{Deserialize, Serialize};

use super::achievements::Achievement;
use super::models::{CompletionRecord, ListKind, Progress, RankingEntry, TitleId};
use super::stats::UserStats;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EngineEvent {
    #[serde(rename = "list_changed")]
    ListChanged {
        title_id: TitleId,
        previous: Option<ListKind>,
        current: Option<ListKind>,
        progress: Option<Progress>,
    },

    /// An optimistic change was undone after the record store gave up.
    #[serde(rename = "mutation_rolled_back")]
    MutationRolledBack {
        operation: String,
        title_id: TitleId,
        reason: String,
    },

    #[serde(rename = "ranking_changed")]
    RankingChanged {
        entries: Vec<RankingEntry>,
        evicted: Option<TitleId>,
    },

    #[serde(rename = "stats_updated")]
    StatsUpdated { stats: UserStats },

    /// One batch per evaluation.
    #[serde(rename = "achievements_unlocked")]
    AchievementsUnlocked { achievements: Vec<Achievement> },

    #[serde(rename = "completion_recorded")]
    CompletionRecorded {
        record: CompletionRecord,
        persisted: bool,
    },

    #[serde(rename = "share_offered")]
    ShareOffered { title_id: TitleId, title: String },
}

impl EngineEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::ListChanged { .. } => "list_changed",
            EngineEvent::MutationRolledBack { .. } => "mutation_rolled_back",
            EngineEvent::RankingChanged { .. } => "ranking_changed",
            EngineEvent::StatsUpdated { .. } => "stats_updated",
            EngineEvent::AchievementsUnlocked { .. } => "achievements_unlocked",
            EngineEvent::CompletionRecorded { .. } => "completion_recorded",
            EngineEvent::ShareOffered { .. } => "share_offered",
        }
    }
}
