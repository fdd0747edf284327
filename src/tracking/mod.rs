//! Personal tracking: lists, ranking, stats, completions and achievements.

pub mod achievements;
pub mod completion;
mod error;
pub mod events;
pub mod list_store;
pub mod models;
pub mod pending;
pub mod premium;
pub mod ranking_store;
pub mod session;
pub mod stats;

pub use achievements::{
    default_definitions, Achievement, AchievementDefinition, AchievementEngine, AchievementRule,
    Rarity,
};
pub use completion::{CompletionEvent, CompletionPipeline, CompletionReport, CompletionStage};
pub use error::{TrackingError, ValidationError};
pub use events::EngineEvent;
pub use list_store::{Confirmation, ListStore, MutationOutcome};
pub use models::{
    CompletionRecord, ListCounts, ListEntry, ListKind, Progress, RankingEntry, TitleId,
    TitleMetadata, MAX_RANKING_SIZE,
};
pub use pending::{PendingOp, PendingSyncQueue};
pub use premium::PremiumStatus;
pub use ranking_store::{RankingChange, RankingStore};
pub use session::{RankingOutcome, SessionConfig, SessionDeps, TrackingSession};
pub use stats::{FavoriteActor, UserStats};

pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
