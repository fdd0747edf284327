use thiserror::Error;

use super::models::{ListKind, TitleId, MAX_RANKING_SIZE};
use crate::record_store::RemoteError;

/// Input rejected synchronously, before any local or remote change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid title id: {0}")]
    InvalidTitleId(TitleId),

    #[error("Invalid rank {0}, expected a value between 1 and {}", MAX_RANKING_SIZE)]
    InvalidRank(u32),

    #[error("Title {title_id} is in {actual:?}, expected it in watching")]
    NotWatching {
        title_id: TitleId,
        actual: Option<ListKind>,
    },

    #[error("Title {0} has no progress to update")]
    NoProgress(TitleId),

    #[error("Progress of title {title_id} cannot go back from {current} to {requested}")]
    ProgressRegression {
        title_id: TitleId,
        current: u32,
        requested: u32,
    },

    #[error("Progress {requested} of title {title_id} exceeds its {total} units")]
    ProgressOverflow {
        title_id: TitleId,
        requested: u32,
        total: u32,
    },

    #[error("Ranking is corrupted: {0}")]
    CorruptRanking(String),
}

#[derive(Debug, Clone, Error)]
pub enum TrackingError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Transient remote failure: {0}")]
    TransientRemote(RemoteError),

    #[error("Remote failure after {attempts} attempt(s): {source}")]
    TerminalRemote { attempts: u32, source: RemoteError },

    #[error("Metadata unavailable for title {title_id}: {reason}")]
    MetadataUnavailable { title_id: TitleId, reason: String },
}

impl TrackingError {
    /// Classifies a single failed remote call.
    pub fn from_remote(error: RemoteError) -> Self {
        if error.is_retryable() {
            TrackingError::TransientRemote(error)
        } else {
            TrackingError::TerminalRemote {
                attempts: 1,
                source: error,
            }
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, TrackingError::Validation(_))
    }

    pub fn is_terminal_remote(&self) -> bool {
        matches!(self, TrackingError::TerminalRemote { .. })
    }
}

pub(crate) fn validate_title_id(title_id: TitleId) -> Result<(), ValidationError> {
    if title_id <= 0 {
        return Err(ValidationError::InvalidTitleId(title_id));
    }
    Ok(())
}
