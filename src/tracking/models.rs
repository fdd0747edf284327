//! Tracking data models.
//!
//! These are the sync units exchanged with the remote record store and the
//! values handed out to UI readers.

use serde::{Deserialize, Serialize};

/// Catalog identifier of a title (show).
pub type TitleId = i64;

/// Maximum number of entries in a user's ranking.
pub const MAX_RANKING_SIZE: usize = 10;

/// The three mutually exclusive personal lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListKind {
    Watching,
    Watchlist,
    Completed,
}

impl ListKind {
    pub const ALL: [ListKind; 3] = [ListKind::Watching, ListKind::Watchlist, ListKind::Completed];

    pub fn as_str(&self) -> &'static str {
        match self {
            ListKind::Watching => "watching",
            ListKind::Watchlist => "watchlist",
            ListKind::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "watching" => Some(ListKind::Watching),
            "watchlist" | "want-to-watch" | "want_to_watch" => Some(ListKind::Watchlist),
            "completed" => Some(ListKind::Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ListKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-title progress, counted in units (episodes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current_unit: u32,
    pub total_units: u32,
}

impl Progress {
    pub fn new(total_units: u32) -> Self {
        Self {
            current_unit: 0,
            total_units,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.total_units > 0 && self.current_unit >= self.total_units
    }
}

/// Membership of a title in one of the personal lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry {
    pub title_id: TitleId,
    pub list: ListKind,
    /// Unix timestamp of when the title entered `list`.
    pub added_at: i64,
    /// Only present while `list` is `Watching`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
}

/// Position of a title in the user's top-10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub title_id: TitleId,
    /// 1-based, dense.
    pub rank: u32,
}

/// Append-only record of a single completion event.
///
/// Genre and cast are snapshotted from the catalog at completion time so
/// that stats recomputed later stay reproducible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub id: String,
    pub title_id: TitleId,
    pub title: String,
    pub total_runtime_minutes: u32,
    /// Unix timestamp of the completion event.
    pub completed_at: i64,
    /// True when the runtime could not be fetched and fell back to 0.
    #[serde(default)]
    pub runtime_estimated: bool,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub cast: Vec<String>,
}

/// Title metadata as provided by the catalog collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TitleMetadata {
    pub name: String,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub cast: Vec<String>,
}

/// Cardinality of each personal list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ListCounts {
    pub watching: usize,
    pub watchlist: usize,
    pub completed: usize,
}

impl ListCounts {
    pub fn get(&self, list: ListKind) -> usize {
        match list {
            ListKind::Watching => self.watching,
            ListKind::Watchlist => self.watchlist,
            ListKind::Completed => self.completed,
        }
    }

    pub(crate) fn bump(&mut self, list: ListKind) {
        match list {
            ListKind::Watching => self.watching += 1,
            ListKind::Watchlist => self.watchlist += 1,
            ListKind::Completed => self.completed += 1,
        }
    }
}
