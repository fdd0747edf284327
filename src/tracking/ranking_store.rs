//! User-curated top-10 ranking.
//!
//! The ranking is kept as an ordered vector of title ids; a title's rank is
//! its index + 1, so ranks are dense and unique by construction.
//! [`RankingStore::check_invariants`] re-verifies this after every mutation.

use std::collections::HashSet;

use super::error::{validate_title_id, ValidationError};
use super::models::{RankingEntry, TitleId, MAX_RANKING_SIZE};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RankingStore {
    ordered: Vec<TitleId>,
}

/// Record-level difference produced by a ranking mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RankingChange {
    /// Entries whose rank is new or different.
    pub upserted: Vec<RankingEntry>,
    /// Titles no longer ranked, including the evicted one.
    pub removed: Vec<TitleId>,
    /// Title pushed out of the top-10 by an insertion.
    pub evicted: Option<TitleId>,
}

impl RankingChange {
    pub fn is_empty(&self) -> bool {
        self.upserted.is_empty() && self.removed.is_empty()
    }

    /// The change that undoes `self`, given the ranking before it was applied.
    pub fn reverse(&self, before: &RankingStore) -> RankingChange {
        let mut upserted: Vec<RankingEntry> = self
            .removed
            .iter()
            .chain(self.upserted.iter().map(|e| &e.title_id))
            .filter_map(|id| {
                before.rank_of(*id).map(|rank| RankingEntry {
                    title_id: *id,
                    rank,
                })
            })
            .collect();
        upserted.sort_by_key(|e| e.rank);
        upserted.dedup();

        let removed = self
            .upserted
            .iter()
            .filter(|e| before.rank_of(e.title_id).is_none())
            .map(|e| e.title_id)
            .collect();

        RankingChange {
            upserted,
            removed,
            evicted: None,
        }
    }
}

impl RankingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a ranking from persisted entries, which must already be dense.
    pub fn from_entries(mut entries: Vec<RankingEntry>) -> Result<Self, ValidationError> {
        entries.sort_by_key(|e| e.rank);
        if entries.len() > MAX_RANKING_SIZE {
            return Err(ValidationError::CorruptRanking(format!(
                "{} entries, at most {} allowed",
                entries.len(),
                MAX_RANKING_SIZE
            )));
        }
        for (index, entry) in entries.iter().enumerate() {
            if entry.rank as usize != index + 1 {
                return Err(ValidationError::CorruptRanking(format!(
                    "expected rank {} but found {} for title {}",
                    index + 1,
                    entry.rank,
                    entry.title_id
                )));
            }
        }

        let store = Self {
            ordered: entries.into_iter().map(|e| e.title_id).collect(),
        };
        store.check_invariants()?;
        Ok(store)
    }

    /// Builds a dense ranking out of arbitrary entries: sorted by rank then
    /// title id, duplicates dropped, truncated to the top-10.
    pub fn repaired(mut entries: Vec<RankingEntry>) -> Self {
        entries.sort_by_key(|e| (e.rank, e.title_id));
        let mut seen = HashSet::new();
        let ordered = entries
            .into_iter()
            .map(|e| e.title_id)
            .filter(|id| seen.insert(*id))
            .take(MAX_RANKING_SIZE)
            .collect();
        Self { ordered }
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn rank_of(&self, title_id: TitleId) -> Option<u32> {
        self.ordered
            .iter()
            .position(|id| *id == title_id)
            .map(|index| index as u32 + 1)
    }

    pub fn entries(&self) -> Vec<RankingEntry> {
        self.ordered
            .iter()
            .enumerate()
            .map(|(index, title_id)| RankingEntry {
                title_id: *title_id,
                rank: index as u32 + 1,
            })
            .collect()
    }

    /// Places `title_id` at `rank`, shifting occupants down and evicting
    /// whatever falls past the 10th slot. A rank past the end appends.
    pub fn set_rank(
        &mut self,
        title_id: TitleId,
        rank: u32,
    ) -> Result<RankingChange, ValidationError> {
        validate_title_id(title_id)?;
        if rank == 0 || rank as usize > MAX_RANKING_SIZE {
            return Err(ValidationError::InvalidRank(rank));
        }

        let before = self.clone();
        self.ordered.retain(|id| *id != title_id);
        let index = (rank as usize - 1).min(self.ordered.len());
        self.ordered.insert(index, title_id);
        let evicted = if self.ordered.len() > MAX_RANKING_SIZE {
            self.ordered.pop()
        } else {
            None
        };
        self.check_invariants()?;

        let mut change = self.diff_from(&before);
        change.evicted = evicted;
        Ok(change)
    }

    /// Unranks `title_id` and closes the gap. Unranked titles are a no-op.
    pub fn remove_rank(&mut self, title_id: TitleId) -> Result<RankingChange, ValidationError> {
        validate_title_id(title_id)?;
        let before = self.clone();
        self.ordered.retain(|id| *id != title_id);
        self.check_invariants()?;
        Ok(self.diff_from(&before))
    }

    pub fn check_invariants(&self) -> Result<(), ValidationError> {
        if self.ordered.len() > MAX_RANKING_SIZE {
            return Err(ValidationError::CorruptRanking(format!(
                "{} entries exceed the maximum of {}",
                self.ordered.len(),
                MAX_RANKING_SIZE
            )));
        }
        let mut seen = HashSet::with_capacity(self.ordered.len());
        for title_id in &self.ordered {
            if !seen.insert(*title_id) {
                return Err(ValidationError::CorruptRanking(format!(
                    "title {} is ranked twice",
                    title_id
                )));
            }
        }
        Ok(())
    }

    fn diff_from(&self, before: &RankingStore) -> RankingChange {
        let upserted = self
            .entries()
            .into_iter()
            .filter(|entry| before.rank_of(entry.title_id) != Some(entry.rank))
            .collect();
        let removed = before
            .ordered
            .iter()
            .filter(|id| self.rank_of(**id).is_none())
            .copied()
            .collect();
        RankingChange {
            upserted,
            removed,
            evicted: None,
        }
    }
}
