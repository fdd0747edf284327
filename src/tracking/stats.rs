//! Stats Aggregator.
//!
//! [`recompute`] is a pure function of the completed entries and the
//! completion history. The session replaces its snapshot wholesale with
//! the result, readers only ever see complete aggregates.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::DateTime;
use serde::{Deserialize, Serialize};

use super::models::{CompletionRecord, ListEntry, ListKind, TitleId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoriteActor {
    pub name: String,
    pub works_watched: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    pub total_watch_time_minutes: u64,
    pub genre_breakdown: BTreeMap<String, u32>,
    /// Keyed by `YYYY-MM` (UTC).
    pub monthly_watch_time: BTreeMap<String, u64>,
    pub favorite_actor: Option<FavoriteActor>,
}

impl UserStats {
    /// Completed-title count for `genre`, ignoring case.
    pub fn genre_count(&self, genre: &str) -> u32 {
        self.genre_breakdown
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case(genre))
            .map(|(_, count)| *count)
            .sum()
    }

    pub fn distinct_genres(&self) -> usize {
        self.genre_breakdown
            .keys()
            .map(|g| g.to_lowercase())
            .collect::<HashSet<_>>()
            .len()
    }
}

/// `YYYY-MM` of a Unix timestamp, in UTC.
pub fn month_key(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn recompute(completed: &[ListEntry], records: &[CompletionRecord]) -> UserStats {
    // Stable: records completed in the same second keep history order.
    let mut history: Vec<&CompletionRecord> = records.iter().collect();
    history.sort_by_key(|r| r.completed_at);

    let mut total_watch_time_minutes = 0u64;
    let mut monthly_watch_time = BTreeMap::new();
    for record in &history {
        let minutes = record.total_runtime_minutes as u64;
        total_watch_time_minutes += minutes;
        *monthly_watch_time
            .entry(month_key(record.completed_at))
            .or_insert(0) += minutes;
    }

    let completed_ids: HashSet<TitleId> = completed
        .iter()
        .filter(|e| e.list == ListKind::Completed)
        .map(|e| e.title_id)
        .collect();

    // Latest snapshot per completed title.
    let mut latest: HashMap<TitleId, &CompletionRecord> = HashMap::new();
    for record in &history {
        if completed_ids.contains(&record.title_id) {
            latest.insert(record.title_id, record);
        }
    }

    let mut genre_breakdown: BTreeMap<String, u32> = BTreeMap::new();
    let mut actor_counts: HashMap<&str, (u32, usize)> = HashMap::new();
    let mut encounter = 0usize;
    for record in history
        .iter()
        .filter(|r| latest.get(&r.title_id).is_some_and(|l| std::ptr::eq(*l, **r)))
    {
        let genres: BTreeSet<&str> = record.genres.iter().map(String::as_str).collect();
        for genre in genres {
            *genre_breakdown.entry(genre.to_string()).or_insert(0) += 1;
        }

        let mut seen_in_title = HashSet::new();
        for name in &record.cast {
            if !seen_in_title.insert(name.as_str()) {
                continue;
            }
            let slot = actor_counts.entry(name.as_str()).or_insert((0, encounter));
            slot.0 += 1;
            encounter += 1;
        }
    }

    let favorite_actor = actor_counts
        .into_iter()
        .max_by(|(_, (count_a, first_a)), (_, (count_b, first_b))| {
            count_a.cmp(count_b).then(first_b.cmp(first_a))
        })
        .map(|(name, (works_watched, _))| FavoriteActor {
            name: name.to_string(),
            works_watched,
        });

    UserStats {
        total_watch_time_minutes,
        genre_breakdown,
        monthly_watch_time,
        favorite_actor,
    }
}
