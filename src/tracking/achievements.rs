//! Achievement Engine.
//!
//! Rules are plain data evaluated against a [`EvaluationInput`]. Unlocks
//! are monotonic: the engine never clears an unlock timestamp, and an
//! unlock that was satisfied while premium gating blocked it is kept as
//! deferred until the user is premium.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::models::ListCounts;
use super::stats::UserStats;
use crate::record_store::AchievementUnlock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
    Common,
    Rare,
    Legendary,
}

impl Rarity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rarity::Common => "common",
            Rarity::Rare => "rare",
            Rarity::Legendary => "legendary",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AchievementRule {
    CompletedAtLeast { count: usize },
    WatchlistAtLeast { count: usize },
    WatchingAtLeast { count: usize },
    /// Genre names compare case-insensitively.
    GenreCompletedAtLeast { genre: String, count: u32 },
    WatchTimeAtLeast { minutes: u64 },
    RankingAtLeast { count: usize },
    DistinctGenresAtLeast { count: usize },
}

impl AchievementRule {
    pub fn is_satisfied(&self, input: &EvaluationInput<'_>) -> bool {
        match self {
            AchievementRule::CompletedAtLeast { count } => input.counts.completed >= *count,
            AchievementRule::WatchlistAtLeast { count } => input.counts.watchlist >= *count,
            AchievementRule::WatchingAtLeast { count } => input.counts.watching >= *count,
            AchievementRule::GenreCompletedAtLeast { genre, count } => {
                input.stats.genre_count(genre) >= *count
            }
            AchievementRule::WatchTimeAtLeast { minutes } => {
                input.stats.total_watch_time_minutes >= *minutes
            }
            AchievementRule::RankingAtLeast { count } => input.ranking_count >= *count,
            AchievementRule::DistinctGenresAtLeast { count } => {
                input.stats.distinct_genres() >= *count
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementDefinition {
    pub id: String,
    pub name: String,
    pub rarity: Rarity,
    pub is_premium_only: bool,
    pub rule: AchievementRule,
}

impl AchievementDefinition {
    pub fn new(id: &str, name: &str, rarity: Rarity, rule: AchievementRule) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            rarity,
            is_premium_only: false,
            rule,
        }
    }

    pub fn premium_only(mut self) -> Self {
        self.is_premium_only = true;
        self
    }
}

/// An achievement as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Achievement {
    pub id: String,
    pub name: String,
    pub rarity: Rarity,
    pub is_premium_only: bool,
    pub unlocked_at: Option<i64>,
}

pub struct EvaluationInput<'a> {
    pub stats: &'a UserStats,
    pub counts: ListCounts,
    pub ranking_count: usize,
    pub is_premium: bool,
}

pub fn default_definitions() -> Vec<AchievementDefinition> {
    use AchievementRule::*;
    use Rarity::*;

    vec![
        AchievementDefinition::new(
            "first-completion",
            "First Finale",
            Common,
            CompletedAtLeast { count: 1 },
        ),
        AchievementDefinition::new(
            "binge-starter",
            "Binge Starter",
            Common,
            CompletedAtLeast { count: 5 },
        ),
        AchievementDefinition::new(
            "seasoned-viewer",
            "Seasoned Viewer",
            Rare,
            CompletedAtLeast { count: 25 },
        ),
        AchievementDefinition::new(
            "completionist",
            "Completionist",
            Legendary,
            CompletedAtLeast { count: 100 },
        )
        .premium_only(),
        AchievementDefinition::new(
            "first-drama",
            "First Drama",
            Common,
            GenreCompletedAtLeast {
                genre: "drama".to_string(),
                count: 1,
            },
        ),
        AchievementDefinition::new(
            "romance-devotee",
            "Romance Devotee",
            Rare,
            GenreCompletedAtLeast {
                genre: "romance".to_string(),
                count: 20,
            },
        ),
        AchievementDefinition::new("planner", "Planner", Common, WatchlistAtLeast { count: 10 }),
        AchievementDefinition::new("hoarder", "Hoarder", Rare, WatchlistAtLeast { count: 50 }),
        AchievementDefinition::new(
            "multitasker",
            "Multitasker",
            Common,
            WatchingAtLeast { count: 5 },
        ),
        AchievementDefinition::new(
            "marathoner",
            "Marathoner",
            Rare,
            WatchTimeAtLeast { minutes: 100 * 60 },
        ),
        AchievementDefinition::new(
            "thousand-hours",
            "Thousand Hours",
            Legendary,
            WatchTimeAtLeast { minutes: 1000 * 60 },
        )
        .premium_only(),
        AchievementDefinition::new("curator", "Curator", Common, RankingAtLeast { count: 10 }),
        AchievementDefinition::new(
            "genre-explorer",
            "Genre Explorer",
            Rare,
            DistinctGenresAtLeast { count: 10 },
        ),
        AchievementDefinition::new(
            "genre-master",
            "Genre Master",
            Legendary,
            DistinctGenresAtLeast { count: 20 },
        )
        .premium_only(),
    ]
}

pub struct AchievementEngine {
    definitions: Vec<AchievementDefinition>,
    unlocked: HashMap<String, i64>,
    deferred: BTreeSet<String>,
}

impl AchievementEngine {
    pub fn new(definitions: Vec<AchievementDefinition>) -> Self {
        Self {
            definitions,
            unlocked: HashMap::new(),
            deferred: BTreeSet::new(),
        }
    }

    /// Restores persisted unlocks. Ids that are not defined are ignored;
    /// a duplicate keeps its earliest timestamp.
    pub fn restore_unlocks<'a>(&mut self, unlocks: impl IntoIterator<Item = &'a AchievementUnlock>) {
        for unlock in unlocks {
            if self.definition(&unlock.achievement_id).is_none() {
                continue;
            }
            self.deferred.remove(&unlock.achievement_id);
            self.unlocked
                .entry(unlock.achievement_id.clone())
                .and_modify(|at| *at = (*at).min(unlock.unlocked_at))
                .or_insert(unlock.unlocked_at);
        }
    }

    /// Returns the ids unlocked by this call. Already unlocked ids are never
    /// returned again.
    pub fn evaluate(&mut self, input: &EvaluationInput<'_>, now: i64) -> BTreeSet<String> {
        let mut newly_unlocked = BTreeSet::new();
        for definition in &self.definitions {
            if self.unlocked.contains_key(&definition.id) {
                continue;
            }
            let satisfied =
                self.deferred.contains(&definition.id) || definition.rule.is_satisfied(input);
            if !satisfied {
                continue;
            }
            if definition.is_premium_only && !input.is_premium {
                self.deferred.insert(definition.id.clone());
                continue;
            }
            self.deferred.remove(&definition.id);
            self.unlocked.insert(definition.id.clone(), now);
            newly_unlocked.insert(definition.id.clone());
        }
        newly_unlocked
    }

    pub fn definition(&self, id: &str) -> Option<&AchievementDefinition> {
        self.definitions.iter().find(|d| d.id == id)
    }

    pub fn unlocked_at(&self, id: &str) -> Option<i64> {
        self.unlocked.get(id).copied()
    }

    pub fn is_deferred(&self, id: &str) -> bool {
        self.deferred.contains(id)
    }

    /// All achievements, in definition order.
    pub fn achievements(&self) -> Vec<Achievement> {
        self.definitions
            .iter()
            .map(|d| Achievement {
                id: d.id.clone(),
                name: d.name.clone(),
                rarity: d.rarity,
                is_premium_only: d.is_premium_only,
                unlocked_at: self.unlocked.get(&d.id).copied(),
            })
            .collect()
    }

    pub fn achievement(&self, id: &str) -> Option<Achievement> {
        self.achievements().into_iter().find(|a| a.id == id)
    }
}

impl Default for AchievementEngine {
    fn default() -> Self {
        Self::new(default_definitions())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn input(stats: &UserStats, completed: usize, is_premium: bool) -> EvaluationInput<'_> {
        EvaluationInput {
            stats,
            counts: ListCounts {
                watching: 0,
                watchlist: 0,
                completed,
            },
            ranking_count: 0,
            is_premium,
        }
    }

    fn drama_stats(dramas: u32) -> UserStats {
        let mut stats = UserStats::default();
        if dramas > 0 {
            stats.genre_breakdown.insert("Drama".to_string(), dramas);
        }
        stats
    }

    #[test]
    fn test_default_catalog_ids_are_unique() {
        let definitions = default_definitions();
        let ids: BTreeSet<_> = definitions.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids.len(), definitions.len());
        assert!(definitions
            .iter()
            .filter(|d| d.rarity == Rarity::Legendary)
            .all(|d| d.is_premium_only));
    }

    #[test]
    fn test_first_completion_unlocks_batch() {
        let mut engine = AchievementEngine::default();
        let stats = drama_stats(1);

        let unlocked = engine.evaluate(&input(&stats, 1, false), 100);

        assert_eq!(
            unlocked,
            BTreeSet::from(["first-completion".to_string(), "first-drama".to_string()])
        );
        assert_eq!(engine.unlocked_at("first-drama"), Some(100));
    }

    #[test]
    fn test_evaluate_is_idempotent() {
        let mut engine = AchievementEngine::default();
        let stats = drama_stats(1);

        assert!(!engine.evaluate(&input(&stats, 1, false), 100).is_empty());
        assert!(engine.evaluate(&input(&stats, 1, false), 200).is_empty());
        assert_eq!(engine.unlocked_at("first-completion"), Some(100));
    }

    #[test]
    fn test_unlock_survives_shrinking_inputs() {
        let mut engine = AchievementEngine::default();
        let stats = drama_stats(1);
        engine.evaluate(&input(&stats, 1, false), 100);

        let empty = UserStats::default();
        engine.evaluate(&input(&empty, 0, false), 200);

        assert_eq!(engine.unlocked_at("first-completion"), Some(100));
        assert_eq!(engine.unlocked_at("first-drama"), Some(100));
    }

    #[test]
    fn test_premium_only_unlock_is_deferred() {
        let mut engine = AchievementEngine::default();
        let stats = UserStats::default();

        let unlocked = engine.evaluate(&input(&stats, 100, false), 100);
        assert!(!unlocked.contains("completionist"));
        assert!(unlocked.contains("seasoned-viewer"));
        assert!(engine.is_deferred("completionist"));
        assert_eq!(engine.unlocked_at("completionist"), None);

        let unlocked = engine.evaluate(&input(&stats, 100, true), 300);
        assert_eq!(unlocked, BTreeSet::from(["completionist".to_string()]));
        assert_eq!(engine.unlocked_at("completionist"), Some(300));
        assert!(!engine.is_deferred("completionist"));
    }

    #[test]
    fn test_deferred_unlock_is_not_lost_when_inputs_shrink() {
        let mut engine = AchievementEngine::default();
        let stats = UserStats::default();
        engine.evaluate(&input(&stats, 100, false), 100);

        // Titles moved out of completed before the user went premium.
        let unlocked = engine.evaluate(&input(&stats, 40, true), 200);
        assert!(unlocked.contains("completionist"));
    }

    #[test]
    fn test_restore_unlocks() {
        let mut engine = AchievementEngine::default();
        engine.restore_unlocks(&[
            AchievementUnlock {
                achievement_id: "planner".to_string(),
                unlocked_at: 50,
            },
            AchievementUnlock {
                achievement_id: "planner".to_string(),
                unlocked_at: 20,
            },
            AchievementUnlock {
                achievement_id: "retired-badge".to_string(),
                unlocked_at: 10,
            },
        ]);

        assert_eq!(engine.unlocked_at("planner"), Some(20));
        assert!(engine.achievement("retired-badge").is_none());

        let stats = UserStats::default();
        let mut counts = input(&stats, 0, false);
        counts.counts.watchlist = 12;
        assert!(engine.evaluate(&counts, 99).is_empty());
    }

    #[test]
    fn test_genre_rule_ignores_case() {
        let mut stats = UserStats::default();
        stats.genre_breakdown.insert("ROMANCE".to_string(), 12);
        stats.genre_breakdown.insert("Romance".to_string(), 8);

        let rule = AchievementRule::GenreCompletedAtLeast {
            genre: "romance".to_string(),
            count: 20,
        };
        assert!(rule.is_satisfied(&input(&stats, 0, false)));
    }

    #[test]
    fn test_rule_serialization() {
        let rule = AchievementRule::WatchTimeAtLeast { minutes: 6000 };
        let json = serde_json::to_string(&rule).unwrap();
        assert_eq!(json, r#"{"kind":"watch_time_at_least","minutes":6000}"#);
    }

    proptest! {
        #[test]
        fn prop_unlocks_are_never_cleared(
            steps in prop::collection::vec((0usize..120, 0u32..30, any::<bool>()), 1..40)
        ) {
            let mut engine = AchievementEngine::default();
            let mut seen: HashMap<String, i64> = HashMap::new();
            for (now, (completed, dramas, premium)) in steps.into_iter().enumerate() {
                let stats = drama_stats(dramas);
                let newly = engine.evaluate(&input(&stats, completed, premium), now as i64);
                for id in &newly {
                    prop_assert!(!seen.contains_key(id));
                }
                for achievement in engine.achievements() {
                    if let Some(at) = seen.get(&achievement.id) {
                        prop_assert_eq!(achievement.unlocked_at, Some(*at));
                    }
                    if let Some(at) = achievement.unlocked_at {
                        seen.insert(achievement.id.clone(), at);
                    }
                }
            }
        }
    }
}
