//! Achievement catalog + evaluator.
//!
//! Progress per (user, achievement) only ratchets upward, and an unlock happens at most
//! once. Unlock rewards are handed back to the caller to run through the ledger as a
//! separate reward application.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rewards::Reward;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AchievementCategory {
    Tasks,
    Streaks,
    Social,
    Special,
}

/// Counter an achievement is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementType {
    TasksCompleted,
    StreakDays,
    LevelReached,
    TotalXp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Achievement {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: AchievementCategory,
    pub requirement_type: RequirementType,
    pub requirement_value: u64,
    pub reward_xp: u64,
    pub reward_gold: u64,
    pub rarity: Rarity,
}

impl Achievement {
    pub fn reward(&self) -> Reward {
        Reward::new(self.reward_xp, self.reward_gold)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAchievementProgress {
    pub user_id: String,
    pub achievement_id: String,
    pub progress: u64,
    pub is_unlocked: bool,
    pub unlocked_at: Option<DateTime<Utc>>,
}

impl UserAchievementProgress {
    pub fn new(user_id: impl Into<String>, achievement_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            achievement_id: achievement_id.into(),
            progress: 0,
            is_unlocked: false,
            unlocked_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AchievementUpdate {
    pub progress: UserAchievementProgress,
    pub newly_unlocked: bool,
    /// Paid only when `newly_unlocked`; zero otherwise.
    pub reward: Reward,
}

impl AchievementUpdate {
    pub fn achievement_id(&self) -> &str {
        &self.progress.achievement_id
    }
}

/// Evaluate every catalog entry measured by `requirement` against `current_value`.
pub fn evaluate(
    user_id: &str,
    requirement: RequirementType,
    current_value: u64,
    catalog: &[Achievement],
    existing: &[UserAchievementProgress],
    now: DateTime<Utc>,
) -> Vec<AchievementUpdate> {
    catalog
        .iter()
        .filter(|a| a.requirement_type == requirement)
        .map(|a| {
            let prev = existing
                .iter()
                .find(|p| p.user_id == user_id && p.achievement_id == a.id)
                .cloned()
                .unwrap_or_else(|| UserAchievementProgress::new(user_id, a.id.clone()));

            let progress = prev.progress.max(current_value);
            let newly_unlocked = !prev.is_unlocked && progress >= a.requirement_value;

            AchievementUpdate {
                progress: UserAchievementProgress {
                    progress,
                    is_unlocked: prev.is_unlocked || newly_unlocked,
                    unlocked_at: if newly_unlocked { Some(now) } else { prev.unlocked_at },
                    ..prev
                },
                newly_unlocked,
                reward: if newly_unlocked { a.reward() } else { Reward::ZERO },
            }
        })
        .collect()
}

/// Fold updates into a progress list, replacing rows by achievement id.
pub fn merge_progress(progress: &mut Vec<UserAchievementProgress>, updates: &[AchievementUpdate]) {
    for u in updates {
        match progress
            .iter_mut()
            .find(|p| p.achievement_id == u.progress.achievement_id)
        {
            Some(row) => *row = u.progress.clone(),
            None => progress.push(u.progress.clone()),
        }
    }
}

fn category_for(requirement_type: RequirementType) -> AchievementCategory {
    match requirement_type {
        RequirementType::TasksCompleted => AchievementCategory::Tasks,
        RequirementType::StreakDays => AchievementCategory::Streaks,
        RequirementType::LevelReached | RequirementType::TotalXp => AchievementCategory::Special,
    }
}

/// Catalog row builder: `entry(..).requires(..).pays(..)`.
fn entry(id: &str, name: &str, description: &str) -> Achievement {
    Achievement {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        category: AchievementCategory::Tasks,
        requirement_type: RequirementType::TasksCompleted,
        requirement_value: 1,
        reward_xp: 0,
        reward_gold: 0,
        rarity: Rarity::Common,
    }
}

impl Achievement {
    fn requires(mut self, requirement_type: RequirementType, value: u64) -> Self {
        self.category = category_for(requirement_type);
        self.requirement_type = requirement_type;
        self.requirement_value = value;
        self
    }

    fn pays(mut self, xp: u64, gold: u64, rarity: Rarity) -> Self {
        self.reward_xp = xp;
        self.reward_gold = gold;
        self.rarity = rarity;
        self
    }
}

/// Built-in catalog.
pub fn default_catalog() -> Vec<Achievement> {
    use Rarity::*;
    use RequirementType::*;

    vec![
        entry("first_quest", "First Quest", "Complete your first quest")
            .requires(TasksCompleted, 1)
            .pays(10, 5, Common),
        entry("quest_novice", "Quest Novice", "Complete 10 quests")
            .requires(TasksCompleted, 10)
            .pays(25, 15, Common),
        entry("quest_adept", "Quest Adept", "Complete 50 quests")
            .requires(TasksCompleted, 50)
            .pays(75, 40, Uncommon),
        entry("centurion", "Centurion", "Complete 100 quests")
            .requires(TasksCompleted, 100)
            .pays(150, 100, Rare),
        entry("quest_legend", "Quest Legend", "Complete 500 quests")
            .requires(TasksCompleted, 500)
            .pays(500, 300, Legendary),
        entry("week_warrior", "Week Warrior", "Keep a 7 day streak")
            .requires(StreakDays, 7)
            .pays(50, 25, Uncommon),
        entry("fortnight_focus", "Fortnight Focus", "Keep a 14 day streak")
            .requires(StreakDays, 14)
            .pays(100, 50, Rare),
        entry("unstoppable", "Unstoppable", "Keep a 30 day streak")
            .requires(StreakDays, 30)
            .pays(250, 150, Epic),
        entry("rising_star", "Rising Star", "Reach level 5")
            .requires(LevelReached, 5)
            .pays(50, 50, Uncommon),
        entry("seasoned", "Seasoned", "Reach level 10")
            .requires(LevelReached, 10)
            .pays(100, 100, Rare),
        entry("xp_hoarder", "XP Hoarder", "Earn 5000 XP in total")
            .requires(TotalXp, 5000)
            .pays(200, 200, Epic),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    const TASKS: RequirementType = RequirementType::TasksCompleted;

    fn five_tasks() -> Vec<Achievement> {
        vec![entry("five", "Five", "Complete 5 quests")
            .requires(RequirementType::TasksCompleted, 5)
            .pays(20, 10, Rarity::Common)]
    }

    fn progress_at(value: u64) -> UserAchievementProgress {
        UserAchievementProgress {
            progress: value,
            ..UserAchievementProgress::new("u1", "five")
        }
    }

    #[test]
    fn out_of_order_value_never_regresses() {
        let catalog = five_tasks();
        let out = evaluate("u1", TASKS, 3, &catalog, &[progress_at(4)], now());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].progress.progress, 4);
        assert!(!out[0].newly_unlocked);
        assert_eq!(out[0].reward, Reward::ZERO);
    }

    #[test]
    fn unlocks_once_at_threshold() {
        let catalog = five_tasks();
        let first = evaluate("u1", TASKS, 5, &catalog, &[progress_at(4)], now());
        assert!(first[0].newly_unlocked);
        assert_eq!(first[0].reward, Reward::new(20, 10));
        assert_eq!(first[0].progress.unlocked_at, Some(now()));

        let later = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        let seen = [first[0].progress.clone()];
        let again = evaluate("u1", TASKS, 6, &catalog, &seen, later);
        assert!(!again[0].newly_unlocked);
        assert!(again[0].progress.is_unlocked);
        assert_eq!(again[0].progress.unlocked_at, Some(now()));
        assert_eq!(again[0].progress.progress, 6);
    }

    #[test]
    fn other_requirement_types_are_untouched() {
        let out = evaluate("u1", RequirementType::StreakDays, 50, &five_tasks(), &[], now());
        assert!(out.is_empty());
    }

    #[test]
    fn missing_progress_starts_from_zero() {
        let out = evaluate("u1", TASKS, 2, &five_tasks(), &[], now());
        assert_eq!(out[0].progress, progress_at(2));
    }

    #[test]
    fn merge_replaces_rows_by_id() {
        let mut rows = vec![progress_at(1)];
        let updates = evaluate("u1", TASKS, 5, &five_tasks(), &rows, now());
        merge_progress(&mut rows, &updates);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_unlocked);
    }

    #[test]
    fn default_catalog_ids_are_unique() {
        let cat = default_catalog();
        let mut ids: Vec<&str> = cat.iter().map(|a| a.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), cat.len());
        assert!(cat.iter().any(|a| a.requirement_type == RequirementType::StreakDays));
    }
}
