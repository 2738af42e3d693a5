//! ProgressionLedger: applies earned XP/gold to a user's cumulative totals.
//!
//! Pure state transitions. The caller persists the returned state, history entry and
//! transaction together.
//!
//! Level arithmetic:
//! - `level      = total_xp / XP_PER_LEVEL + 1`
//! - `current_xp = total_xp % XP_PER_LEVEL`

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::rewards::Reward;

pub const XP_PER_LEVEL: u64 = 100;

/// Level for a lifetime XP total.
pub fn level_for(total_xp: u64) -> u32 {
    u32::try_from(total_xp / XP_PER_LEVEL + 1).unwrap_or(u32::MAX)
}

/// The slice of the user record the engine owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProgressionState {
    pub user_id: String,
    /// XP inside the current level.
    pub current_xp: u64,
    pub total_xp: u64,
    pub level: u32,
    pub gold: u64,
    pub current_streak: u32,
    pub longest_streak: u32,
    #[serde(default)]
    pub last_activity_on: Option<NaiveDate>,
    pub total_tasks_completed: u64,
    /// Bumped by the store on every successful write; used for compare-and-swap.
    #[serde(default)]
    pub version: u64,
}

impl UserProgressionState {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            current_xp: 0,
            total_xp: 0,
            level: 1,
            gold: 0,
            current_streak: 0,
            longest_streak: 0,
            last_activity_on: None,
            total_tasks_completed: 0,
            version: 0,
        }
    }

    /// Level and current XP agree with the lifetime total.
    pub fn is_consistent(&self) -> bool {
        self.level == level_for(self.total_xp) && self.current_xp == self.total_xp % XP_PER_LEVEL
    }

    pub fn xp_to_next_level(&self) -> u64 {
        XP_PER_LEVEL - self.current_xp
    }
}

/// One row per reward application that crossed at least one level boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelHistoryEntry {
    pub user_id: String,
    pub previous_level: u32,
    pub new_level: u32,
    pub total_xp_at_levelup: u64,
    pub created_at: DateTime<Utc>,
}

/// What a reward was paid for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RewardSource {
    Task { task_id: String },
    Achievement { achievement_id: String },
}

/// Append-only audit row for every reward application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardTransaction {
    pub user_id: String,
    pub source: RewardSource,
    pub xp: u64,
    pub gold: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerOutcome {
    pub state: UserProgressionState,
    pub leveled_up: bool,
    pub level_history: Option<LevelHistoryEntry>,
    pub transaction: RewardTransaction,
}

/// Apply one reward to `state`.
///
/// A multi-level jump yields a single history entry spanning old -> new level.
/// Zero rewards are accepted and only leave a transaction row behind.
pub fn apply_reward(
    state: &UserProgressionState,
    reward: Reward,
    source: RewardSource,
    now: DateTime<Utc>,
) -> LedgerOutcome {
    let mut next = state.clone();
    next.total_xp = state.total_xp.saturating_add(reward.xp);
    next.gold = state.gold.saturating_add(reward.gold);
    next.level = level_for(next.total_xp);
    next.current_xp = next.total_xp % XP_PER_LEVEL;

    let leveled_up = next.level > state.level;
    let level_history = leveled_up.then(|| LevelHistoryEntry {
        user_id: state.user_id.clone(),
        previous_level: state.level,
        new_level: next.level,
        total_xp_at_levelup: next.total_xp,
        created_at: now,
    });

    let transaction = RewardTransaction {
        user_id: state.user_id.clone(),
        source,
        xp: reward.xp,
        gold: reward.gold,
        created_at: now,
    };

    LedgerOutcome {
        state: next,
        leveled_up,
        level_history,
        transaction,
    }
}

/// Count one successful `complete` call.
pub fn record_completion(state: &UserProgressionState) -> UserProgressionState {
    let mut next = state.clone();
    next.total_tasks_completed += 1;
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn task_src() -> RewardSource {
        RewardSource::Task {
            task_id: "t1".into(),
        }
    }

    fn at_total(total_xp: u64) -> UserProgressionState {
        let mut s = UserProgressionState::new("u1");
        s.total_xp = total_xp;
        s.level = level_for(total_xp);
        s.current_xp = total_xp % XP_PER_LEVEL;
        s
    }

    #[test]
    fn crossing_one_boundary_logs_one_entry() {
        let out = apply_reward(&at_total(95), Reward::new(10, 5), task_src(), now());

        assert!(out.leveled_up);
        assert_eq!(out.state.total_xp, 105);
        assert_eq!(out.state.level, 2);
        assert_eq!(out.state.current_xp, 5);
        assert_eq!(out.state.xp_to_next_level(), 95);
        assert_eq!(out.state.gold, 5);

        let entry = out.level_history.unwrap();
        assert_eq!((entry.previous_level, entry.new_level), (1, 2));
        assert_eq!(entry.total_xp_at_levelup, 105);
    }

    #[test]
    fn multi_level_jump_is_a_single_entry() {
        let out = apply_reward(&at_total(50), Reward::new(370, 0), task_src(), now());
        let entry = out.level_history.unwrap();
        assert_eq!((entry.previous_level, entry.new_level), (1, 5));
        assert_eq!(out.state.current_xp, 20);
    }

    #[test]
    fn zero_reward_is_a_no_op_award() {
        let before = at_total(42);
        let out = apply_reward(&before, Reward::ZERO, task_src(), now());
        assert!(!out.leveled_up);
        assert!(out.level_history.is_none());
        assert_eq!(out.state, before);
        assert_eq!(out.transaction.xp, 0);
    }

    #[test]
    fn landing_exactly_on_a_boundary_levels_up() {
        let out = apply_reward(&at_total(90), Reward::new(10, 0), task_src(), now());
        assert!(out.leveled_up);
        assert_eq!(out.state.level, 2);
        assert_eq!(out.state.current_xp, 0);
        assert_eq!(out.state.xp_to_next_level(), XP_PER_LEVEL);
    }

    #[test]
    fn invariant_holds_across_a_sequence() {
        let mut s = UserProgressionState::new("u1");
        for (i, xp) in [7u64, 93, 0, 250, 1, 99, 100, 13].into_iter().enumerate() {
            s = apply_reward(&s, Reward::new(xp, i as u64), task_src(), now()).state;
            assert!(s.is_consistent(), "broken after award #{i}: {s:?}");
        }
        assert_eq!(s.total_xp, 563);
        assert_eq!(s.level, 6);
        assert_eq!(s.gold, 28);
    }

    #[test]
    fn completion_counter_is_separate_from_rewards() {
        let s = record_completion(&UserProgressionState::new("u1"));
        assert_eq!(s.total_tasks_completed, 1);
        let out = apply_reward(&s, Reward::new(5, 5), task_src(), now());
        assert_eq!(out.state.total_tasks_completed, 1);
    }
}
