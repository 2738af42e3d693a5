//! Streak tiers and daily check-in bookkeeping.
//!
//! Tiers (consecutive active days -> XP multiplier):
//! - 0..=6   -> 1.0
//! - 7..=13  -> 1.2
//! - 14..=29 -> 1.5
//! - 30..    -> 2.0
//!
//! The bonus is computed from the tier's whole-percent bonus so `floor` stays exact
//! (30 XP at 1.2 must give 6 bonus XP, not 5 from float drift).

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::progression::UserProgressionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreakTier {
    None,
    Week,
    Fortnight,
    Month,
}

impl StreakTier {
    pub fn for_days(streak_days: u32) -> Self {
        match streak_days {
            0..=6 => StreakTier::None,
            7..=13 => StreakTier::Week,
            14..=29 => StreakTier::Fortnight,
            _ => StreakTier::Month,
        }
    }

    /// Extra XP on top of the base, in whole percent.
    pub fn bonus_percent(self) -> u64 {
        match self {
            StreakTier::None => 0,
            StreakTier::Week => 20,
            StreakTier::Fortnight => 50,
            StreakTier::Month => 100,
        }
    }

    pub fn multiplier(self) -> f64 {
        1.0 + self.bonus_percent() as f64 / 100.0
    }
}

/// Reward multiplier for a streak length, in `[1.0, 2.0]`.
pub fn multiplier_for(streak_days: u32) -> f64 {
    StreakTier::for_days(streak_days).multiplier()
}

/// `floor(base_xp * (multiplier - 1.0))`.
pub fn bonus_xp(base_xp: u64, streak_days: u32) -> u64 {
    base_xp * StreakTier::for_days(streak_days).bonus_percent() / 100
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreakUpdate {
    pub state: UserProgressionState,
    /// True when `current_streak` moved (up, or reset).
    pub changed: bool,
}

/// Record a qualifying activity on `day`.
///
/// Same day: no change. Next day: +1. Gap: back to 1. A day before the last recorded
/// activity is ignored.
pub fn record_activity(state: &UserProgressionState, day: NaiveDate) -> StreakUpdate {
    let mut next = state.clone();

    let new_streak = match state.last_activity_on {
        None => 1,
        Some(last) if day <= last => {
            return StreakUpdate {
                state: next,
                changed: false,
            };
        }
        Some(last) if day == last + Duration::days(1) => state.current_streak + 1,
        Some(_) => 1,
    };

    next.current_streak = new_streak;
    next.longest_streak = next.longest_streak.max(new_streak);
    next.last_activity_on = Some(day);

    StreakUpdate {
        changed: new_streak != state.current_streak,
        state: next,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn tier_boundaries() {
        for s in 0..=6 {
            assert_eq!(multiplier_for(s), 1.0);
        }
        for s in 7..=13 {
            assert_eq!(multiplier_for(s), 1.2);
        }
        for s in 14..=29 {
            assert_eq!(multiplier_for(s), 1.5);
        }
        for s in [30, 31, 365, u32::MAX] {
            assert_eq!(multiplier_for(s), 2.0);
        }
    }

    #[test]
    fn bonus_is_floored_without_float_drift() {
        assert_eq!(bonus_xp(30, 10), 6);
        assert_eq!(bonus_xp(10, 7), 2);
        assert_eq!(bonus_xp(15, 14), 7);
        assert_eq!(bonus_xp(50, 30), 50);
        assert_eq!(bonus_xp(80, 3), 0);
    }

    #[test]
    fn consecutive_days_extend_the_streak() {
        let s0 = UserProgressionState::new("u1");
        let s1 = record_activity(&s0, day(2026, 3, 1));
        assert!(s1.changed);
        assert_eq!(s1.state.current_streak, 1);

        let s2 = record_activity(&s1.state, day(2026, 3, 2));
        assert_eq!(s2.state.current_streak, 2);
        assert_eq!(s2.state.longest_streak, 2);

        let same = record_activity(&s2.state, day(2026, 3, 2));
        assert!(!same.changed);
        assert_eq!(same.state, s2.state);
    }

    #[test]
    fn a_gap_resets_but_keeps_longest() {
        let mut s = UserProgressionState::new("u1");
        for d in 1..=5 {
            s = record_activity(&s, day(2026, 3, d)).state;
        }
        assert_eq!(s.current_streak, 5);

        let after_gap = record_activity(&s, day(2026, 3, 9));
        assert!(after_gap.changed);
        assert_eq!(after_gap.state.current_streak, 1);
        assert_eq!(after_gap.state.longest_streak, 5);
    }

    #[test]
    fn stale_days_are_ignored() {
        let s = record_activity(&UserProgressionState::new("u1"), day(2026, 3, 10)).state;
        let late = record_activity(&s, day(2026, 3, 8));
        assert!(!late.changed);
        assert_eq!(late.state.last_activity_on, Some(day(2026, 3, 10)));
    }
}
