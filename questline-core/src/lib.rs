//! questline-core: the task & progression engine behind Questline.
//!
//! Pure components (rewards, streak, lifecycle, progression, achievements) composed by
//! [`QuestEngine`], which owns the single read-modify-write against a [`ProgressStore`].

pub mod achievements;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod progression;
pub mod recurrence;
pub mod rewards;
pub mod store;
pub mod streak;
pub mod task;
pub mod time;

pub use achievements::{
    default_catalog, evaluate, Achievement, AchievementCategory, AchievementUpdate, Rarity,
    RequirementType, UserAchievementProgress,
};
pub use engine::{
    preview_award, CheckInResult, Clock, CompletionPlan, CompletionResult, FixedClock,
    QuestEngine, SystemClock, UnlockedAchievement, MAX_COMMIT_ATTEMPTS,
};
pub use error::{EngineError, Result};
pub use lifecycle::{mark_overdue_sweep, todays_workable, CompletionAward, NewTask, TaskPatch};
pub use progression::{
    apply_reward, level_for, LedgerOutcome, LevelHistoryEntry, RewardSource, RewardTransaction,
    UserProgressionState, XP_PER_LEVEL,
};
pub use recurrence::{parse_recurrence, Recurrence, RecurrenceKind};
pub use rewards::{rewards_for, Difficulty, Reward, TaskPriority};
pub use store::{InMemoryStore, MemoryState, ProgressCommit, ProgressStore};
pub use streak::{multiplier_for, record_activity, StreakTier};
pub use task::{Category, Task, TaskStatus};
