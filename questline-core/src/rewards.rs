//! RewardTable: declared difficulty -> base (XP, gold).
//!
//! `Difficulty` and `TaskPriority` can only be built through their checked constructors
//! (serde included), so the table itself is total.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Base payout for a task, frozen on the task when it is authored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reward {
    pub xp: u64,
    pub gold: u64,
}

impl Reward {
    pub const ZERO: Reward = Reward { xp: 0, gold: 0 };

    pub fn new(xp: u64, gold: u64) -> Self {
        Self { xp, gold }
    }

    pub fn is_zero(&self) -> bool {
        self.xp == 0 && self.gold == 0
    }
}

/// Task difficulty, 1 (trivial) ..= 5 (epic).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Difficulty(u8);

impl Difficulty {
    pub const MIN: Difficulty = Difficulty(1);
    pub const MAX: Difficulty = Difficulty(5);

    pub fn new(value: u8) -> Result<Self> {
        if (1..=5).contains(&value) {
            Ok(Self(value))
        } else {
            Err(EngineError::validation(
                "difficulty",
                format!("must be 1..=5, got {value}"),
            ))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Difficulty {
    fn default() -> Self {
        Self(1)
    }
}

impl TryFrom<u8> for Difficulty {
    type Error = EngineError;

    fn try_from(value: u8) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Difficulty> for u8 {
    fn from(d: Difficulty) -> u8 {
        d.0
    }
}

/// Task priority, 1 ..= 5. Display/sort only; it has no effect on rewards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct TaskPriority(u8);

impl TaskPriority {
    pub fn new(value: u8) -> Result<Self> {
        if (1..=5).contains(&value) {
            Ok(Self(value))
        } else {
            Err(EngineError::validation(
                "priority",
                format!("must be 1..=5, got {value}"),
            ))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self(3)
    }
}

impl TryFrom<u8> for TaskPriority {
    type Error = EngineError;

    fn try_from(value: u8) -> Result<Self> {
        Self::new(value)
    }
}

impl From<TaskPriority> for u8 {
    fn from(p: TaskPriority) -> u8 {
        p.0
    }
}

// (xp, gold) indexed by difficulty - 1.
const TABLE: [(u64, u64); 5] = [(10, 5), (20, 10), (30, 15), (50, 25), (80, 40)];

/// Base reward for a difficulty tier.
pub fn rewards_for(difficulty: Difficulty) -> Reward {
    let (xp, gold) = TABLE[usize::from(difficulty.0 - 1)];
    Reward { xp, gold }
}

/// Frozen reward for a task. Subtasks are always paid at the lowest tier.
pub fn frozen_reward(difficulty: Difficulty, is_subtask: bool) -> Reward {
    if is_subtask {
        rewards_for(Difficulty::MIN)
    } else {
        rewards_for(difficulty)
    }
}
