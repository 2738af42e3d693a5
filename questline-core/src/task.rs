//! Task ("quest") model.
//!
//! Storage is a separate layer; this stays small and serializable.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::recurrence::Recurrence;
use crate::rewards::{frozen_reward, Difficulty, Reward, TaskPriority};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Overdue,
    Cancelled,
}

impl TaskStatus {
    /// Completed and cancelled tasks never change status again.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Overdue => "overdue",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Main,
    #[default]
    Side,
    Daily,
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "main" => Ok(Category::Main),
            "side" => Ok(Category::Side),
            "daily" => Ok(Category::Daily),
            other => Err(format!("unknown category '{other}' (main|side|daily)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub user_id: String,
    /// Set on subtasks. A subtask never has children of its own.
    pub parent_task_id: Option<String>,

    pub title: String,
    pub description: Option<String>,
    pub category: Category,
    pub priority: TaskPriority,
    pub difficulty: Difficulty,
    pub due_date: Option<DateTime<Utc>>,
    pub recurrence: Option<Recurrence>,
    /// Cosmetic only.
    pub color: Option<String>,

    pub status: TaskStatus,

    /// Frozen at authoring time; only a difficulty edit recomputes them.
    pub xp_reward: u64,
    pub gold_reward: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        title: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let difficulty = Difficulty::default();
        let reward = frozen_reward(difficulty, false);
        Self {
            id: id.into(),
            user_id: user_id.into(),
            parent_task_id: None,
            title: title.into(),
            description: None,
            category: Category::default(),
            priority: TaskPriority::default(),
            difficulty,
            due_date: None,
            recurrence: None,
            color: None,
            status: TaskStatus::Pending,
            xp_reward: reward.xp,
            gold_reward: reward.gold,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_subtask(&self) -> bool {
        self.parent_task_id.is_some()
    }

    pub fn reward(&self) -> Reward {
        Reward::new(self.xp_reward, self.gold_reward)
    }

    /// Recompute the frozen reward from the current difficulty and parentage.
    pub fn refreeze_reward(&mut self) {
        let r = frozen_reward(self.difficulty, self.is_subtask());
        self.xp_reward = r.xp;
        self.gold_reward = r.gold;
    }

    pub fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = difficulty;
        self.refreeze_reward();
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_task_id = Some(parent_id.into());
        self.refreeze_reward();
        self
    }

    pub fn with_due(mut self, due: DateTime<Utc>) -> Self {
        self.due_date = Some(due);
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn with_recurrence(mut self, recurrence: Recurrence) -> Self {
        self.recurrence = Some(recurrence);
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }
}
