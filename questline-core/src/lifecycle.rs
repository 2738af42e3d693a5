//! TaskLifecycle: the per-task state machine.
//!
//! ```text
//! pending ──start──▶ in-progress ──complete──▶ completed (terminal)
//!    │                   │
//!    └──due < now────────┴──▶ overdue ──complete──▶ completed
//!                                 └──reschedule──▶ pending / in-progress
//! any non-terminal ──cancel──▶ cancelled (terminal)
//! ```
//!
//! Everything here is a pure transition: tasks and user state come in, new values go out.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::progression::UserProgressionState;
use crate::recurrence::Recurrence;
use crate::rewards::{Difficulty, Reward, TaskPriority};
use crate::streak::{bonus_xp, multiplier_for};
use crate::task::{Category, Task, TaskStatus};

/// Raw authoring input. Numeric ranges are checked by [`create`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub category: Category,
    pub priority: u8,
    pub difficulty: u8,
    pub due_date: Option<DateTime<Utc>>,
    pub recurrence: Option<Recurrence>,
    pub color: Option<String>,
    pub parent_task_id: Option<String>,
}

impl NewTask {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            priority: TaskPriority::default().value(),
            difficulty: Difficulty::default().value(),
            ..Self::default()
        }
    }

    pub fn difficulty(mut self, difficulty: u8) -> Self {
        self.difficulty = difficulty;
        self
    }

    pub fn due(mut self, due: DateTime<Utc>) -> Self {
        self.due_date = Some(due);
        self
    }

    pub fn under(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_task_id = Some(parent_id.into());
        self
    }

    pub fn recurring(mut self, recurrence: Recurrence) -> Self {
        self.recurrence = Some(recurrence);
        self
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    /// Authoring-time check: a new due date may not already be in the past.
    pub fn check_due_date(&self, now: DateTime<Utc>) -> Result<()> {
        match self.due_date {
            Some(due) if due < now => Err(EngineError::validation(
                "due_date",
                format!("{} is in the past", due.to_rfc3339()),
            )),
            _ => Ok(()),
        }
    }
}

/// Field edits. `None` leaves a field alone; `Some(None)` clears an optional one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub category: Option<Category>,
    pub priority: Option<u8>,
    pub difficulty: Option<u8>,
    pub due_date: Option<Option<DateTime<Utc>>>,
    pub recurrence: Option<Option<Recurrence>>,
    pub color: Option<Option<String>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// What a completion pays out, before it reaches the ledger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionAward {
    /// Frozen task reward.
    pub base: Reward,
    pub multiplier: f64,
    pub bonus_xp: u64,
    /// `base.xp + bonus_xp`; gold is never multiplied.
    pub total: Reward,
}

fn validate_title(title: &str) -> Result<String> {
    let t = title.trim();
    if t.is_empty() {
        return Err(EngineError::validation("title", "must not be empty"));
    }
    Ok(t.to_string())
}

/// Build a new pending task with its reward frozen.
///
/// `parent` must be the loaded task named by `input.parent_task_id`, if any.
pub fn create(
    id: impl Into<String>,
    user_id: &str,
    input: NewTask,
    parent: Option<&Task>,
    now: DateTime<Utc>,
) -> Result<Task> {
    let title = validate_title(&input.title)?;
    let difficulty = Difficulty::new(input.difficulty)?;
    let priority = TaskPriority::new(input.priority)?;
    if let Some(rec) = &input.recurrence {
        rec.validate()?;
    }

    match (&input.parent_task_id, parent) {
        (None, _) => {}
        (Some(pid), None) => return Err(EngineError::not_found("task", pid.clone())),
        (Some(pid), Some(p)) => {
            if p.id != *pid || p.user_id != user_id {
                return Err(EngineError::not_found("task", pid.clone()));
            }
            if p.is_subtask() {
                return Err(EngineError::validation(
                    "parent_task_id",
                    "subtasks cannot have subtasks",
                ));
            }
        }
    }

    let mut task = Task::new(id, user_id, title, now);
    task.parent_task_id = input.parent_task_id;
    task.description = input.description;
    task.category = input.category;
    task.priority = priority;
    task.difficulty = difficulty;
    task.due_date = input.due_date;
    task.recurrence = input.recurrence;
    task.color = input.color;
    task.refreeze_reward();
    Ok(task)
}

/// `pending`/`overdue` -> `in-progress`.
pub fn start(task: &Task, now: DateTime<Utc>) -> Result<Task> {
    match task.status {
        TaskStatus::Completed => Err(EngineError::AlreadyCompleted {
            task_id: task.id.clone(),
        }),
        TaskStatus::Cancelled => Err(EngineError::InvalidTransition {
            task_id: task.id.clone(),
            from: task.status,
            to: TaskStatus::InProgress,
        }),
        TaskStatus::InProgress => Ok(task.clone()),
        TaskStatus::Pending | TaskStatus::Overdue => {
            let mut next = task.clone();
            // An overdue task stays overdue until it is rescheduled or completed.
            if next.status == TaskStatus::Pending {
                next.status = TaskStatus::InProgress;
            }
            next.started_at.get_or_insert(now);
            next.updated_at = now;
            Ok(next)
        }
    }
}

/// Complete a task and work out what it pays.
///
/// Does not touch user state; the streak is only read to size the bonus.
pub fn complete(
    task: &Task,
    user: &UserProgressionState,
    now: DateTime<Utc>,
) -> Result<(Task, CompletionAward)> {
    match task.status {
        TaskStatus::Completed => {
            return Err(EngineError::AlreadyCompleted {
                task_id: task.id.clone(),
            });
        }
        TaskStatus::Cancelled => {
            return Err(EngineError::InvalidTransition {
                task_id: task.id.clone(),
                from: task.status,
                to: TaskStatus::Completed,
            });
        }
        TaskStatus::Pending | TaskStatus::InProgress | TaskStatus::Overdue => {}
    }

    let base = task.reward();
    let bonus = bonus_xp(base.xp, user.current_streak);
    let award = CompletionAward {
        base,
        multiplier: multiplier_for(user.current_streak),
        bonus_xp: bonus,
        total: Reward::new(base.xp + bonus, base.gold),
    };

    let mut done = task.clone();
    done.status = TaskStatus::Completed;
    done.completed_at = Some(now);
    done.updated_at = now;
    Ok((done, award))
}

/// Any non-terminal state -> `cancelled`.
pub fn cancel(task: &Task, now: DateTime<Utc>) -> Result<Task> {
    match task.status {
        TaskStatus::Completed => Err(EngineError::AlreadyCompleted {
            task_id: task.id.clone(),
        }),
        TaskStatus::Cancelled => Err(EngineError::InvalidTransition {
            task_id: task.id.clone(),
            from: task.status,
            to: TaskStatus::Cancelled,
        }),
        _ => {
            let mut next = task.clone();
            next.status = TaskStatus::Cancelled;
            next.updated_at = now;
            Ok(next)
        }
    }
}

/// Apply field edits. A difficulty change refreezes the reward; a due date change
/// re-derives the overdue flag.
pub fn apply_patch(task: &Task, patch: TaskPatch, now: DateTime<Utc>) -> Result<Task> {
    match task.status {
        TaskStatus::Completed => {
            return Err(EngineError::AlreadyCompleted {
                task_id: task.id.clone(),
            });
        }
        TaskStatus::Cancelled => {
            return Err(EngineError::validation("status", "cancelled tasks cannot be edited"));
        }
        _ => {}
    }

    let mut next = task.clone();
    if let Some(title) = patch.title {
        next.title = validate_title(&title)?;
    }
    if let Some(d) = patch.difficulty {
        next.difficulty = Difficulty::new(d)?;
    }
    if let Some(p) = patch.priority {
        next.priority = TaskPriority::new(p)?;
    }
    if let Some(Some(rec)) = &patch.recurrence {
        rec.validate()?;
    }
    if let Some(Some(due)) = patch.due_date {
        if Some(due) != task.due_date && due < now {
            return Err(EngineError::validation(
                "due_date",
                format!("{} is in the past", due.to_rfc3339()),
            ));
        }
    }

    if let Some(description) = patch.description {
        next.description = description;
    }
    if let Some(category) = patch.category {
        next.category = category;
    }
    if let Some(recurrence) = patch.recurrence {
        next.recurrence = recurrence;
    }
    if let Some(color) = patch.color {
        next.color = color;
    }
    if let Some(due) = patch.due_date {
        next.due_date = due;
        refresh_overdue(&mut next, now);
    }

    if next.difficulty != task.difficulty {
        next.refreeze_reward();
    }
    next.updated_at = now;
    Ok(next)
}

fn is_past_due(task: &Task, now: DateTime<Utc>) -> bool {
    task.due_date.is_some_and(|due| due < now)
}

/// Bring `status` in line with the due date, both ways. Returns whether it changed.
pub fn refresh_overdue(task: &mut Task, now: DateTime<Utc>) -> bool {
    let derived = match task.status {
        TaskStatus::Pending | TaskStatus::InProgress if is_past_due(task, now) => {
            TaskStatus::Overdue
        }
        TaskStatus::Overdue if !is_past_due(task, now) => {
            if task.started_at.is_some() {
                TaskStatus::InProgress
            } else {
                TaskStatus::Pending
            }
        }
        s => s,
    };
    if derived == task.status {
        return false;
    }
    task.status = derived;
    task.updated_at = now;
    true
}

/// Mark every pending/in-progress task past its due date as overdue.
///
/// Returns only the number of tasks that changed, so a second pass returns 0.
pub fn mark_overdue_sweep(tasks: &mut [Task], now: DateTime<Utc>) -> usize {
    let mut changed = 0;
    for t in tasks.iter_mut() {
        let open = matches!(t.status, TaskStatus::Pending | TaskStatus::InProgress);
        if open && is_past_due(t, now) {
            t.status = TaskStatus::Overdue;
            t.updated_at = now;
            changed += 1;
        }
    }
    changed
}

/// `user_id`'s top-level tasks a dashboard should show for `today` (local to `tz`).
///
/// Subtasks never show up here. Order: overdue first, then earliest due, then highest
/// priority.
pub fn todays_workable<'a>(
    tasks: &'a [Task],
    user_id: &str,
    today: NaiveDate,
    tz: Tz,
) -> Vec<&'a Task> {
    let mut out: Vec<&Task> = tasks
        .iter()
        .filter(|t| t.user_id == user_id)
        .filter(|t| !t.is_subtask() && !t.status.is_terminal())
        .filter(|t| {
            t.status == TaskStatus::Overdue
                || t.category == Category::Daily
                || t
                    .due_date
                    .is_some_and(|due| due.with_timezone(&tz).date_naive() <= today)
        })
        .collect();

    out.sort_by(|a, b| {
        let a_over = a.status == TaskStatus::Overdue;
        let b_over = b.status == TaskStatus::Overdue;
        b_over
            .cmp(&a_over)
            .then_with(|| match (a.due_date, b.due_date) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
            .then_with(|| b.priority.cmp(&a.priority))
    });
    out
}

/// Fresh pending copy of a completed recurring task, due at its next slot on the
/// local calendar of `tz`.
pub fn next_occurrence(
    task: &Task,
    id: impl Into<String>,
    now: DateTime<Utc>,
    tz: Tz,
) -> Option<Task> {
    let rec = task.recurrence.as_ref()?;
    rec.validate().ok()?;
    let mut due = rec.next_due(task.due_date?, tz)?;
    // Completed late: skip slots that are already behind us.
    while due < now {
        due = rec.next_due(due, tz)?;
    }

    let mut next = Task::new(id, task.user_id.clone(), task.title.clone(), now);
    next.parent_task_id = task.parent_task_id.clone();
    next.description = task.description.clone();
    next.category = task.category;
    next.priority = task.priority;
    next.difficulty = task.difficulty;
    next.recurrence = task.recurrence.clone();
    next.color = task.color.clone();
    next.due_date = Some(due);
    next.refreeze_reward();
    Some(next)
}
