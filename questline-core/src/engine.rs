//! QuestEngine: the command surface over the pure components.
//!
//! Each command reads through the store, runs the pure transitions, and writes back one
//! [`ProgressCommit`]. Completion pipeline:
//!
//! 1) lifecycle::complete (status + reward sizing)
//! 2) progression::apply_reward (task reward, possibly a level-up)
//! 3) achievements::evaluate (tasks_completed, then level/xp chains; each unlock is its
//!    own reward application)
//! 4) store.commit (user version and task row checked; a conflict reruns 1-4 from a
//!    fresh read)

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::achievements::{
    evaluate, merge_progress, Achievement, RequirementType, UserAchievementProgress,
};
use crate::error::{EngineError, Result};
use crate::lifecycle::{self, CompletionAward, NewTask, TaskPatch};
use crate::progression::{
    apply_reward, record_completion, LevelHistoryEntry, RewardSource, RewardTransaction,
    UserProgressionState,
};
use crate::rewards::Reward;
use crate::store::{ProgressCommit, ProgressStore};
use crate::streak::record_activity;
use crate::task::Task;

/// How many times a command reruns after a concurrency conflict before giving up.
pub const MAX_COMMIT_ATTEMPTS: usize = 3;

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnlockedAchievement {
    pub achievement: Achievement,
    pub reward: Reward,
    pub unlocked_at: DateTime<Utc>,
}

/// Event payload for a completion: enough to render reward, level-up and achievement
/// toasts without another read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionResult {
    pub task: Task,
    /// Task XP including the streak bonus. Achievement rewards are listed separately.
    pub xp_gained: u64,
    pub gold_gained: u64,
    pub base_xp: u64,
    pub bonus_xp: u64,
    pub multiplier: f64,
    pub leveled_up: bool,
    pub level_ups: Vec<LevelHistoryEntry>,
    pub achievements_unlocked: Vec<UnlockedAchievement>,
    pub next_occurrence: Option<Task>,
    pub user: UserProgressionState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckInResult {
    pub streak_changed: bool,
    pub leveled_up: bool,
    pub level_ups: Vec<LevelHistoryEntry>,
    pub achievements_unlocked: Vec<UnlockedAchievement>,
    pub user: UserProgressionState,
}

/// A computed but not yet written completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionPlan {
    pub commit: ProgressCommit,
    pub result: CompletionResult,
}

#[derive(Debug, Default)]
struct Settlement {
    level_ups: Vec<LevelHistoryEntry>,
    transactions: Vec<RewardTransaction>,
    unlocked: Vec<UnlockedAchievement>,
}

pub struct QuestEngine<S: ProgressStore, C: Clock = SystemClock> {
    store: S,
    clock: C,
    tz: Tz,
}

impl<S: ProgressStore, C: Clock> QuestEngine<S, C> {
    pub fn new(store: S, clock: C) -> Self {
        Self {
            store,
            clock,
            tz: Tz::UTC,
        }
    }

    /// Timezone used to decide what "today" means.
    pub fn with_timezone(mut self, tz: Tz) -> Self {
        self.tz = tz;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn today(&self) -> NaiveDate {
        crate::time::local_day(self.now(), self.tz)
    }

    fn load_task(&self, id: &str) -> Result<Task> {
        self.store
            .load_task(id)?
            .ok_or_else(|| EngineError::not_found("task", id))
    }

    /// Stored state, or a fresh level-1 record for a user never seen.
    pub fn user_state(&self, user_id: &str) -> Result<UserProgressionState> {
        Ok(self
            .store
            .load_user_progression_state(user_id)?
            .unwrap_or_else(|| UserProgressionState::new(user_id)))
    }

    pub fn create_task(&self, user_id: &str, input: NewTask) -> Result<Task> {
        let now = self.now();
        input.check_due_date(now)?;

        let parent = match &input.parent_task_id {
            Some(pid) => self.store.load_task(pid)?,
            None => None,
        };
        let task = lifecycle::create(
            uuid::Uuid::new_v4().to_string(),
            user_id,
            input,
            parent.as_ref(),
            now,
        )?;
        self.store.save_task(&task)?;

        info!(
            task_id = %task.id,
            user_id,
            xp = task.xp_reward,
            gold = task.gold_reward,
            "quest created"
        );
        Ok(task)
    }

    pub fn start_task(&self, task_id: &str) -> Result<Task> {
        let task = self.rewrite_task(task_id, lifecycle::start)?.1;
        debug!(task_id, status = %task.status, "quest started");
        Ok(task)
    }

    pub fn cancel_task(&self, task_id: &str) -> Result<Task> {
        let task = self.rewrite_task(task_id, lifecycle::cancel)?.1;
        info!(task_id, "quest cancelled");
        Ok(task)
    }

    pub fn update_task(&self, task_id: &str, patch: TaskPatch) -> Result<Task> {
        let (before, task) = self.rewrite_task(task_id, |t, now| {
            lifecycle::apply_patch(t, patch.clone(), now)
        })?;
        if task.xp_reward != before.xp_reward {
            debug!(task_id, xp = task.xp_reward, gold = task.gold_reward, "reward refrozen");
        }
        Ok(task)
    }

    /// Read, transform, and write back a task only if nobody wrote it in between.
    /// Returns the row as read and as written.
    fn rewrite_task(
        &self,
        task_id: &str,
        transition: impl Fn(&Task, DateTime<Utc>) -> Result<Task>,
    ) -> Result<(Task, Task)> {
        self.with_retry(task_id, || {
            let before = self.load_task(task_id)?;
            let after = transition(&before, self.now())?;
            if after != before {
                self.store.replace_task(&before, &after)?;
            }
            Ok((before, after))
        })
    }

    /// Delete a task and its subtasks. Returns the deleted ids, the task's own last.
    pub fn delete_task(&self, task_id: &str) -> Result<Vec<String>> {
        let task = self.load_task(task_id)?;
        let mut deleted: Vec<String> = self
            .store
            .list_tasks(Some(&task.user_id))?
            .into_iter()
            .filter(|t| t.parent_task_id.as_deref() == Some(task_id))
            .map(|t| t.id)
            .collect();
        for id in &deleted {
            self.store.delete_task(id)?;
        }
        self.store.delete_task(task_id)?;
        deleted.push(task.id);

        info!(task_id, removed = deleted.len(), "quest deleted");
        Ok(deleted)
    }

    /// Mark past-due open tasks overdue. Returns how many changed on this call.
    ///
    /// A task written by someone else since the read is left alone; the next sweep sees
    /// its new state.
    pub fn sweep_overdue(&self, now: DateTime<Utc>) -> Result<usize> {
        let before = self.store.list_tasks(None)?;
        let mut after = before.clone();
        lifecycle::mark_overdue_sweep(&mut after, now);

        let mut changed = 0;
        for (old, new) in before.iter().zip(&after) {
            if old.status == new.status {
                continue;
            }
            match self.store.replace_task(old, new) {
                Ok(()) => changed += 1,
                Err(EngineError::TaskConflict { task_id }) => {
                    debug!(task_id = %task_id, "task changed during sweep, skipped");
                }
                Err(e) => return Err(e),
            }
        }
        if changed > 0 {
            info!(changed, "overdue sweep");
        }
        Ok(changed)
    }

    pub fn list_tasks(&self, user_id: &str) -> Result<Vec<Task>> {
        self.store.list_tasks(Some(user_id))
    }

    pub fn todays_tasks(&self, user_id: &str) -> Result<Vec<Task>> {
        let tasks = self.store.list_tasks(Some(user_id))?;
        Ok(lifecycle::todays_workable(&tasks, user_id, self.today(), self.tz)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Catalog joined with the user's progress (zero rows for untouched achievements).
    pub fn achievements(
        &self,
        user_id: &str,
    ) -> Result<Vec<(Achievement, UserAchievementProgress)>> {
        let progress = self.store.load_user_achievement_progress(user_id)?;
        Ok(self
            .store
            .load_achievement_catalog()?
            .into_iter()
            .map(|a| {
                let row = progress
                    .iter()
                    .find(|p| p.achievement_id == a.id)
                    .cloned()
                    .unwrap_or_else(|| UserAchievementProgress::new(user_id, a.id.clone()));
                (a, row)
            })
            .collect())
    }

    /// Run the whole completion pipeline for `task_id`.
    ///
    /// Fails with [`EngineError::AlreadyCompleted`] on a second call for the same task.
    pub fn complete_task(&self, task_id: &str) -> Result<CompletionResult> {
        self.with_retry(task_id, || {
            let plan = self.plan_completion(task_id)?;
            self.commit_completion(plan)
        })
    }

    /// Steps 1-3 of the pipeline, against a fresh read. Writes nothing.
    pub fn plan_completion(&self, task_id: &str) -> Result<CompletionPlan> {
        let now = self.now();
        let task = self.load_task(task_id)?;
        let user = self.user_state(&task.user_id)?;
        let expected_version = user.version;

        let (done, award) = lifecycle::complete(&task, &user, now)?;
        debug!(
            task_id,
            base_xp = award.base.xp,
            bonus_xp = award.bonus_xp,
            gold = award.total.gold,
            "reward computed"
        );

        let counted = record_completion(&user);
        let ledger = apply_reward(
            &counted,
            award.total,
            RewardSource::Task {
                task_id: done.id.clone(),
            },
            now,
        );

        let mut settlement = Settlement::default();
        settlement.level_ups.extend(ledger.level_history);
        settlement.transactions.push(ledger.transaction);

        let catalog = self.store.load_achievement_catalog()?;
        let mut progress = self.store.load_user_achievement_progress(&task.user_id)?;
        let touched_before = progress.clone();
        let state = self.settle_achievements(
            ledger.state,
            vec![
                (RequirementType::TasksCompleted, counted.total_tasks_completed),
                (RequirementType::LevelReached, 0),
                (RequirementType::TotalXp, 0),
            ],
            &catalog,
            &mut progress,
            now,
            &mut settlement,
        );

        let next_occurrence =
            lifecycle::next_occurrence(&done, uuid::Uuid::new_v4().to_string(), now, self.tz);

        let mut tasks = vec![done.clone()];
        tasks.extend(next_occurrence.clone());

        let commit = ProgressCommit {
            user_id: task.user_id.clone(),
            expected_version,
            expected_task: Some(task.clone()),
            user_state: state.clone(),
            tasks,
            level_history: settlement.level_ups.clone(),
            transactions: settlement.transactions,
            achievement_progress: changed_rows(&touched_before, progress),
        };

        let result = CompletionResult {
            task: done,
            xp_gained: award.total.xp,
            gold_gained: award.total.gold,
            base_xp: award.base.xp,
            bonus_xp: award.bonus_xp,
            multiplier: award.multiplier,
            leveled_up: !settlement.level_ups.is_empty(),
            level_ups: settlement.level_ups,
            achievements_unlocked: settlement.unlocked,
            next_occurrence,
            user: state,
        };

        Ok(CompletionPlan { commit, result })
    }

    /// Step 4: write a plan. A stale plan fails with a concurrency conflict.
    pub fn commit_completion(&self, plan: CompletionPlan) -> Result<CompletionResult> {
        let CompletionPlan { commit, mut result } = plan;
        result.user = self.store.commit(commit)?;

        info!(
            task_id = %result.task.id,
            xp = result.xp_gained,
            gold = result.gold_gained,
            level = result.user.level,
            "quest completed"
        );
        for lv in &result.level_ups {
            info!(user_id = %lv.user_id, from = lv.previous_level, to = lv.new_level, "level up");
        }
        for a in &result.achievements_unlocked {
            info!(
                achievement = %a.achievement.id,
                xp = a.reward.xp,
                gold = a.reward.gold,
                "achievement unlocked"
            );
        }
        Ok(result)
    }

    /// Record a day of activity, then settle streak achievements.
    pub fn check_in(&self, user_id: &str, day: NaiveDate) -> Result<CheckInResult> {
        self.with_retry(user_id, || {
            let now = self.now();
            let user = self.user_state(user_id)?;
            let expected_version = user.version;
            let update = record_activity(&user, day);

            let catalog = self.store.load_achievement_catalog()?;
            let mut progress = self.store.load_user_achievement_progress(user_id)?;
            let touched_before = progress.clone();
            let mut settlement = Settlement::default();

            let state = if update.changed {
                let streak = u64::from(update.state.current_streak);
                self.settle_achievements(
                    update.state,
                    vec![(RequirementType::StreakDays, streak)],
                    &catalog,
                    &mut progress,
                    now,
                    &mut settlement,
                )
            } else {
                update.state
            };

            let commit = ProgressCommit {
                user_id: user_id.to_string(),
                expected_version,
                expected_task: None,
                user_state: state,
                tasks: vec![],
                level_history: settlement.level_ups.clone(),
                transactions: settlement.transactions,
                achievement_progress: changed_rows(&touched_before, progress),
            };
            let saved = self.store.commit(commit)?;

            if update.changed {
                info!(user_id, streak = saved.current_streak, "streak updated");
            }
            for a in &settlement.unlocked {
                info!(achievement = %a.achievement.id, "achievement unlocked");
            }

            Ok(CheckInResult {
                streak_changed: update.changed,
                leveled_up: !settlement.level_ups.is_empty(),
                level_ups: settlement.level_ups,
                achievements_unlocked: settlement.unlocked,
                user: saved,
            })
        })
    }

    fn with_retry<T>(&self, what: &str, mut run: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 1;
        loop {
            match run() {
                Err(e) if e.is_retryable() && attempt < MAX_COMMIT_ATTEMPTS => {
                    warn!(
                        target_id = what,
                        attempt,
                        error = %e,
                        "write rejected, rerunning from a fresh read"
                    );
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Evaluate `triggers`, pay each new unlock through the ledger, and keep going while
    /// those payments move level/XP far enough to unlock more. Level and XP triggers
    /// read the live state, so a `0` placeholder value is fine for them.
    fn settle_achievements(
        &self,
        mut state: UserProgressionState,
        triggers: Vec<(RequirementType, u64)>,
        catalog: &[Achievement],
        progress: &mut Vec<UserAchievementProgress>,
        now: DateTime<Utc>,
        out: &mut Settlement,
    ) -> UserProgressionState {
        let mut pending = triggers;
        while !pending.is_empty() {
            let mut paid_any = false;
            for (requirement, value) in pending.drain(..) {
                let value = match requirement {
                    RequirementType::LevelReached => u64::from(state.level),
                    RequirementType::TotalXp => state.total_xp,
                    _ => value,
                };
                let updates = evaluate(&state.user_id, requirement, value, catalog, progress, now);
                merge_progress(progress, &updates);

                for u in updates.iter().filter(|u| u.newly_unlocked) {
                    let Some(achievement) = catalog.iter().find(|a| a.id == u.achievement_id())
                    else {
                        continue;
                    };
                    let ledger = apply_reward(
                        &state,
                        u.reward,
                        RewardSource::Achievement {
                            achievement_id: achievement.id.clone(),
                        },
                        now,
                    );
                    state = ledger.state;
                    out.level_ups.extend(ledger.level_history);
                    out.transactions.push(ledger.transaction);
                    out.unlocked.push(UnlockedAchievement {
                        achievement: achievement.clone(),
                        reward: u.reward,
                        unlocked_at: now,
                    });
                    paid_any |= u.reward.xp > 0;
                }
            }
            if paid_any {
                pending.push((RequirementType::LevelReached, 0));
                pending.push((RequirementType::TotalXp, 0));
            }
        }
        state
    }
}

/// Rows that differ from what was read; only those are written.
fn changed_rows(
    before: &[UserAchievementProgress],
    after: Vec<UserAchievementProgress>,
) -> Vec<UserAchievementProgress> {
    after.into_iter().filter(|row| !before.contains(row)).collect()
}

/// Reward sizing for a task as it stands, without completing it. Handy for previews.
pub fn preview_award(task: &Task, user: &UserProgressionState) -> Option<CompletionAward> {
    lifecycle::complete(task, user, task.updated_at)
        .ok()
        .map(|(_, award)| award)
}
