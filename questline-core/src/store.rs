//! Persistence collaborator.
//!
//! The engine never does IO itself; it reads through [`ProgressStore`] and hands back a
//! [`ProgressCommit`] that the store must apply all-or-nothing. Atomicity against
//! concurrent completions for the same user is an optimistic version check on the user
//! record: a commit built from a stale read is rejected with
//! [`EngineError::ConcurrencyConflict`] and nothing is written.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::achievements::{default_catalog, Achievement, UserAchievementProgress};
use crate::error::{EngineError, Result};
use crate::progression::{LevelHistoryEntry, RewardTransaction, UserProgressionState};
use crate::task::Task;

/// Everything one pipeline run writes, applied as a unit.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressCommit {
    pub user_id: String,
    /// Version of the user record the pipeline read. 0 for a user never saved.
    pub expected_version: u64,
    /// The task row the pipeline read, if it acted on one. Must still be stored as is.
    pub expected_task: Option<Task>,
    pub user_state: UserProgressionState,
    /// Upserts.
    pub tasks: Vec<Task>,
    pub level_history: Vec<LevelHistoryEntry>,
    pub transactions: Vec<RewardTransaction>,
    pub achievement_progress: Vec<UserAchievementProgress>,
}

pub trait ProgressStore {
    fn load_task(&self, id: &str) -> Result<Option<Task>>;
    /// Insert a new task.
    fn save_task(&self, task: &Task) -> Result<()>;
    /// Overwrite `expected` with `next`, but only if the stored row still equals
    /// `expected`. Fails with [`EngineError::TaskConflict`] otherwise.
    fn replace_task(&self, expected: &Task, next: &Task) -> Result<()>;
    fn delete_task(&self, id: &str) -> Result<()>;
    /// All tasks, or only one user's.
    fn list_tasks(&self, user_id: Option<&str>) -> Result<Vec<Task>>;

    fn load_user_progression_state(&self, user_id: &str) -> Result<Option<UserProgressionState>>;
    /// Compare-and-swap write. Returns the new version.
    fn save_user_progression_state(
        &self,
        state: &UserProgressionState,
        expected_version: u64,
    ) -> Result<u64>;

    fn append_level_history(&self, entry: &LevelHistoryEntry) -> Result<()>;
    fn level_history(&self, user_id: &str) -> Result<Vec<LevelHistoryEntry>>;
    fn append_transaction(&self, tx: &RewardTransaction) -> Result<()>;

    fn load_achievement_catalog(&self) -> Result<Vec<Achievement>>;
    fn load_user_achievement_progress(&self, user_id: &str) -> Result<Vec<UserAchievementProgress>>;
    fn save_user_achievement_progress(&self, entries: &[UserAchievementProgress]) -> Result<()>;

    /// Apply a whole pipeline's writes atomically, or none of them.
    fn commit(&self, commit: ProgressCommit) -> Result<UserProgressionState>;
}

/// Plain tables. Backs [`InMemoryStore`] and doubles as a serializable snapshot document.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MemoryState {
    pub tasks: HashMap<String, Task>,
    pub users: HashMap<String, UserProgressionState>,
    pub level_history: Vec<LevelHistoryEntry>,
    pub transactions: Vec<RewardTransaction>,
    pub catalog: Vec<Achievement>,
    /// user_id -> rows
    pub achievement_progress: HashMap<String, Vec<UserAchievementProgress>>,
}

impl MemoryState {
    pub fn with_default_catalog() -> Self {
        Self {
            catalog: default_catalog(),
            ..Self::default()
        }
    }

    fn stored_version(&self, user_id: &str) -> u64 {
        self.users.get(user_id).map(|u| u.version).unwrap_or(0)
    }

    fn check_version(&self, user_id: &str, expected: u64) -> Result<()> {
        let found = self.stored_version(user_id);
        if found != expected {
            return Err(EngineError::ConcurrencyConflict {
                user_id: user_id.to_string(),
                expected,
                found,
            });
        }
        Ok(())
    }

    fn put_user(&mut self, state: &UserProgressionState, expected: u64) -> Result<u64> {
        self.check_version(&state.user_id, expected)?;
        let mut stored = state.clone();
        stored.version = expected + 1;
        self.users.insert(stored.user_id.clone(), stored);
        Ok(expected + 1)
    }

    fn put_progress(&mut self, entries: &[UserAchievementProgress]) {
        for e in entries {
            let rows = self.achievement_progress.entry(e.user_id.clone()).or_default();
            match rows.iter_mut().find(|r| r.achievement_id == e.achievement_id) {
                Some(row) => *row = e.clone(),
                None => rows.push(e.clone()),
            }
        }
    }

    /// Apply a commit in place. Both preconditions are checked before anything is written.
    pub fn apply_commit(&mut self, commit: ProgressCommit) -> Result<UserProgressionState> {
        if commit.user_state.user_id != commit.user_id {
            return Err(EngineError::validation(
                "user_id",
                "commit user does not match its state",
            ));
        }
        self.check_version(&commit.user_id, commit.expected_version)?;
        if let Some(expected) = &commit.expected_task {
            if self.tasks.get(&expected.id) != Some(expected) {
                return Err(EngineError::TaskConflict {
                    task_id: expected.id.clone(),
                });
            }
        }
        let version = self.put_user(&commit.user_state, commit.expected_version)?;
        for t in commit.tasks {
            self.tasks.insert(t.id.clone(), t);
        }
        self.level_history.extend(commit.level_history);
        self.transactions.extend(commit.transactions);
        self.put_progress(&commit.achievement_progress);

        Ok(UserProgressionState {
            version,
            ..commit.user_state
        })
    }

    /// Conditional task write. Nothing is written on a mismatch.
    pub fn replace_task(&mut self, expected: &Task, next: Task) -> Result<()> {
        if next.id != expected.id {
            return Err(EngineError::validation("id", "replacement must keep the task id"));
        }
        if self.tasks.get(&expected.id) != Some(expected) {
            return Err(EngineError::TaskConflict {
                task_id: expected.id.clone(),
            });
        }
        self.tasks.insert(next.id.clone(), next);
        Ok(())
    }

    pub fn sorted_tasks(&self, user_id: Option<&str>) -> Vec<Task> {
        let mut out: Vec<Task> = self
            .tasks
            .values()
            .filter(|t| user_id.is_none_or(|u| t.user_id == u))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }
}

/// Shared, cloneable in-memory store. Clones see the same data, so two engines over
/// clones behave like two app servers over one database.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::from_state(MemoryState::with_default_catalog())
    }

    pub fn with_catalog(catalog: Vec<Achievement>) -> Self {
        Self::from_state(MemoryState {
            catalog,
            ..MemoryState::default()
        })
    }

    pub fn from_state(state: MemoryState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    pub fn snapshot(&self) -> Result<MemoryState> {
        Ok(self.lock()?.clone())
    }

    pub fn transactions(&self, user_id: &str) -> Result<Vec<RewardTransaction>> {
        Ok(self
            .lock()?
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.inner
            .lock()
            .map_err(|_| EngineError::storage("in-memory store lock poisoned"))
    }
}

impl ProgressStore for InMemoryStore {
    fn load_task(&self, id: &str) -> Result<Option<Task>> {
        Ok(self.lock()?.tasks.get(id).cloned())
    }

    fn save_task(&self, task: &Task) -> Result<()> {
        self.lock()?.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    fn replace_task(&self, expected: &Task, next: &Task) -> Result<()> {
        self.lock()?.replace_task(expected, next.clone())
    }

    fn delete_task(&self, id: &str) -> Result<()> {
        self.lock()?.tasks.remove(id);
        Ok(())
    }

    fn list_tasks(&self, user_id: Option<&str>) -> Result<Vec<Task>> {
        Ok(self.lock()?.sorted_tasks(user_id))
    }

    fn load_user_progression_state(&self, user_id: &str) -> Result<Option<UserProgressionState>> {
        Ok(self.lock()?.users.get(user_id).cloned())
    }

    fn save_user_progression_state(
        &self,
        state: &UserProgressionState,
        expected_version: u64,
    ) -> Result<u64> {
        self.lock()?.put_user(state, expected_version)
    }

    fn append_level_history(&self, entry: &LevelHistoryEntry) -> Result<()> {
        self.lock()?.level_history.push(entry.clone());
        Ok(())
    }

    fn level_history(&self, user_id: &str) -> Result<Vec<LevelHistoryEntry>> {
        Ok(self
            .lock()?
            .level_history
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    fn append_transaction(&self, tx: &RewardTransaction) -> Result<()> {
        self.lock()?.transactions.push(tx.clone());
        Ok(())
    }

    fn load_achievement_catalog(&self) -> Result<Vec<Achievement>> {
        Ok(self.lock()?.catalog.clone())
    }

    fn load_user_achievement_progress(
        &self,
        user_id: &str,
    ) -> Result<Vec<UserAchievementProgress>> {
        Ok(self
            .lock()?
            .achievement_progress
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    fn save_user_achievement_progress(&self, entries: &[UserAchievementProgress]) -> Result<()> {
        self.lock()?.put_progress(entries);
        Ok(())
    }

    fn commit(&self, commit: ProgressCommit) -> Result<UserProgressionState> {
        self.lock()?.apply_commit(commit)
    }
}
