use anyhow::{Context, Result};
use fs2::FileExt;
use questline_core::{
    Achievement, EngineError, LevelHistoryEntry, MemoryState, ProgressCommit, ProgressStore,
    RewardTransaction, Task, UserAchievementProgress, UserProgressionState,
};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn questline_home() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("QUESTLINE_HOME") {
        return Ok(PathBuf::from(dir));
    }
    let home = std::env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home).join(".questline"))
}

pub fn ensure_questline_home() -> Result<PathBuf> {
    let dir = questline_home()?;
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    Ok(dir)
}

pub fn store_path() -> Result<PathBuf> {
    Ok(ensure_questline_home()?.join("store.json"))
}

fn storage(e: anyhow::Error) -> EngineError {
    EngineError::storage(format!("{e:#}"))
}

/// `ProgressStore` over one JSON document.
///
/// Every write holds an exclusive lock on a sidecar lock file, rereads the document,
/// and replaces it via temp file + rename, so concurrent CLI processes serialize and a
/// failed commit leaves the previous document in place.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_file(&self) -> Result<File> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let lock_path = self.path.with_extension("json.lock");
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("open {}", lock_path.display()))
    }

    fn read_doc(&self) -> Result<MemoryState> {
        if !self.path.exists() {
            return Ok(MemoryState::with_default_catalog());
        }
        let s = fs::read_to_string(&self.path)
            .with_context(|| format!("read {}", self.path.display()))?;
        serde_json::from_str(&s).with_context(|| format!("parse {}", self.path.display()))
    }

    fn write_doc(&self, doc: &MemoryState) -> Result<()> {
        let json = serde_json::to_string_pretty(doc).context("serialize store")?;
        let tmp = self.path.with_extension("json.tmp");
        let mut f = File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
        f.write_all(json.as_bytes())
            .with_context(|| format!("write {}", tmp.display()))?;
        f.sync_all().context("sync store")?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("rename into {}", self.path.display()))?;
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&MemoryState) -> T) -> questline_core::Result<T> {
        let lock = self.lock_file().map_err(storage)?;
        lock.lock_shared()
            .context("acquire store lock")
            .map_err(storage)?;
        let doc = self.read_doc().map_err(storage)?;
        Ok(f(&doc))
    }

    fn update<T>(
        &self,
        f: impl FnOnce(&mut MemoryState) -> questline_core::Result<T>,
    ) -> questline_core::Result<T> {
        let lock = self.lock_file().map_err(storage)?;
        lock.lock_exclusive()
            .context("acquire store lock")
            .map_err(storage)?;
        let mut doc = self.read_doc().map_err(storage)?;
        let out = f(&mut doc)?;
        self.write_doc(&doc).map_err(storage)?;
        Ok(out)
    }
}

impl ProgressStore for JsonFileStore {
    fn load_task(&self, id: &str) -> questline_core::Result<Option<Task>> {
        self.read(|d| d.tasks.get(id).cloned())
    }

    fn save_task(&self, task: &Task) -> questline_core::Result<()> {
        self.update(|d| {
            d.tasks.insert(task.id.clone(), task.clone());
            Ok(())
        })
    }

    fn replace_task(&self, expected: &Task, next: &Task) -> questline_core::Result<()> {
        self.update(|d| d.replace_task(expected, next.clone()))
    }

    fn delete_task(&self, id: &str) -> questline_core::Result<()> {
        self.update(|d| {
            d.tasks.remove(id);
            Ok(())
        })
    }

    fn list_tasks(&self, user_id: Option<&str>) -> questline_core::Result<Vec<Task>> {
        self.read(|d| d.sorted_tasks(user_id))
    }

    fn load_user_progression_state(
        &self,
        user_id: &str,
    ) -> questline_core::Result<Option<UserProgressionState>> {
        self.read(|d| d.users.get(user_id).cloned())
    }

    fn save_user_progression_state(
        &self,
        state: &UserProgressionState,
        expected_version: u64,
    ) -> questline_core::Result<u64> {
        self.update(|d| {
            let commit = ProgressCommit {
                user_id: state.user_id.clone(),
                expected_version,
                expected_task: None,
                user_state: state.clone(),
                tasks: vec![],
                level_history: vec![],
                transactions: vec![],
                achievement_progress: vec![],
            };
            d.apply_commit(commit).map(|s| s.version)
        })
    }

    fn append_level_history(&self, entry: &LevelHistoryEntry) -> questline_core::Result<()> {
        self.update(|d| {
            d.level_history.push(entry.clone());
            Ok(())
        })
    }

    fn level_history(&self, user_id: &str) -> questline_core::Result<Vec<LevelHistoryEntry>> {
        self.read(|d| {
            d.level_history
                .iter()
                .filter(|e| e.user_id == user_id)
                .cloned()
                .collect()
        })
    }

    fn append_transaction(&self, tx: &RewardTransaction) -> questline_core::Result<()> {
        self.update(|d| {
            d.transactions.push(tx.clone());
            Ok(())
        })
    }

    fn load_achievement_catalog(&self) -> questline_core::Result<Vec<Achievement>> {
        self.read(|d| d.catalog.clone())
    }

    fn load_user_achievement_progress(
        &self,
        user_id: &str,
    ) -> questline_core::Result<Vec<UserAchievementProgress>> {
        self.read(|d| d.achievement_progress.get(user_id).cloned().unwrap_or_default())
    }

    fn save_user_achievement_progress(
        &self,
        entries: &[UserAchievementProgress],
    ) -> questline_core::Result<()> {
        self.update(|d| {
            for e in entries {
                let rows = d.achievement_progress.entry(e.user_id.clone()).or_default();
                match rows.iter_mut().find(|r| r.achievement_id == e.achievement_id) {
                    Some(row) => *row = e.clone(),
                    None => rows.push(e.clone()),
                }
            }
            Ok(())
        })
    }

    fn commit(&self, commit: ProgressCommit) -> questline_core::Result<UserProgressionState> {
        self.update(|d| d.apply_commit(commit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use questline_core::{FixedClock, NewTask, QuestEngine, TaskStatus};

    #[test]
    fn missing_file_starts_with_default_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("store.json"));
        assert!(!store.load_achievement_catalog().unwrap().is_empty());
        assert!(store.list_tasks(None).unwrap().is_empty());
    }

    #[test]
    fn completion_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap();

        let engine = QuestEngine::new(JsonFileStore::open(&path), FixedClock(now));
        let t = engine.create_task("u1", NewTask::titled("Run 5k").difficulty(4)).unwrap();
        engine.complete_task(&t.id).unwrap();

        let reopened = JsonFileStore::open(&path);
        let task = reopened.load_task(&t.id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        let user = reopened.load_user_progression_state("u1").unwrap().unwrap();
        assert_eq!(user.total_tasks_completed, 1);
        assert_eq!(user.version, 1);
        assert!(user.is_consistent());
    }

    #[test]
    fn sweep_from_another_process_cannot_reopen_a_completed_task() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap();

        let engine = QuestEngine::new(JsonFileStore::open(&path), FixedClock(now));
        let due = now + chrono::Duration::hours(1);
        let t = engine
            .create_task("u1", NewTask::titled("Taxes").difficulty(5).due(due))
            .unwrap();

        // A second process read the task while it was still pending...
        let other = JsonFileStore::open(&path);
        let stale = other.load_task(&t.id).unwrap().unwrap();
        engine.complete_task(&t.id).unwrap();

        // ...and now tries to mark it overdue.
        let overdue = stale.clone().with_status(TaskStatus::Overdue);
        let err = other.replace_task(&stale, &overdue).unwrap_err();
        assert!(err.is_retryable());

        let stored = JsonFileStore::open(&path).load_task(&t.id).unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
    }

    #[test]
    fn stale_commit_is_rejected_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("store.json"));

        let state = UserProgressionState::new("u1");
        assert_eq!(store.save_user_progression_state(&state, 0).unwrap(), 1);
        let err = store.save_user_progression_state(&state, 0).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(
            store.load_user_progression_state("u1").unwrap().unwrap().version,
            1
        );
    }
}
