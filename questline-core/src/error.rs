//! Engine error taxonomy.

use crate::task::TaskStatus;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Bad input, rejected before any state was touched. Safe to retry once fixed.
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    /// The task was already completed; nothing was awarded a second time.
    #[error("task {task_id} is already completed")]
    AlreadyCompleted { task_id: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The user record changed underneath a read-modify-write. Re-read and rerun the
    /// whole pipeline.
    #[error("concurrent update for user {user_id}: expected version {expected}, found {found}")]
    ConcurrencyConflict {
        user_id: String,
        expected: u64,
        found: u64,
    },

    /// The stored task no longer matches the copy a command read; someone else wrote it.
    #[error("task {task_id} changed since it was read")]
    TaskConflict { task_id: String },

    #[error("task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    /// Whether rerunning the same command from a fresh read can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. } | Self::TaskConflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_input() {
        let e = EngineError::validation("title", "must not be empty");
        assert_eq!(e.to_string(), "invalid title: must not be empty");

        let e = EngineError::not_found("task", "t-9");
        assert_eq!(e.to_string(), "task not found: t-9");

        let e = EngineError::InvalidTransition {
            task_id: "t1".into(),
            from: TaskStatus::Cancelled,
            to: TaskStatus::InProgress,
        };
        assert_eq!(e.to_string(), "task t1 cannot move from cancelled to in-progress");
    }

    #[test]
    fn only_conflicts_are_retryable() {
        let conflict = EngineError::ConcurrencyConflict {
            user_id: "u1".into(),
            expected: 3,
            found: 4,
        };
        assert!(conflict.is_retryable());
        assert!(EngineError::TaskConflict { task_id: "t1".into() }.is_retryable());
        assert!(!EngineError::AlreadyCompleted { task_id: "t1".into() }.is_retryable());
    }
}
