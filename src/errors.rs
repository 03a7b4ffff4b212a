//! Typed error hierarchy for vigil.
//!
//! Three top-level enums cover the three subsystems:
//! - `StoreError`: plan document reads and writes
//! - `AgentError`: reviewer/fixer session failures
//! - `QaError`: failures that end a QA validation run

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the plan document store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read plan document at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write plan document at {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize plan document: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Iteration {iteration} already recorded (last recorded iteration is {last})")]
    DuplicateIteration { iteration: u32, last: u32 },
}

/// Errors from a single reviewer or fixer session.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Failed to spawn Claude process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("Failed to write prompt file at {path}: {source}")]
    PromptWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Agent session timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Claude exited with non-zero code {exit_code}")]
    NonZeroExit { exit_code: i32 },

    #[error("Agent reported an error: {0}")]
    Reported(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors that end a QA validation run.
#[derive(Debug, Error)]
pub enum QaError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("Failed to write {artifact} at {path}: {source}")]
    ArtifactWriteFailed {
        artifact: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Another QA run holds the lock at {path}")]
    Locked { path: PathBuf },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_duplicate_iteration_carries_numbers() {
        let err = StoreError::DuplicateIteration {
            iteration: 3,
            last: 4,
        };
        match &err {
            StoreError::DuplicateIteration { iteration, last } => {
                assert_eq!(*iteration, 3);
                assert_eq!(*last, 4);
            }
            _ => panic!("Expected DuplicateIteration"),
        }
        assert!(err.to_string().contains("Iteration 3"));
    }

    #[test]
    fn agent_error_spawn_failed_is_matchable() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "claude not found");
        let err = AgentError::SpawnFailed(io_err);
        match &err {
            AgentError::SpawnFailed(e) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            _ => panic!("Expected SpawnFailed variant"),
        }
    }

    #[test]
    fn agent_error_timeout_mentions_seconds() {
        let err = AgentError::Timeout { secs: 90 };
        assert!(err.to_string().contains("90s"));
    }

    #[test]
    fn qa_error_converts_from_store_error() {
        let inner = StoreError::DuplicateIteration {
            iteration: 1,
            last: 1,
        };
        let qa_err: QaError = inner.into();
        assert!(matches!(
            qa_err,
            QaError::Store(StoreError::DuplicateIteration { .. })
        ));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&AgentError::Reported("x".into()));
        assert_std_error(&QaError::Locked {
            path: PathBuf::from("/tmp/.qa.lock"),
        });
    }
}
