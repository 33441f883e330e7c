//! Error taxonomy for the execution engine.
//!
//! Pipeline outcomes (a script exiting non-zero, or being killed by a signal)
//! are deliberately absent here: they are recorded in markers and the status
//! log, see [`crate::service::supervisor::Outcome`].

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Missing or unusable configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An operation referenced a task id with no task directory.
    #[error("Task with id {0} does not exist")]
    NotFound(String),

    #[error("Task {id}: {reason}")]
    InvalidState { id: String, reason: String },

    /// Rejected caller input (unknown target, bad variable name, ...).
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        EngineError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn invalid_state(id: &str, reason: impl Into<String>) -> Self {
        EngineError::InvalidState {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = EngineError::NotFound("123".to_string());
        assert_eq!(err.to_string(), "Task with id 123 does not exist");

        let err = EngineError::invalid_state("42", "already finished");
        assert_eq!(err.to_string(), "Task 42: already finished");

        let err = EngineError::io(
            Path::new("/tmp/x"),
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().starts_with("IO error at /tmp/x"));
    }
}
