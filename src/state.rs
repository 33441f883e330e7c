//! Task state derived from marker files.
//!
//! A marker is a file whose presence alone carries meaning. [`TaskState::derive`]
//! is the only place that turns marker predicates into a state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

pub const ACTIVE: &str = "ACTIVE";
pub const PID: &str = "PID";
pub const SUCCESS: &str = "SUCCESS";
pub const FAILED: &str = "FAILED";

/// Presence of each marker file in a task directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Markers {
    pub active: bool,
    pub pid: bool,
    pub success: bool,
    pub failed: bool,
}

impl Markers {
    pub fn read(task_dir: &Path) -> Self {
        Self {
            active: task_dir.join(ACTIVE).is_file(),
            pid: task_dir.join(PID).is_file(),
            success: task_dir.join(SUCCESS).is_file(),
            failed: task_dir.join(FAILED).is_file(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    /// Directory and script exist, never queued
    Fresh,
    Queued,
    Running,
    Success,
    Failed,
    /// Both terminal markers present
    Invalid,
}

impl TaskState {
    pub fn derive(m: Markers) -> Self {
        match (m.success, m.failed) {
            (true, true) => TaskState::Invalid,
            (true, false) => TaskState::Success,
            (false, true) => TaskState::Failed,
            (false, false) if m.pid => TaskState::Running,
            (false, false) if m.active => TaskState::Queued,
            (false, false) => TaskState::Fresh,
        }
    }

    /// Any terminal marker is present
    pub fn is_finished(self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failed | TaskState::Invalid)
    }

    pub fn is_failed(self) -> bool {
        matches!(self, TaskState::Failed | TaskState::Invalid)
    }

    pub fn is_successful(self) -> bool {
        matches!(self, TaskState::Success | TaskState::Invalid)
    }
}

/// Active means an ACTIVE marker without any terminal marker.
pub fn is_active(m: Markers) -> bool {
    m.active && !TaskState::derive(m).is_finished()
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Fresh => "fresh",
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::Success => "success",
            TaskState::Failed => "failed",
            TaskState::Invalid => "invalid",
        };
        f.pad(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn markers(active: bool, pid: bool, success: bool, failed: bool) -> Markers {
        Markers { active, pid, success, failed }
    }

    #[test]
    fn test_derive_lifecycle() {
        assert_eq!(TaskState::derive(markers(false, false, false, false)), TaskState::Fresh);
        assert_eq!(TaskState::derive(markers(true, false, false, false)), TaskState::Queued);
        assert_eq!(TaskState::derive(markers(true, true, false, false)), TaskState::Running);
        assert_eq!(TaskState::derive(markers(false, false, true, false)), TaskState::Success);
        assert_eq!(TaskState::derive(markers(false, false, false, true)), TaskState::Failed);
    }

    #[test]
    fn test_terminal_markers_win() {
        // A stale ACTIVE next to a terminal marker does not make the task active
        let m = markers(true, false, false, true);
        assert_eq!(TaskState::derive(m), TaskState::Failed);
        assert!(!is_active(m));
    }

    #[test]
    fn test_both_terminal_markers_is_invalid() {
        let state = TaskState::derive(markers(false, false, true, true));
        assert_eq!(state, TaskState::Invalid);
        assert!(state.is_finished());
        assert!(state.is_failed());
    }

    #[test]
    fn test_is_active() {
        assert!(is_active(markers(true, false, false, false)));
        assert!(is_active(markers(true, true, false, false)));
        assert!(!is_active(markers(false, true, false, false)));
        assert!(!is_active(markers(true, false, true, false)));
    }

    #[test]
    fn test_read_markers() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join(ACTIVE), "").unwrap();
        std::fs::write(temp_dir.path().join(PID), "123").unwrap();

        let m = Markers::read(temp_dir.path());
        assert_eq!(m, markers(true, true, false, false));
        assert_eq!(TaskState::derive(m), TaskState::Running);
    }
}
