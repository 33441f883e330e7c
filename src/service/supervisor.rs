//! Runs a task's launch script as a child process and records the outcome.

use serde::Serialize;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::command::SCRIPT_FILE;
use crate::error::Result;
use crate::service::process;
use crate::state::TaskState;
use crate::store::TaskStore;

#[cfg(unix)]
use std::os::unix::process::CommandExt;

/// How a supervised run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum Outcome {
    Success,
    /// Non-zero exit, or the script could not be started
    Failed { code: Option<i32> },
    /// Killed by a signal; finalization is left to cancel or recovery
    Signalled,
    /// No longer queued when picked up, or superseded by a restart
    Skipped,
}

#[derive(Clone)]
pub struct Supervisor {
    store: Arc<TaskStore>,
    verbose: bool,
}

impl Supervisor {
    pub fn new(store: Arc<TaskStore>, verbose: bool) -> Self {
        Self { store, verbose }
    }

    /// Run attempt `attempt` of the task to completion, blocking the calling
    /// worker.
    ///
    /// The state check, the spawn and the PID record happen under the task
    /// lock, so a cancel either finds the child's PID or leaves a finished
    /// task the worker then skips. A job whose attempt was superseded by a
    /// restart is skipped as well.
    pub fn run(&self, id: &str, attempt: u32) -> Result<Outcome> {
        let dir = self.store.existing_dir(id)?;
        let lock = self.store.lock(id)?;

        let state = self.store.state(id)?;
        if state != TaskState::Queued {
            debug!(task_id = %id, %state, "Task no longer queued, skipping");
            return Ok(Outcome::Skipped);
        }
        let current = self.store.attempt(id)?;
        if current != attempt {
            debug!(task_id = %id, attempt, current, "Attempt superseded, skipping");
            return Ok(Outcome::Skipped);
        }

        let mut cmd = Command::new("bash");
        cmd.arg(dir.join(SCRIPT_FILE))
            .current_dir(&dir)
            .stdin(Stdio::null())
            .stdout(if self.verbose { Stdio::inherit() } else { Stdio::null() })
            .stderr(Stdio::inherit());

        // Own process group, so cancel can reach everything the script starts
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(task_id = %id, error = %e, "Failed to spawn launch script");
                drop(lock);
                self.store.finish(id, None, false)?;
                return Ok(Outcome::Failed { code: None });
            }
        };
        let pid = child.id();

        if let Err(e) = self.store.mark_started(id, pid) {
            error!(task_id = %id, pid, error = %e, "Failed to record start, killing child");
            process::kill_tree(pid);
            let _ = child.wait();
            drop(lock);
            self.store.finish(id, Some(pid), false)?;
            return Ok(Outcome::Failed { code: None });
        }
        drop(lock);
        info!(task_id = %id, pid, attempt, "Task started");

        let status = match child.wait() {
            Ok(status) => status,
            Err(e) => {
                error!(task_id = %id, pid, error = %e, "Failed to wait for child");
                self.store.release_pid(id, pid)?;
                return Ok(Outcome::Signalled);
            }
        };

        let outcome = classify(status);
        if outcome == Outcome::Signalled {
            self.store.release_pid(id, pid)?;
            info!(task_id = %id, pid, "Task terminated by signal");
            return Ok(outcome);
        }

        if self.store.finish(id, Some(pid), outcome == Outcome::Success)? {
            info!(task_id = %id, pid, ?outcome, "Task finished");
        } else {
            debug!(task_id = %id, pid, "Task already finalized elsewhere");
        }
        Ok(outcome)
    }
}

/// Map an exit status onto Success, Failed or Signalled.
fn classify(status: ExitStatus) -> Outcome {
    match status.code() {
        Some(0) => Outcome::Success,
        Some(code) => Outcome::Failed { code: Some(code) },
        None => Outcome::Signalled,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::input::TaskInput;
    use crate::state::TaskState;
    use crate::status_log::StepState;
    use crate::store::NewTask;
    use std::fs;
    use tempfile::TempDir;

    fn setup(temp_dir: &TempDir, script: &str) -> (Arc<TaskStore>, String, u32) {
        let store = Arc::new(TaskStore::new(&Config::new(temp_dir.path())));
        let (id, _) = store
            .create_task(&NewTask::new(TaskInput::Vcf("#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n".into())))
            .unwrap();
        fs::write(store.task_dir(&id).join(SCRIPT_FILE), script).unwrap();
        let attempt = store.mark_queued(&id).unwrap();
        (store, id, attempt)
    }

    fn lifecycle(store: &TaskStore, id: &str) -> Vec<StepState> {
        store.status_log(id).unwrap().events().unwrap().iter().map(|e| e.state).collect()
    }

    #[test]
    fn test_exit_zero_is_success() {
        let temp_dir = TempDir::new().unwrap();
        let (store, id, attempt) = setup(&temp_dir, "exit 0\n");
        let outcome = Supervisor::new(Arc::clone(&store), false).run(&id, attempt).unwrap();

        assert_eq!(outcome, Outcome::Success);
        assert_eq!(store.state(&id).unwrap(), TaskState::Success);
        assert!(!store.markers(&id).unwrap().pid);
        assert_eq!(lifecycle(&store, &id), vec![StepState::Queued, StepState::Started, StepState::Done]);
    }

    #[test]
    fn test_nonzero_exit_is_failure() {
        let temp_dir = TempDir::new().unwrap();
        let (store, id, attempt) = setup(&temp_dir, "exit 3\n");
        let outcome = Supervisor::new(Arc::clone(&store), false).run(&id, attempt).unwrap();

        assert_eq!(outcome, Outcome::Failed { code: Some(3) });
        let markers = store.markers(&id).unwrap();
        assert!(markers.failed && !markers.success && !markers.active && !markers.pid);
        assert_eq!(lifecycle(&store, &id).last(), Some(&StepState::Failed));
    }

    #[test]
    fn test_signal_leaves_task_active() {
        let temp_dir = TempDir::new().unwrap();
        let (store, id, attempt) = setup(&temp_dir, "kill -9 $$\n");
        let outcome = Supervisor::new(Arc::clone(&store), false).run(&id, attempt).unwrap();

        assert_eq!(outcome, Outcome::Signalled);
        let markers = store.markers(&id).unwrap();
        assert!(markers.active && !markers.pid && !markers.success && !markers.failed);
        assert_eq!(store.state(&id).unwrap(), TaskState::Queued);
    }

    #[test]
    fn test_runs_in_task_directory() {
        let temp_dir = TempDir::new().unwrap();
        let (store, id, attempt) = setup(&temp_dir, "pwd > where.txt\n");
        Supervisor::new(Arc::clone(&store), false).run(&id, attempt).unwrap();

        let recorded = fs::read_to_string(store.task_dir(&id).join("where.txt")).unwrap();
        let expected = fs::canonicalize(store.task_dir(&id)).unwrap();
        assert_eq!(fs::canonicalize(recorded.trim()).unwrap(), expected);
    }

    #[test]
    fn test_finished_task_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let (store, id, attempt) = setup(&temp_dir, "touch ran\n");
        store.cancel(&id).unwrap();

        let outcome = Supervisor::new(Arc::clone(&store), false).run(&id, attempt).unwrap();
        assert_eq!(outcome, Outcome::Skipped);
        assert!(!store.task_dir(&id).join("ran").exists());
    }

    #[test]
    fn test_missing_task() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(TaskStore::new(&Config::new(temp_dir.path())));
        assert!(Supervisor::new(store, false).run("42", 1).is_err());
    }

    #[test]
    fn test_superseded_attempt_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let (store, id, first) = setup(&temp_dir, "echo run >> runs\n");
        store.cancel(&id).unwrap();
        store.purge(&id).unwrap();
        let second = store.mark_queued(&id).unwrap();

        let supervisor = Supervisor::new(Arc::clone(&store), false);
        assert_eq!(supervisor.run(&id, first).unwrap(), Outcome::Skipped);
        assert_eq!(store.state(&id).unwrap(), TaskState::Queued);

        assert_eq!(supervisor.run(&id, second).unwrap(), Outcome::Success);
        let runs = fs::read_to_string(store.task_dir(&id).join("runs")).unwrap();
        assert_eq!(runs.lines().count(), 1);
    }

    #[test]
    fn test_fresh_task_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(TaskStore::new(&Config::new(temp_dir.path())));
        let (id, _) = store
            .create_task(&NewTask::new(TaskInput::Vcf("#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n".into())))
            .unwrap();

        let outcome = Supervisor::new(Arc::clone(&store), false).run(&id, 0).unwrap();
        assert_eq!(outcome, Outcome::Skipped);
        assert_eq!(store.state(&id).unwrap(), TaskState::Fresh);
    }
}
