//! Append-only per-task event journal.
//!
//! Lives at `<task>/STATUS`. Each line is `<timestamp>\t<step>\t<STATE>`.
//! Lines are written both by the engine (lifecycle events under the step
//! label [`LIFECYCLE_STEP`]) and by the generated script (one label per
//! pipeline step). Existing lines are never rewritten.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

use crate::error::{EngineError, Result};

pub const STATUS_FILE: &str = "STATUS";

/// Step label of events written by the engine itself
pub const LIFECYCLE_STEP: &str = "task";

/// Matches `date '+%Y-%m-%d %H:%M:%S.%N'` used by generated scripts
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepState {
    Queued,
    Started,
    Done,
    Failed,
    Cancelled,
}

impl StepState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepState::Queued => "QUEUED",
            StepState::Started => "STARTED",
            StepState::Done => "DONE",
            StepState::Failed => "FAILED",
            StepState::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for StepState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(StepState::Queued),
            "STARTED" => Ok(StepState::Started),
            "DONE" => Ok(StepState::Done),
            "FAILED" => Ok(StepState::Failed),
            "CANCELLED" => Ok(StepState::Cancelled),
            other => Err(format!("unknown step state '{}'", other)),
        }
    }
}

/// One line of the status log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub timestamp: String,
    pub step: String,
    pub state: StepState,
}

impl StatusEvent {
    pub fn now(step: &str, state: StepState) -> Self {
        Self {
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            step: step.to_string(),
            state,
        }
    }

    pub fn lifecycle(state: StepState) -> Self {
        Self::now(LIFECYCLE_STEP, state)
    }

    pub fn to_line(&self) -> String {
        format!("{}\t{}\t{}", self.timestamp, self.step, self.state)
    }

    /// Parse a log line. Returns None for malformed lines.
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.trim_end_matches(['\n', '\r']).split('\t');
        let timestamp = fields.next()?.trim();
        let step = fields.next()?.trim();
        let state: StepState = fields.next()?.trim().parse().ok()?;
        if timestamp.is_empty() || step.is_empty() {
            return None;
        }
        Some(Self {
            timestamp: timestamp.to_string(),
            step: step.to_string(),
            state,
        })
    }
}

/// Latest state of one step within an attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStatus {
    pub step: String,
    pub state: StepState,
    pub timestamp: String,
}

/// Handle on a task's status log
#[derive(Debug, Clone)]
pub struct StatusLog {
    path: PathBuf,
}

impl StatusLog {
    pub fn new(task_dir: &Path) -> Self {
        Self {
            path: task_dir.join(STATUS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn append(&self, event: &StatusEvent) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| EngineError::io(&self.path, e))?;
        writeln!(file, "{}", event.to_line()).map_err(|e| EngineError::io(&self.path, e))?;
        Ok(())
    }

    /// All parseable events in order. A missing log is empty.
    pub fn events(&self) -> Result<Vec<StatusEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path).map_err(|e| EngineError::io(&self.path, e))?;
        Ok(content.lines().filter_map(StatusEvent::parse).collect())
    }

    pub fn last(&self) -> Result<Option<StatusEvent>> {
        Ok(self.events()?.pop())
    }

    /// Number of times the task has been queued; identifies the current attempt.
    pub fn attempts(&self) -> Result<u32> {
        Ok(self
            .events()?
            .iter()
            .filter(|e| e.step == LIFECYCLE_STEP && e.state == StepState::Queued)
            .count() as u32)
    }

    /// Events of the current attempt: everything from the last QUEUED line on.
    pub fn current_attempt(&self) -> Result<Vec<StatusEvent>> {
        let mut events = self.events()?;
        if let Some(start) = events.iter().rposition(|e| e.state == StepState::Queued) {
            events.drain(..start);
        }
        Ok(events)
    }
}

/// Fold events into an ordered step -> latest state mapping.
///
/// Steps keep the position of their first appearance.
pub fn step_states(events: &[StatusEvent]) -> Vec<StepStatus> {
    let mut steps: Vec<StepStatus> = Vec::new();
    for event in events {
        match steps.iter_mut().find(|s| s.step == event.step) {
            Some(existing) => {
                existing.state = event.state;
                existing.timestamp = event.timestamp.clone();
            }
            None => steps.push(StepStatus {
                step: event.step.clone(),
                state: event.state,
                timestamp: event.timestamp.clone(),
            }),
        }
    }
    steps
}

/// Captured output of a step.
///
/// `<step>` logs to `<task>/<step>/output.log`; a target's preprocess hook,
/// recorded as `<target>:preprocess`, logs to `<task>/<target>/output_preprocess.log`.
pub fn step_log_path(task_dir: &Path, step: &str) -> PathBuf {
    match step.strip_suffix(":preprocess") {
        Some(target) => task_dir.join(target).join("output_preprocess.log"),
        None => task_dir.join(step).join("output.log"),
    }
}

/// Concatenate the captured output of every FAILED step, and of every DONE
/// step unless `failed_only`, in log order.
pub fn collect_log(task_dir: &Path, events: &[StatusEvent], failed_only: bool) -> Result<String> {
    let mut log = String::new();
    for event in events {
        if event.step == LIFECYCLE_STEP {
            continue;
        }
        let wanted = match event.state {
            StepState::Failed => true,
            StepState::Done => !failed_only,
            _ => false,
        };
        if !wanted {
            continue;
        }

        let log_file = step_log_path(task_dir, &event.step);
        let content = match fs::read_to_string(&log_file) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(step = %event.step, path = %log_file.display(), "Step output missing");
                continue;
            }
            Err(e) => return Err(EngineError::io(&log_file, e)),
        };
        log.push_str(&format!("## {}: {} ##\n", event.step, event.state));
        log.push_str(&content);
        log.push('\n');
    }
    Ok(log)
}
