//! Directory-backed task registry.
//!
//! Every task owns `<WORKFOLDER>/<id>/`. All state is on disk: inputs, the
//! generated script, marker files and the status log. Operations on an id
//! without a directory fail with [`EngineError::NotFound`].

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use crate::command::{
    CommandGenerator, OUTPUT_FILE, REGIONS_FILE, ScriptRequest, Target, TargetCatalog, TargetData,
};
use crate::config::{Config, PriorityConfig};
use crate::error::{EngineError, Result};
use crate::input::{InputKind, TaskInput};
use crate::lock::TaskLock;
use crate::service::process;
use crate::state::{self, Markers, TaskState};
use crate::status_log::{self, StatusEvent, StatusLog, StepState, StepStatus};

/// Last id handed out by this process
static LAST_ID: AtomicU64 = AtomicU64::new(0);

/// Attempts at finding a free id before giving up
const MAX_ID_ATTEMPTS: usize = 1000;

const PID_TMP_FILE: &str = ".PID.tmp";

/// A request to create a task
#[derive(Debug, Clone)]
pub struct NewTask {
    pub input: TaskInput,
    /// BED content restricting annotation to regions
    pub regions: Option<String>,
    pub target: Option<String>,
    pub target_data: TargetData,
    pub convert_only: bool,
}

impl NewTask {
    pub fn new(input: TaskInput) -> Self {
        Self {
            input,
            regions: None,
            target: None,
            target_data: TargetData::default(),
            convert_only: false,
        }
    }
}

/// Status report for one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStatus {
    pub id: String,
    pub state: TaskState,
    /// Last status log line, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<StatusEvent>,
    #[serde(flatten)]
    pub detail: Option<StatusDetail>,
}

/// Full status: per-step states of the current attempt plus marker flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusDetail {
    pub steps: Vec<StepStatus>,
    pub active: bool,
    pub error: bool,
}

#[derive(Debug, Clone)]
pub struct TaskStore {
    root: PathBuf,
    priority: PriorityConfig,
    catalog: TargetCatalog,
    generator: CommandGenerator,
}

impl TaskStore {
    pub fn new(config: &Config) -> Self {
        Self {
            root: config.work_folder.clone(),
            priority: config.priority.clone(),
            catalog: TargetCatalog::new(config.targets.dir.clone()),
            generator: CommandGenerator::new(config),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of `id`, whether or not it exists
    pub fn task_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Directory of an existing task
    pub fn existing_dir(&self, id: &str) -> Result<PathBuf> {
        if !is_task_id(id) {
            return Err(EngineError::NotFound(id.to_string()));
        }
        let dir = self.task_dir(id);
        if !dir.is_dir() {
            return Err(EngineError::NotFound(id.to_string()));
        }
        Ok(dir)
    }

    /// Create a task: directory, inputs and launch script.
    ///
    /// Returns the new id and whether the input qualifies as a priority task.
    pub fn create_task(&self, new: &NewTask) -> Result<(String, bool)> {
        // Unknown targets are rejected before anything touches the disk
        let target = new.target.as_deref().map(|t| self.catalog.resolve(t)).transpose()?;

        let (id, task_dir) = self.allocate()?;
        let populated = self.populate(&id, &task_dir, new, target.as_ref());
        match populated {
            Ok(priority) => {
                info!(task_id = %id, priority, target = ?new.target, "Task created");
                Ok((id, priority))
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&task_dir) {
                    warn!(task_id = %id, error = %cleanup, "Failed to remove partial task directory");
                }
                Err(e)
            }
        }
    }

    fn populate(
        &self,
        id: &str,
        task_dir: &Path,
        new: &NewTask,
        target: Option<&Target>,
    ) -> Result<bool> {
        let regions = match new.regions {
            Some(ref content) => {
                let path = task_dir.join(REGIONS_FILE);
                fs::write(&path, content).map_err(|e| EngineError::io(&path, e))?;
                Some(path)
            }
            None => None,
        };

        let kind = new.input.kind();
        let input_file = task_dir.join(kind.file_name());
        let line_count = match new.input {
            TaskInput::Vcf(ref content) | TaskInput::Hgvsc(ref content) => {
                fs::write(&input_file, content).map_err(|e| EngineError::io(&input_file, e))?;
                content.matches('\n').count()
            }
            TaskInput::VcfFile(ref source) => {
                if !source.is_file() {
                    return Err(EngineError::Validation(format!(
                        "Input file {} does not exist",
                        source.display()
                    )));
                }
                link_input(source, &input_file)?;
                count_lines(source)?
            }
        };
        let priority = self.is_priority(kind, line_count);

        let target_env = match target {
            Some(_) => new.target_data.materialize(task_dir)?,
            None => BTreeMap::new(),
        };

        self.generator.generate(&ScriptRequest {
            task_id: id,
            task_dir,
            input_file: &input_file,
            kind,
            regions: regions.as_deref(),
            convert_only: new.convert_only,
            target,
            target_env,
        })?;

        Ok(priority)
    }

    fn is_priority(&self, kind: InputKind, line_count: usize) -> bool {
        match kind {
            InputKind::Vcf => line_count < self.priority.vcf_max_lines,
            InputKind::Hgvsc => line_count < self.priority.hgvsc_max_lines,
        }
    }

    /// Reserve a fresh id and create its directory.
    ///
    /// Ids are microsecond timestamps, strictly increasing within the
    /// process; `create_dir` refuses existing directories, which settles
    /// collisions with other processes.
    fn allocate(&self) -> Result<(String, PathBuf)> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = next_id().to_string();
            let dir = self.task_dir(&id);
            match fs::create_dir(&dir) {
                Ok(()) => return Ok((id, dir)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!(task_id = %id, "Task id taken, retrying");
                }
                Err(e) => return Err(EngineError::io(&dir, e)),
            }
        }
        Err(EngineError::Configuration(format!(
            "Could not allocate a task id in {}",
            self.root.display()
        )))
    }

    /// Recompute the priority heuristic from the persisted input.
    pub fn priority_of(&self, id: &str) -> Result<bool> {
        let dir = self.existing_dir(id)?;
        for kind in [InputKind::Vcf, InputKind::Hgvsc] {
            let input = dir.join(kind.file_name());
            if input.is_file() {
                return Ok(self.is_priority(kind, count_lines(&input)?));
            }
        }
        Ok(false)
    }

    pub fn markers(&self, id: &str) -> Result<Markers> {
        Ok(Markers::read(&self.existing_dir(id)?))
    }

    pub fn state(&self, id: &str) -> Result<TaskState> {
        Ok(TaskState::derive(self.markers(id)?))
    }

    pub fn is_finished(&self, id: &str) -> Result<bool> {
        Ok(self.state(id)?.is_finished())
    }

    pub fn is_failed(&self, id: &str) -> Result<bool> {
        Ok(self.state(id)?.is_failed())
    }

    pub fn is_successful(&self, id: &str) -> Result<bool> {
        Ok(self.state(id)?.is_successful())
    }

    pub fn is_active(&self, id: &str) -> Result<bool> {
        Ok(state::is_active(self.markers(id)?))
    }

    pub fn status_log(&self, id: &str) -> Result<StatusLog> {
        Ok(StatusLog::new(&self.existing_dir(id)?))
    }

    pub fn get_status(&self, id: &str, full: bool) -> Result<TaskStatus> {
        let dir = self.existing_dir(id)?;
        let markers = Markers::read(&dir);
        let log = StatusLog::new(&dir);

        let detail = if full {
            Some(StatusDetail {
                steps: status_log::step_states(&log.current_attempt()?),
                active: state::is_active(markers),
                error: TaskState::derive(markers).is_failed(),
            })
        } else {
            None
        };

        Ok(TaskStatus {
            id: id.to_string(),
            state: TaskState::derive(markers),
            last: log.last()?,
            detail,
        })
    }

    pub fn get_status_all(&self, full: bool) -> Result<BTreeMap<String, TaskStatus>> {
        let mut all = BTreeMap::new();
        for id in self.list_all()? {
            match self.get_status(&id, full) {
                Ok(status) => {
                    all.insert(id, status);
                }
                // Deleted between listing and reading
                Err(EngineError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(all)
    }

    /// Path of the annotated output
    pub fn get_result(&self, id: &str) -> Result<PathBuf> {
        Ok(self.existing_dir(id)?.join(OUTPUT_FILE))
    }

    /// Ids of all task directories, oldest first
    pub fn list_all(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.root).map_err(|e| EngineError::io(&self.root, e))?;
        let mut ids: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| is_task_id(name))
            .collect();
        ids.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
        Ok(ids)
    }

    /// Ids of queued or running tasks
    pub fn list_active(&self) -> Result<Vec<String>> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|id| self.is_active(id).unwrap_or(false))
            .collect())
    }

    pub fn list_failed(&self) -> Result<Vec<String>> {
        self.list_where(|s| s.is_failed())
    }

    pub fn list_successful(&self) -> Result<Vec<String>> {
        self.list_where(|s| s.is_successful())
    }

    fn list_where<F: Fn(TaskState) -> bool>(&self, keep: F) -> Result<Vec<String>> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|id| self.state(id).map(&keep).unwrap_or(false))
            .collect())
    }

    /// Captured output of the current attempt's finished steps.
    pub fn get_log(&self, id: &str, failed_only: bool) -> Result<String> {
        let dir = self.existing_dir(id)?;
        let events = StatusLog::new(&dir).current_attempt()?;
        status_log::collect_log(&dir, &events, failed_only)
    }

    pub fn lock(&self, id: &str) -> Result<TaskLock> {
        TaskLock::acquire(&self.existing_dir(id)?)
    }

    pub fn read_pid(&self, id: &str) -> Result<Option<u32>> {
        let path = self.existing_dir(id)?.join(state::PID);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(content.trim().parse().ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::io(&path, e)),
        }
    }

    /// Enter the queued state: ACTIVE marker plus a QUEUED line.
    ///
    /// Only a fresh task can be queued. Returns the number of the new
    /// attempt, which a worker must still find current before it starts.
    pub fn mark_queued(&self, id: &str) -> Result<u32> {
        let dir = self.existing_dir(id)?;
        let _lock = TaskLock::acquire(&dir)?;

        let current = TaskState::derive(Markers::read(&dir));
        if current != TaskState::Fresh {
            return Err(EngineError::invalid_state(id, format!("cannot queue a task that is {}", current)));
        }
        touch(&dir.join(state::ACTIVE))?;
        let log = StatusLog::new(&dir);
        log.append(&StatusEvent::lifecycle(StepState::Queued))?;
        log.attempts()
    }

    /// Number of the task's current attempt
    pub fn attempt(&self, id: &str) -> Result<u32> {
        StatusLog::new(&self.existing_dir(id)?).attempts()
    }

    /// Record a freshly spawned child: PID marker plus a STARTED line.
    ///
    /// The marker is written to a temporary file and renamed into place, so
    /// readers never see a partial pid.
    pub fn mark_started(&self, id: &str, pid: u32) -> Result<()> {
        let dir = self.existing_dir(id)?;
        let pid_path = dir.join(state::PID);
        let tmp_path = dir.join(PID_TMP_FILE);
        fs::write(&tmp_path, pid.to_string()).map_err(|e| EngineError::io(&tmp_path, e))?;
        if let Err(e) = fs::rename(&tmp_path, &pid_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(EngineError::io(&pid_path, e));
        }
        StatusLog::new(&dir).append(&StatusEvent::lifecycle(StepState::Started))
    }

    /// Remove the PID marker if it still names `pid`.
    pub fn release_pid(&self, id: &str, pid: u32) -> Result<()> {
        if self.read_pid(id)? == Some(pid) {
            remove_if_exists(&self.task_dir(id).join(state::PID))?;
        }
        Ok(())
    }

    /// Write the outcome of the run owned by `pid`.
    ///
    /// Returns false, writing nothing, when the task already carries a
    /// terminal marker (a cancel got there first).
    pub fn finish(&self, id: &str, pid: Option<u32>, success: bool) -> Result<bool> {
        let dir = self.existing_dir(id)?;
        let _lock = TaskLock::acquire(&dir)?;

        if let Some(pid) = pid {
            self.release_pid(id, pid)?;
        }
        if TaskState::derive(Markers::read(&dir)).is_finished() {
            return Ok(false);
        }

        remove_if_exists(&dir.join(state::ACTIVE))?;
        let (marker, event) = if success {
            (state::SUCCESS, StepState::Done)
        } else {
            (state::FAILED, StepState::Failed)
        };
        touch(&dir.join(marker))?;
        StatusLog::new(&dir).append(&StatusEvent::lifecycle(event))?;
        Ok(true)
    }

    /// Cancel an unfinished task: kill its process tree, then record FAILED
    /// and a CANCELLED line.
    pub fn cancel(&self, id: &str) -> Result<()> {
        let dir = self.existing_dir(id)?;
        let _lock = TaskLock::acquire(&dir)?;

        if TaskState::derive(Markers::read(&dir)).is_finished() {
            return Err(EngineError::invalid_state(id, "already finished"));
        }
        info!(task_id = %id, "Cancelling task");

        if let Some(pid) = self.read_pid(id)? {
            process::kill_tree(pid);
            remove_if_exists(&dir.join(state::PID))?;
        }
        remove_if_exists(&dir.join(state::ACTIVE))?;
        touch(&dir.join(state::FAILED))?;

        if !TaskState::derive(Markers::read(&dir)).is_finished() {
            return Err(EngineError::invalid_state(id, "not finished after cancel"));
        }
        StatusLog::new(&dir).append(&StatusEvent::lifecycle(StepState::Cancelled))
    }

    /// Remove a task, cancelling it first if it is still unfinished.
    pub fn delete(&self, id: &str) -> Result<()> {
        let dir = self.existing_dir(id)?;
        if !self.is_finished(id)? {
            match self.cancel(id) {
                // Finished on its own in the meantime
                Ok(()) | Err(EngineError::InvalidState { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        fs::remove_dir_all(&dir).map_err(|e| EngineError::io(&dir, e))?;
        info!(task_id = %id, "Task deleted");
        Ok(())
    }

    /// Drop the artifacts of a previous run: step directories, terminal
    /// markers and the output. The status log is kept.
    pub fn purge(&self, id: &str) -> Result<()> {
        let dir = self.existing_dir(id)?;
        let entries = fs::read_dir(&dir).map_err(|e| EngineError::io(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| EngineError::io(&dir, e))?;
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                let path = entry.path();
                fs::remove_dir_all(&path).map_err(|e| EngineError::io(&path, e))?;
            }
        }
        for name in [state::SUCCESS, state::FAILED, OUTPUT_FILE] {
            remove_if_exists(&dir.join(name))?;
        }
        debug!(task_id = %id, "Purged task artifacts");
        Ok(())
    }
}

/// Task ids are decimal timestamps
pub fn is_task_id(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
}

fn next_id() -> u64 {
    let now = Utc::now().timestamp_micros().max(0) as u64;
    let mut last = LAST_ID.load(Ordering::SeqCst);
    loop {
        let candidate = now.max(last + 1);
        match LAST_ID.compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return candidate,
            Err(actual) => last = actual,
        }
    }
}

fn count_lines(path: &Path) -> Result<usize> {
    let file = File::open(path).map_err(|e| EngineError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let mut buf = [0u8; 64 * 1024];
    let mut count = 0;
    loop {
        let n = reader.read(&mut buf).map_err(|e| EngineError::io(path, e))?;
        if n == 0 {
            return Ok(count);
        }
        count += buf[..n].iter().filter(|&&b| b == b'\n').count();
    }
}

#[cfg(unix)]
fn link_input(source: &Path, dest: &Path) -> Result<()> {
    let source = fs::canonicalize(source).map_err(|e| EngineError::io(source, e))?;
    std::os::unix::fs::symlink(&source, dest).map_err(|e| EngineError::io(dest, e))
}

#[cfg(not(unix))]
fn link_input(source: &Path, dest: &Path) -> Result<()> {
    fs::copy(source, dest).map(|_| ()).map_err(|e| EngineError::io(dest, e))
}

fn touch(path: &Path) -> Result<()> {
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(|_| ())
        .map_err(|e| EngineError::io(path, e))
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(EngineError::io(path, e)),
    }
}
