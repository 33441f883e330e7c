//! The task execution engine: task store, scheduler and supervisor behind
//! one handle.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::service::recovery::{self, RecoveryReport};
use crate::service::{Lane, Scheduler, Supervisor};
use crate::state::TaskState;
use crate::store::{NewTask, TaskStore};

/// Poll interval of [`Engine::wait_for_task`]
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How often a long wait is reported
pub const WAIT_WARN_INTERVAL: Duration = Duration::from_secs(100);

#[derive(Clone)]
pub struct Engine {
    store: Arc<TaskStore>,
    scheduler: Arc<Scheduler>,
    supervisor: Supervisor,
}

impl Engine {
    /// Engine with its own pools sized from `config`.
    pub fn new(config: &Config) -> Self {
        let scheduler = Arc::new(Scheduler::new(config.scheduler.normal_workers));
        Self::with_scheduler(config, scheduler)
    }

    pub fn with_scheduler(config: &Config, scheduler: Arc<Scheduler>) -> Self {
        let store = Arc::new(TaskStore::new(config));
        let supervisor = Supervisor::new(Arc::clone(&store), config.pipeline.verbose);
        Self {
            store,
            scheduler,
            supervisor,
        }
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn create_task(&self, new: &NewTask) -> Result<(String, bool)> {
        self.store.create_task(new)
    }

    /// Queue a fresh task for execution.
    ///
    /// With `wait` the call returns only once the run is over.
    pub fn queue(&self, id: &str, priority: bool, wait: bool) -> Result<Lane> {
        let attempt = self.store.mark_queued(id)?;

        let supervisor = self.supervisor.clone();
        let task_id = id.to_string();
        let (lane, ticket) = self.scheduler.submit(id, priority, move || {
            match supervisor.run(&task_id, attempt) {
                Ok(_) => {}
                Err(EngineError::NotFound(_)) => {
                    debug!(task_id = %task_id, "Task deleted while running");
                }
                Err(e) => error!(task_id = %task_id, error = %e, "Task run failed"),
            }
        });

        if wait {
            ticket.wait();
        }
        Ok(lane)
    }

    pub fn cancel(&self, id: &str) -> Result<()> {
        self.store.cancel(id)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        self.store.delete(id)
    }

    /// Cancel if queued or running, drop the previous run's artifacts and
    /// queue again. Jobs still pending for the old attempt are skipped.
    pub fn restart(&self, id: &str, priority: bool) -> Result<Lane> {
        let state = self.store.state(id)?;
        if !state.is_finished() && state != TaskState::Fresh {
            match self.store.cancel(id) {
                Ok(()) | Err(EngineError::InvalidState { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        self.store.purge(id)?;
        info!(task_id = %id, priority, "Restarting task");
        self.queue(id, priority, false)
    }

    /// Restart everything a previous engine left active.
    pub fn recover(&self) -> Result<RecoveryReport> {
        recovery::sweep(self)
    }

    /// Block until the task is finished, polling its markers.
    pub fn wait_for_task(&self, id: &str) -> Result<TaskState> {
        wait_until_finished(&self.store, id, WAIT_POLL_INTERVAL)
    }

    /// Stop accepting work and join the workers once queued runs drain.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}

/// Polling wait shared with clients that only hold a [`TaskStore`].
pub fn wait_until_finished(store: &TaskStore, id: &str, interval: Duration) -> Result<TaskState> {
    let start = Instant::now();
    let mut next_warning = WAIT_WARN_INTERVAL;
    loop {
        let state = store.state(id)?;
        if state.is_finished() {
            return Ok(state);
        }
        if start.elapsed() >= next_warning {
            warn!(task_id = %id, waited_secs = start.elapsed().as_secs(), "Still waiting for task");
            next_warning += WAIT_WARN_INTERVAL;
        }
        thread::sleep(interval);
    }
}
