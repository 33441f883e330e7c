//! Two-lane scheduling: a normal pool plus a single-worker priority lane.

use serde::Serialize;
use std::fmt;
use tracing::info;

use super::pool::{Ticket, WorkerPool};

/// Width of the priority lane
pub const PRIORITY_WIDTH: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    Normal,
    Priority,
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lane::Normal => write!(f, "normal"),
            Lane::Priority => write!(f, "priority"),
        }
    }
}

/// Occupancy snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LaneLoad {
    pub width: usize,
    pub outstanding: usize,
}

pub struct Scheduler {
    normal: WorkerPool,
    priority: WorkerPool,
}

impl Scheduler {
    pub fn new(normal_workers: usize) -> Self {
        Self {
            normal: WorkerPool::new("normal", normal_workers),
            priority: WorkerPool::new("priority", PRIORITY_WIDTH),
        }
    }

    /// Where a task would go right now.
    ///
    /// Priority tasks bypass the normal pool only while it is full; the
    /// check is a hint and may race other submissions.
    pub fn route(&self, priority: bool) -> Lane {
        if priority && self.normal.outstanding() >= self.normal.width() {
            Lane::Priority
        } else {
            Lane::Normal
        }
    }

    pub fn submit<F>(&self, task_id: &str, priority: bool, job: F) -> (Lane, Ticket)
    where
        F: FnOnce() + Send + 'static,
    {
        let lane = self.route(priority);
        let ticket = match lane {
            Lane::Normal => self.normal.submit(job),
            Lane::Priority => self.priority.submit(job),
        };
        info!(task_id, %lane, priority, "Task submitted");
        (lane, ticket)
    }

    pub fn load(&self, lane: Lane) -> LaneLoad {
        let pool = match lane {
            Lane::Normal => &self.normal,
            Lane::Priority => &self.priority,
        };
        LaneLoad {
            width: pool.width(),
            outstanding: pool.outstanding(),
        }
    }

    /// Close both lanes and join their workers once the queues drain.
    pub fn shutdown(&self) {
        info!("Shutting down scheduler");
        self.normal.shutdown();
        self.priority.shutdown();
    }
}
