//! Startup sweep over tasks a previous engine left active.

use serde::Serialize;
use tracing::{info, warn};

use crate::engine::Engine;
use crate::error::Result;

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    pub requeued: Vec<String>,
    pub failed: Vec<RecoveryFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryFailure {
    pub id: String,
    pub error: String,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Restart every active task.
///
/// Only listing the work folder can fail the sweep as a whole; a failing
/// task is logged, reported and skipped.
pub fn sweep(engine: &Engine) -> Result<RecoveryReport> {
    let store = engine.store();
    let mut report = RecoveryReport::default();

    for id in store.list_active()? {
        let priority = store.priority_of(&id).unwrap_or_else(|e| {
            warn!(task_id = %id, error = %e, "Could not recompute priority");
            false
        });
        match engine.restart(&id, priority) {
            Ok(_) => {
                info!(task_id = %id, priority, "Recovered task");
                report.requeued.push(id);
            }
            Err(e) => {
                warn!(task_id = %id, error = %e, "Failed to recover task");
                report.failed.push(RecoveryFailure {
                    id,
                    error: e.to_string(),
                });
            }
        }
    }

    info!(
        requeued = report.requeued.len(),
        failed = report.failed.len(),
        "Recovery sweep complete"
    );
    Ok(report)
}
