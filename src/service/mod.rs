//! Execution machinery: worker pools, process supervision and recovery.

pub mod pool;
pub mod process;
pub mod recovery;
pub mod scheduler;
pub mod supervisor;

pub use pool::{Ticket, WorkerPool};
pub use process::{descendants, is_process_running, kill_tree};
pub use recovery::{RecoveryFailure, RecoveryReport};
pub use scheduler::{Lane, LaneLoad, Scheduler};
pub use supervisor::{Outcome, Supervisor};
