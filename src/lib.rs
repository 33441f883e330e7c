pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod input;
pub mod lock;
pub mod service;
pub mod state;
pub mod status_log;
pub mod store;

pub use command::{CommandGenerator, Target, TargetCatalog, TargetData};
pub use config::Config;
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use input::{InputKind, TaskInput};
pub use service::{Lane, Outcome, RecoveryReport, Scheduler, Supervisor, WorkerPool};
pub use state::{Markers, TaskState};
pub use status_log::{StatusEvent, StatusLog, StepState};
pub use store::{NewTask, TaskStatus, TaskStore};
