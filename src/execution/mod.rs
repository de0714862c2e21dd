//! Pipeline execution engine

pub mod engine;
pub mod runner;
pub mod scheduler;

pub use engine::{EventEmitter, EventHandler, ExecutionEngine, ExecutionEvent};
pub use runner::{StageJob, StageRunner};
pub use scheduler::{ExecutionScheduler, SchedulingStrategy};
