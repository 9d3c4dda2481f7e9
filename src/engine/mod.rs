//! Task execution: the two-tier retry runner for one task and the batch
//! orchestrator that drives many.

pub mod batch;
pub mod output;
pub mod runner;
pub mod status;

pub use batch::{tasks_from_store, BatchOptions, BatchReport, BatchRunner, TaskExecutor, TaskResult};
pub use runner::{TaskOutcome, TaskRunner};
pub use status::{PipelineError, TaskStatus};
