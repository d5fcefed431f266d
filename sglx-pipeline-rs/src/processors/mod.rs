//! Command construction, execution and the per-stream sorter stage.

pub mod cleanup;
pub mod commands;
pub mod driver;
pub mod jobs;
pub mod sorter;

// Re-export key types for convenience
pub use cleanup::{CleanupError, CleanupManager};
pub use commands::{CommandBatch, CommandBuilder, CommandError, ExternalCommand};
pub use driver::{run_batch, DriverError, Executor, PipelineDriver};
pub use jobs::{JobDescriptor, JobPlanner, PlanError, TPrimeJob};
pub use sorter::{ModuleOutcome, ModuleRunner, SorterError, SorterStage};
