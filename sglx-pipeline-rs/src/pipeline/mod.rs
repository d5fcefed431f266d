//! End-to-end orchestration as an explicit state machine.
//!
//! A run moves through
//!
//! ```text
//! Idle -> PassOneRunning -> PassOneDone -> PassTwoRunning -> PassTwoDone
//!      -> Sorting -> Sorted -> CleaningUp -> Complete
//! ```
//!
//! Disabled stages are skipped, and any running state may drop to `Failed`.
//! Intermediate folders are only deleted when pass two finished in the same
//! invocation, so a run that skipped or failed pass two never loses its
//! pass-one output.

use std::fmt;
use std::path::PathBuf;

use log::{info, warn};
use thiserror::Error;

use crate::config::PipelineConfig;
use crate::core::ranges::{FolderTriggerLookup, RangeError, TriggerSpec};
use crate::core::run_spec::{self, ResolveError, RunSpec};
use crate::core::segments::{self, ScanError};
use crate::core::writers::{self, WriteError};
use crate::processors::cleanup::{CleanupError, CleanupManager};
use crate::processors::commands::{CommandBatch, CommandBuilder, CommandError, ExternalCommand};
use crate::processors::driver::{self, DriverError, Executor};
use crate::processors::jobs::{self, JobDescriptor, JobPlanner, PlanError, TPrimeJob};
use crate::processors::sorter::{self, ModuleRunner, SorterError, SorterStage};

/// Errors that abort a pipeline invocation.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("discovery failed: {0}")]
    Scan(#[from] ScanError),

    #[error("run resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Range(#[from] RangeError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("job planning failed: {0}")]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Sorter(#[from] SorterError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error("cleanup failed: {0}")]
    Cleanup(#[from] CleanupError),

    #[error("invalid pipeline transition {from} -> {to}")]
    InvalidTransition { from: PipelineState, to: PipelineState },
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    PassOneRunning,
    PassOneDone,
    PassTwoRunning,
    PassTwoDone,
    Sorting,
    Sorted,
    CleaningUp,
    Complete,
    Failed,
}

impl PipelineState {
    pub fn is_running(self) -> bool {
        matches!(
            self,
            PipelineState::PassOneRunning
                | PipelineState::PassTwoRunning
                | PipelineState::Sorting
                | PipelineState::CleaningUp
        )
    }

    /// Whether `next` may follow `self`.
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;

        if next == Failed {
            return self.is_running();
        }
        match self {
            Idle => matches!(next, PassOneRunning | PassTwoRunning | Sorting | Complete),
            PassOneRunning => next == PassOneDone,
            PassOneDone => matches!(next, PassTwoRunning | Sorting | Complete),
            PassTwoRunning => next == PassTwoDone,
            PassTwoDone => matches!(next, Sorting | CleaningUp | Complete),
            Sorting => next == Sorted,
            Sorted => matches!(next, CleaningUp | Complete),
            CleaningUp => next == Complete,
            Complete | Failed => false,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Which stages an invocation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stages {
    pub pass_one: bool,
    pub pass_two: bool,
    pub sorting: bool,
    pub cleanup: bool,
}

impl Stages {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            pass_one: config.catgt.pass_one,
            pass_two: config.catgt.pass_two,
            sorting: config.sorting.enabled,
            cleanup: config.cleanup.delete_intermediate,
        }
    }
}

/// What a finished invocation did.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub history: Vec<PipelineState>,
    pub pass_one_commands: usize,
    pub supercat_ran: bool,
    /// Session ids of the streams that were sorted
    pub sorted_sessions: Vec<String>,
    pub modules_run: usize,
    pub removed: Vec<PathBuf>,
}

/// Both CatGT batches, built from the same ordered run list.
#[derive(Debug, Clone)]
pub struct PlannedCommands {
    pub pass_one: CommandBatch,
    pub supercat: ExternalCommand,
}

/// Discover runs on disk, or take the hand-entered list when one is configured.
pub fn resolve_runs(config: &PipelineConfig) -> Result<Vec<RunSpec>> {
    let discovery = &config.discovery;
    if let Some(runs) = &discovery.runs {
        info!("Using {} configured runs", runs.len());
        return Ok(run_spec::manual_run_specs(runs)?);
    }

    let segments = segments::scan_segments(&config.paths.npx_dir, discovery)?;
    Ok(run_spec::resolve_run_specs(&segments, &discovery.default_region)?)
}

/// Build the pass-one batch and the supercat command.
pub fn plan_commands(config: &PipelineConfig, specs: &[RunSpec]) -> Result<PlannedCommands> {
    let catgt = &config.catgt;
    let dest = config.paths.dest_dir();
    let builder = CommandBuilder::new(
        &catgt.executable,
        &config.paths.npx_dir,
        &dest,
        &catgt.intermediate_prefix,
    );

    Ok(PlannedCommands {
        pass_one: builder.pass_one(specs, &catgt.pass_one_args(&dest)),
        supercat: builder.supercat(specs, &catgt.supercat_args(&dest))?,
    })
}

/// Plan the sorter jobs and the optional TPrime job of the primary run.
pub fn plan_jobs(config: &PipelineConfig, specs: &[RunSpec]) -> Result<(Vec<JobDescriptor>, Option<TPrimeJob>)> {
    let lookup = FolderTriggerLookup::new(TriggerSpec::parse(&config.sorting.triggers)?);
    let planner = JobPlanner::new(config, lookup);
    let jobs = planner.plan(specs)?;
    let tprime = planner.plan_tprime(specs, &jobs)?;
    Ok((jobs, tprime))
}

/// Drives one invocation over an ordered list of runs.
pub struct Pipeline<'a, E: Executor> {
    config: &'a PipelineConfig,
    executor: E,
    stages: Stages,
    state: PipelineState,
    history: Vec<PipelineState>,
}

impl<'a, E: Executor> Pipeline<'a, E> {
    pub fn new(config: &'a PipelineConfig, executor: E) -> Self {
        Self {
            config,
            executor,
            stages: Stages::from_config(config),
            state: PipelineState::Idle,
            history: vec![PipelineState::Idle],
        }
    }

    pub fn with_stages(mut self, stages: Stages) -> Self {
        self.stages = stages;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    fn transition(&mut self, next: PipelineState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        info!("Pipeline state: {} -> {}", self.state, next);
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Run every enabled stage over `specs`, in order.
    ///
    /// On error the pipeline ends in `Failed` and whatever was produced so far
    /// stays on disk.
    pub fn run(&mut self, specs: &[RunSpec]) -> Result<PipelineReport> {
        let mut report = PipelineReport::default();
        let result = self.run_stages(specs, &mut report);

        if result.is_err() && self.state.is_running() {
            self.state = PipelineState::Failed;
            self.history.push(PipelineState::Failed);
        }
        report.history = self.history.clone();
        result.map(|_| report)
    }

    fn run_stages(&mut self, specs: &[RunSpec], report: &mut PipelineReport) -> Result<()> {
        if self.state != PipelineState::Idle {
            return Err(PipelineError::InvalidTransition {
                from: self.state,
                to: PipelineState::PassOneRunning,
            });
        }

        // Built up front so a bad run list fails before anything executes.
        let commands = plan_commands(self.config, specs)?;

        if self.stages.pass_one {
            self.transition(PipelineState::PassOneRunning)?;
            driver::run_batch(&mut self.executor, &commands.pass_one, "CatGT pass 1")?;
            report.pass_one_commands = commands.pass_one.len();
            self.transition(PipelineState::PassOneDone)?;
        }

        if self.stages.pass_two {
            self.transition(PipelineState::PassTwoRunning)?;
            info!("Running supercat over {} runs", specs.len());
            self.executor.execute(&commands.supercat)?;
            report.supercat_ran = true;
            self.transition(PipelineState::PassTwoDone)?;
        }

        if self.stages.sorting {
            self.transition(PipelineState::Sorting)?;
            self.sort(specs, report)?;
            self.transition(PipelineState::Sorted)?;
        }

        if self.stages.cleanup {
            if self.history.contains(&PipelineState::PassTwoDone) {
                self.transition(PipelineState::CleaningUp)?;
                let manager = CleanupManager::new(
                    self.config.paths.dest_dir(),
                    self.config.catgt.intermediate_prefix.as_str(),
                );
                report.removed = manager.run(specs)?;
            } else {
                warn!("Pass two did not run; keeping intermediate folders");
            }
        }

        self.transition(PipelineState::Complete)
    }

    fn sort(&mut self, specs: &[RunSpec], report: &mut PipelineReport) -> Result<()> {
        let config = self.config;
        let (jobs, tprime) = plan_jobs(config, specs)?;

        jobs::write_job_configs(&jobs)?;
        if let Some(job) = &tprime {
            jobs::write_tprime_config(job)?;
        }

        let summary_path = config.paths.summary_path();
        let mut runner = ModuleRunner::new(&mut self.executor, &config.sorting, config.paths.json_dir());

        for job in &jobs {
            info!("Sorting {} ({})", job.session_id, job.region);
            let outcomes = runner.run_probe(job, &config.sorting.modules)?;
            writers::append_summary_rows(&summary_path, &sorter::summary_rows(job, &outcomes))?;
            report.modules_run += outcomes.len();
            report.sorted_sessions.push(job.session_id.clone());
        }

        if let (Some(tprime), Some(first)) = (&tprime, jobs.first()) {
            let outcome = runner.run_tprime(tprime)?;
            writers::append_summary_rows(&summary_path, &sorter::summary_rows(first, &[outcome]))?;
            report.modules_run += 1;
        }

        Ok(())
    }
}
