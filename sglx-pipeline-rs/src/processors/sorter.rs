//! Invocation of the sorter and its post-processing modules.
//!
//! Each module is a separate process reading its job file and writing an
//! output JSON. Modules run through the pipeline's executor, so their
//! output lands in the same log as CatGT's and a failure stops the stream.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Local;
use log::info;
use thiserror::Error;

use super::commands::ExternalCommand;
use super::driver::{DriverError, Executor};
use super::jobs::{JobDescriptor, TPrimeJob};
use crate::config::SortingConfig;
use crate::core::writers::SummaryRow;

/// Module that maps event times onto the reference stream.
pub const TPRIME_MODULE: &str = "tPrime_helper";

/// Errors that can occur while running sorter modules.
#[derive(Debug, Error)]
pub enum SorterError {
    #[error("module {module} failed for {session}: {source}")]
    Module {
        module: String,
        session: String,
        #[source]
        source: DriverError,
    },
}

/// Result type for sorter operations.
pub type Result<T> = std::result::Result<T, SorterError>;

/// Timing of one completed module.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleOutcome {
    pub module: String,
    pub elapsed: Duration,
}

/// Runs the downstream stage for one stream at a time.
pub trait SorterStage {
    /// Run `modules` in order against the stream's job file.
    fn run_probe(&mut self, job: &JobDescriptor, modules: &[String]) -> Result<Vec<ModuleOutcome>>;

    fn run_tprime(&mut self, job: &TPrimeJob) -> Result<ModuleOutcome>;
}

/// Launches each module as `<python> -W ignore -m <package>.<module>`.
pub struct ModuleRunner<'e, E: Executor + ?Sized> {
    executor: &'e mut E,
    python: String,
    package: String,
    json_dir: PathBuf,
}

impl<'e, E: Executor + ?Sized> ModuleRunner<'e, E> {
    pub fn new(executor: &'e mut E, sorting: &SortingConfig, json_dir: PathBuf) -> Self {
        Self {
            executor,
            python: sorting.python.clone(),
            package: sorting.module_package.clone(),
            json_dir,
        }
    }

    pub fn module_command(&self, module: &str, input_json: &Path, output_json: &Path) -> ExternalCommand {
        ExternalCommand::new(
            &self.python,
            vec![
                "-W".to_string(),
                "ignore".to_string(),
                "-m".to_string(),
                format!("{}.{}", self.package, module),
                "--input_json".to_string(),
                input_json.display().to_string(),
                "--output_json".to_string(),
                output_json.display().to_string(),
            ],
        )
    }

    fn run_module(&mut self, session: &str, module: &str, input_json: &Path, output_json: &Path) -> Result<ModuleOutcome> {
        let command = self.module_command(module, input_json, output_json);
        let start = Instant::now();
        info!("Running {} for {}", module, session);

        self.executor
            .execute(&command)
            .map_err(|e| SorterError::Module {
                module: module.to_string(),
                session: session.to_string(),
                source: e,
            })?;

        Ok(ModuleOutcome {
            module: module.to_string(),
            elapsed: start.elapsed(),
        })
    }
}

impl<'e, E: Executor + ?Sized> SorterStage for ModuleRunner<'e, E> {
    fn run_probe(&mut self, job: &JobDescriptor, modules: &[String]) -> Result<Vec<ModuleOutcome>> {
        let mut outcomes = Vec::with_capacity(modules.len());
        for module in modules {
            let output_json = self
                .json_dir
                .join(format!("{}-{}-output.json", job.session_id, module));
            outcomes.push(self.run_module(&job.session_id, module, &job.sorting_json, &output_json)?);
        }
        Ok(outcomes)
    }

    fn run_tprime(&mut self, job: &TPrimeJob) -> Result<ModuleOutcome> {
        self.run_module(&job.session_id, TPRIME_MODULE, &job.input_json, &job.output_json)
    }
}

/// Summary rows for one stream's completed modules.
pub fn summary_rows(job: &JobDescriptor, outcomes: &[ModuleOutcome]) -> Vec<SummaryRow> {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    outcomes
        .iter()
        .map(|outcome| SummaryRow {
            timestamp: timestamp.clone(),
            run: job.run_name.clone(),
            probe: job.stream.to_string(),
            module: outcome.module.clone(),
            elapsed_secs: outcome.elapsed.as_secs_f64(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::core::ranges::{FolderTriggerLookup, TriggerRange};
    use crate::core::run_spec::{RunSpec, StreamRange};
    use crate::processors::driver::tests::FakeExecutor;
    use crate::processors::jobs::JobPlanner;

    fn planned_jobs(config: &PipelineConfig) -> Vec<JobDescriptor> {
        let planner = JobPlanner::new(
            config,
            FolderTriggerLookup {
                spec: Some(TriggerRange { first: 0, last: 0 }),
            },
        );
        let spec = RunSpec {
            name: "sessionA".to_string(),
            gates: vec![0],
            streams: StreamRange::from_count(2),
            regions: vec!["hippocampus".to_string(); 2],
            created: Vec::new(),
        };
        planner.plan(&[spec]).unwrap()
    }

    fn config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.paths.npx_dir = PathBuf::from("/data/npx");
        config
    }

    #[test]
    fn test_module_commands() {
        let config = config();
        let jobs = planned_jobs(&config);
        let mut executor = FakeExecutor::default();
        let json_dir = config.paths.json_dir();

        let mut runner = ModuleRunner::new(&mut executor, &config.sorting, json_dir);
        let outcomes = runner.run_probe(&jobs[0], &config.sorting.modules).unwrap();
        assert_eq!(outcomes.len(), 2);

        let lines = executor.lines();
        assert_eq!(
            lines[0],
            "python -W ignore -m ecephys_spike_sorting.modules.ks4_helper \
             --input_json /data/npx/preprocessing_output/preprocessing_json/sessionA_imec0-input.json \
             --output_json /data/npx/preprocessing_output/preprocessing_json/sessionA_imec0-ks4_helper-output.json"
        );
        assert!(lines[1].contains("ecephys_spike_sorting.modules.kilosort_postprocessing"));
    }

    #[test]
    fn test_module_failure_stops_stream() {
        let config = config();
        let jobs = planned_jobs(&config);
        let mut executor = FakeExecutor::failing_at(0);

        let mut runner = ModuleRunner::new(&mut executor, &config.sorting, config.paths.json_dir());
        let err = runner.run_probe(&jobs[0], &config.sorting.modules).unwrap_err();

        assert!(matches!(err, SorterError::Module { ref module, .. } if module == "ks4_helper"));
        assert_eq!(executor.executed.len(), 1);
    }

    #[test]
    fn test_summary_rows() {
        let config = config();
        let jobs = planned_jobs(&config);
        let outcomes = vec![ModuleOutcome {
            module: "ks4_helper".to_string(),
            elapsed: Duration::from_millis(1500),
        }];

        let rows = summary_rows(&jobs[1], &outcomes);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].run, "sessionA");
        assert_eq!(rows[0].probe, "1");
        assert_eq!(rows[0].elapsed_secs, 1.5);
    }
}
