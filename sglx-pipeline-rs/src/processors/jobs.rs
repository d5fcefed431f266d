//! Per-stream job preparation for the sorter stage.
//!
//! Jobs are planned for every stream of the primary (first) run, which is
//! the run the supercat output is named after. Planning does all lookups
//! up front and touches nothing on disk except the trigger scan; the job
//! files are written in a separate step so a bad region label never leaves
//! a partial set of configs behind.

use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::Serialize;
use thiserror::Error;

use crate::config::{PipelineConfig, SortingConfig, DEFAULT_REGION};
use crate::core::ranges::{RangeError, TriggerLookup, TriggerRange};
use crate::core::run_spec::RunSpec;
use crate::core::writers::{self, WriteError};

/// Errors that can occur while planning sorter jobs.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("no runs to plan jobs for")]
    NoRuns,

    #[error("no {table} entry for region '{label}' and no '{default}' entry", default = DEFAULT_REGION)]
    UnknownRegion { label: String, table: &'static str },

    #[error("run '{run}' has no region label for stream {stream}")]
    MissingRegionLabel { run: String, stream: u32 },

    #[error(transparent)]
    Range(#[from] RangeError),

    #[error(transparent)]
    Write(#[from] WriteError),
}

/// Result type for planning operations.
pub type Result<T> = std::result::Result<T, PlanError>;

/// Region-specific sorter tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionTunables {
    pub threshold: Vec<u32>,
    pub refractory_ms: f64,
}

/// Look up tunables for `label`, falling back to the `default` entry.
pub fn region_tunables(sorting: &SortingConfig, label: &str) -> Result<RegionTunables> {
    let unknown = |table| PlanError::UnknownRegion {
        label: label.to_string(),
        table,
    };

    let threshold = sorting
        .thresholds
        .get(label)
        .or_else(|| sorting.thresholds.get(DEFAULT_REGION))
        .ok_or_else(|| unknown("thresholds"))?;
    let refractory_ms = sorting
        .refractory_ms
        .get(label)
        .or_else(|| sorting.refractory_ms.get(DEFAULT_REGION))
        .ok_or_else(|| unknown("refractory_ms"))?;

    Ok(RegionTunables {
        threshold: threshold.clone(),
        refractory_ms: *refractory_ms,
    })
}

/// Preprocessing-stage job file contents.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PreprocessingConfig {
    pub npx_directory: PathBuf,
    pub continuous_file: PathBuf,
    pub kilosort_output_directory: PathBuf,
    pub input_meta_path: PathBuf,
    #[serde(rename = "catGT_run_name")]
    pub catgt_run_name: String,
    pub trigger_string: String,
    pub probe_string: String,
    #[serde(rename = "catGT_stream_string")]
    pub catgt_stream_string: String,
    pub extracted_data_directory: PathBuf,
    pub lfp_sample_rate: u32,
}

/// Sorting and post-processing job file contents.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SortingJobConfig {
    pub npx_directory: PathBuf,
    pub continuous_file: PathBuf,
    pub input_meta_path: PathBuf,
    pub kilosort_output_directory: PathBuf,
    pub ks_make_copy: bool,
    pub noise_template_use_rf: bool,
    #[serde(rename = "catGT_run_name")]
    pub catgt_run_name: String,
    pub probe_string: String,
    pub ks_ver: String,
    pub ks_output_tag: String,
    #[serde(rename = "ks_remDup")]
    pub ks_rem_dup: u32,
    #[serde(rename = "ks_finalSplits")]
    pub ks_final_splits: u32,
    #[serde(rename = "ks_labelGood")]
    pub ks_label_good: u32,
    #[serde(rename = "ks_saveRez")]
    pub ks_save_rez: u32,
    pub ks_copy_fproc: u32,
    pub ks_helper_noise_threshold: u32,
    pub ks_minfr_goodchannels: f64,
    #[serde(rename = "ks_whiteningRadius_um")]
    pub ks_whitening_radius_um: u32,
    #[serde(rename = "ks_Th")]
    pub ks_th: String,
    #[serde(rename = "ks_CSBseed")]
    pub ks_csb_seed: u32,
    #[serde(rename = "ks_LTseed")]
    pub ks_lt_seed: u32,
    #[serde(rename = "ks_templateRadius_um")]
    pub ks_template_radius_um: u32,
    pub ks_nblocks: u32,
    #[serde(rename = "ks_CAR")]
    pub ks_car: u32,
    pub extracted_data_directory: PathBuf,
    pub event_ex_param_str: Vec<String>,
    #[serde(rename = "c_Waves_snr_um")]
    pub c_waves_snr_um: u32,
    #[serde(rename = "c_Waves_calc_half")]
    pub c_waves_calc_half: bool,
    pub qm_isi_thresh: f64,
    pub ks4_duplicate_spike_ms: f64,
    pub ks4_min_template_size_um: u32,
    pub include_pc_metrics: bool,
    pub lfp_sample_rate: u32,
}

/// Everything the sorter stage needs for one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDescriptor {
    pub run_name: String,
    pub stream: u32,
    /// `<run>_<prefix><stream>`
    pub session_id: String,
    pub region: String,
    pub tunables: RegionTunables,
    pub first_gate: u32,
    pub last_gate: u32,
    pub triggers: TriggerRange,
    /// Supercat output folder of this stream
    pub data_directory: PathBuf,
    pub continuous_file: PathBuf,
    pub meta_file: PathBuf,
    pub sorter_output_dir: PathBuf,
    pub output_tag: String,
    /// Keep a copy of the sorter output before post-processing rewrites it
    pub keep_original_output: bool,
    pub preprocessing_json: PathBuf,
    pub preprocessing_output_json: PathBuf,
    pub sorting_json: PathBuf,
    pub preprocessing: PreprocessingConfig,
    pub sorting: SortingJobConfig,
}

/// TPrime job file contents.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TPrimeJobConfig {
    pub npx_directory: PathBuf,
    pub continuous_file: PathBuf,
    pub input_meta_path: PathBuf,
    #[serde(rename = "catGT_run_name")]
    pub catgt_run_name: String,
    pub gate_string: String,
    pub kilosort_output_directory: PathBuf,
    pub extracted_data_directory: PathBuf,
    pub event_ex_param_str: String,
    pub sync_period: f64,
    #[serde(rename = "toStream_sync_params")]
    pub to_stream_sync_params: String,
    pub ks_output_tag: String,
    #[serde(rename = "catGT_out_tag")]
    pub catgt_out_tag: String,
    pub lfp_sample_rate: u32,
}

/// TPrime invocation for the primary run.
#[derive(Debug, Clone, PartialEq)]
pub struct TPrimeJob {
    pub session_id: String,
    pub input_json: PathBuf,
    pub output_json: PathBuf,
    pub config: TPrimeJobConfig,
}

/// Format a threshold list the way the sorter expects it, e.g. `[8,9]`.
fn threshold_string(threshold: &[u32]) -> String {
    let values: Vec<String> = threshold.iter().map(|t| t.to_string()).collect();
    format!("[{}]", values.join(","))
}

/// Plans sorter jobs from the pipeline configuration.
pub struct JobPlanner<'a, T: TriggerLookup> {
    config: &'a PipelineConfig,
    lookup: T,
}

impl<'a, T: TriggerLookup> JobPlanner<'a, T> {
    pub fn new(config: &'a PipelineConfig, lookup: T) -> Self {
        Self { config, lookup }
    }

    fn stream_tag(&self, stream: u32) -> String {
        format!("{}{}", self.config.discovery.stream_prefix, stream)
    }

    /// Supercat output folder of the run, `<dest>/<tag>_<run>_g<first>`.
    pub fn run_output_dir(&self, spec: &RunSpec) -> PathBuf {
        self.config.paths.dest_dir().join(format!(
            "{}_{}_g{}",
            self.config.catgt.supercat_tag,
            spec.name,
            spec.first_gate()
        ))
    }

    /// Trigger range covering every gate of the run.
    ///
    /// Each gate's raw folder for the first stream is consulted.
    pub fn trigger_range(&self, spec: &RunSpec) -> Result<TriggerRange> {
        let npx_dir = &self.config.paths.npx_dir;
        let stream = self.stream_tag(spec.streams.first);

        let mut gates = spec.gates.clone();
        gates.sort_unstable();
        gates.dedup();

        let mut range: Option<TriggerRange> = None;
        for gate in gates {
            let folder = raw_stream_folder(npx_dir, &spec.name, gate, &stream);
            let current = self.lookup.trigger_range(&spec.name, gate, &stream, &folder)?;
            debug!("Gate {} of {} has triggers {}", gate, spec.name, current);
            range = Some(match range {
                Some(r) => r.union(current),
                None => current,
            });
        }

        // Gate lists are never empty.
        range.ok_or(PlanError::NoRuns)
    }

    /// Plan one job per stream of the primary run, in stream order.
    pub fn plan(&self, specs: &[RunSpec]) -> Result<Vec<JobDescriptor>> {
        let spec = specs.first().ok_or(PlanError::NoRuns)?;
        let triggers = self.trigger_range(spec)?;
        info!(
            "Planning {} jobs for {} (gates {}..={}, triggers {})",
            spec.streams.count(),
            spec.name,
            spec.first_gate(),
            spec.last_gate(),
            triggers
        );

        spec.streams
            .indices()
            .enumerate()
            .map(|(i, stream)| self.plan_stream(spec, i, stream, triggers))
            .collect()
    }

    fn plan_stream(
        &self,
        spec: &RunSpec,
        position: usize,
        stream: u32,
        triggers: TriggerRange,
    ) -> Result<JobDescriptor> {
        let paths = &self.config.paths;
        let sorting = &self.config.sorting;
        let npx_dir = paths.npx_dir.clone();
        let dest = paths.dest_dir();
        let json_dir = paths.json_dir();

        let region = spec
            .region(position)
            .ok_or_else(|| PlanError::MissingRegionLabel {
                run: spec.name.clone(),
                stream,
            })?
            .to_string();
        let tunables = region_tunables(sorting, &region)?;

        let tag = self.stream_tag(stream);
        let run_str = format!("{}_g{}", spec.name, spec.first_gate());
        let data_directory = self.run_output_dir(spec).join(format!("{}_{}", run_str, tag));
        let continuous_file = data_directory.join(format!("{}_tcat.{}.ap.bin", run_str, tag));
        let meta_file = data_directory.join(format!("{}_tcat.{}.ap.meta", run_str, tag));

        let output_tag = sorting.ks_version.output_tag().to_string();
        let sorter_output_dir = data_directory.join(format!("Kilosort_{}_{}", tag, output_tag));
        let session_id = format!("{}_{}", spec.name, tag);
        let keep_original_output = sorting.mutates_sorter_output();

        debug!(
            "Stream {} ({}): Th={}, refPerMS={}",
            stream,
            region,
            threshold_string(&tunables.threshold),
            tunables.refractory_ms
        );

        let preprocessing = PreprocessingConfig {
            npx_directory: npx_dir.clone(),
            continuous_file: continuous_file.clone(),
            kilosort_output_directory: dest.clone(),
            input_meta_path: meta_file.clone(),
            catgt_run_name: spec.name.clone(),
            trigger_string: triggers.to_string(),
            probe_string: stream.to_string(),
            catgt_stream_string: self.config.catgt.stream_string(position == 0),
            extracted_data_directory: dest,
            lfp_sample_rate: sorting.lfp_sample_rate,
        };

        let sorting_config = SortingJobConfig {
            npx_directory: npx_dir,
            continuous_file: continuous_file.clone(),
            input_meta_path: meta_file.clone(),
            kilosort_output_directory: sorter_output_dir.clone(),
            ks_make_copy: keep_original_output,
            noise_template_use_rf: false,
            catgt_run_name: session_id.clone(),
            probe_string: spec.streams.to_string(),
            ks_ver: sorting.ks_version.as_str().to_string(),
            ks_output_tag: output_tag.clone(),
            ks_rem_dup: sorting.ks_rem_dup,
            ks_final_splits: 1,
            ks_label_good: 1,
            ks_save_rez: sorting.ks_save_rez,
            ks_copy_fproc: sorting.ks_copy_fproc,
            ks_helper_noise_threshold: 20,
            ks_minfr_goodchannels: sorting.ks_minfr_goodchannels,
            ks_whitening_radius_um: sorting.ks_whitening_radius_um,
            ks_th: threshold_string(&tunables.threshold),
            ks_csb_seed: 1,
            ks_lt_seed: 1,
            ks_template_radius_um: sorting.ks_template_radius_um,
            ks_nblocks: sorting.ks_nblocks,
            ks_car: sorting.ks_car,
            extracted_data_directory: data_directory.clone(),
            event_ex_param_str: self.config.catgt.event_extract_params.clone(),
            c_waves_snr_um: sorting.c_waves_snr_um,
            c_waves_calc_half: false,
            qm_isi_thresh: tunables.refractory_ms / 1000.0,
            ks4_duplicate_spike_ms: sorting.ks4_duplicate_spike_ms,
            ks4_min_template_size_um: sorting.ks4_min_template_size_um,
            include_pc_metrics: true,
            lfp_sample_rate: sorting.lfp_sample_rate,
        };

        Ok(JobDescriptor {
            run_name: spec.name.clone(),
            stream,
            region,
            tunables,
            first_gate: spec.first_gate(),
            last_gate: spec.last_gate(),
            triggers,
            data_directory,
            continuous_file,
            meta_file,
            sorter_output_dir,
            output_tag,
            keep_original_output,
            preprocessing_json: json_dir.join(format!("{}{}_CatGT-input.json", spec.name, stream)),
            preprocessing_output_json: json_dir
                .join(format!("{}{}_CatGT-output.json", spec.name, stream)),
            sorting_json: json_dir.join(format!("{}-input.json", session_id)),
            session_id,
            preprocessing,
            sorting: sorting_config,
        })
    }

    /// TPrime job for the primary run, if enabled.
    pub fn plan_tprime(&self, specs: &[RunSpec], jobs: &[JobDescriptor]) -> Result<Option<TPrimeJob>> {
        if !self.config.tprime.enabled {
            return Ok(None);
        }
        let spec = specs.first().ok_or(PlanError::NoRuns)?;
        let job = jobs.first().ok_or(PlanError::NoRuns)?;

        let json_dir = self.config.paths.json_dir();
        let session_id = format!("{}_TPrime", spec.name);
        let tprime = &self.config.tprime;

        let config = TPrimeJobConfig {
            npx_directory: self.config.paths.npx_dir.clone(),
            continuous_file: job.continuous_file.clone(),
            input_meta_path: job.meta_file.clone(),
            catgt_run_name: spec.name.clone(),
            gate_string: spec.gate_descriptor(),
            kilosort_output_directory: job.sorter_output_dir.clone(),
            extracted_data_directory: self.run_output_dir(spec),
            event_ex_param_str: self.config.catgt.event_extract_params.join(" "),
            sync_period: tprime.sync_period,
            to_stream_sync_params: tprime.to_stream.clone(),
            ks_output_tag: job.output_tag.clone(),
            catgt_out_tag: self.config.catgt.supercat_tag.clone(),
            lfp_sample_rate: self.config.sorting.lfp_sample_rate,
        };

        Ok(Some(TPrimeJob {
            input_json: json_dir.join(format!("{}-input.json", session_id)),
            output_json: json_dir.join(format!("{}-output.json", session_id)),
            session_id,
            config,
        }))
    }
}

/// Write both job files of every planned stream.
pub fn write_job_configs(jobs: &[JobDescriptor]) -> Result<()> {
    for job in jobs {
        info!("Writing job files for {}", job.session_id);
        writers::write_job_config(&job.preprocessing_json, &job.preprocessing)?;
        writers::write_job_config(&job.sorting_json, &job.sorting)?;
    }
    Ok(())
}

pub fn write_tprime_config(job: &TPrimeJob) -> Result<()> {
    writers::write_job_config(&job.input_json, &job.config)?;
    Ok(())
}

/// Raw stream folder of `stream` in one gate, `<npx>/<run>_g<gate>/<run>_g<gate>_<tag>`.
pub fn raw_stream_folder(npx_dir: &Path, run: &str, gate: u32, stream_tag: &str) -> PathBuf {
    let run_str = format!("{}_g{}", run, gate);
    npx_dir.join(&run_str).join(format!("{}_{}", run_str, stream_tag))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ranges::FolderTriggerLookup;
    use crate::core::run_spec::StreamRange;
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::fs::{self, File};
    use tempfile::TempDir;

    /// Returns a fixed range per gate and records the folders it was asked about.
    struct FixedTriggers {
        per_gate: BTreeMap<u32, TriggerRange>,
        folders: RefCell<Vec<PathBuf>>,
    }

    impl TriggerLookup for &FixedTriggers {
        fn trigger_range(
            &self,
            _run: &str,
            gate: u32,
            _stream: &str,
            folder: &Path,
        ) -> crate::core::ranges::Result<TriggerRange> {
            self.folders.borrow_mut().push(folder.to_path_buf());
            Ok(self.per_gate[&gate])
        }
    }

    fn config(root: &Path) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.paths.npx_dir = root.to_path_buf();
        config.paths.dest = Some(root.join("out"));
        config
    }

    fn spec(name: &str, gates: Vec<u32>, regions: &[&str]) -> RunSpec {
        RunSpec {
            name: name.to_string(),
            gates,
            streams: StreamRange::from_count(regions.len() as u32),
            regions: regions.iter().map(|r| r.to_string()).collect(),
            created: Vec::new(),
        }
    }

    fn explicit() -> FolderTriggerLookup {
        FolderTriggerLookup {
            spec: Some(TriggerRange { first: 0, last: 0 }),
        }
    }

    #[test]
    fn test_region_tunables_fallback() {
        let mut sorting = SortingConfig::default();
        sorting.thresholds.insert("cortex".to_string(), vec![9, 10]);
        sorting.refractory_ms.insert("cortex".to_string(), 1.5);

        let cortex = region_tunables(&sorting, "cortex").unwrap();
        assert_eq!(cortex.threshold, vec![9, 10]);
        assert_eq!(cortex.refractory_ms, 1.5);

        let unknown = region_tunables(&sorting, "striatum").unwrap();
        assert_eq!(unknown.threshold, vec![8, 9]);
        assert_eq!(unknown.refractory_ms, 2.0);
    }

    #[test]
    fn test_region_tunables_without_default() {
        let mut sorting = SortingConfig::default();
        sorting.thresholds.remove(DEFAULT_REGION);

        let err = region_tunables(&sorting, "striatum").unwrap_err();
        assert!(matches!(
            err,
            PlanError::UnknownRegion { ref label, table: "thresholds" } if label == "striatum"
        ));
        assert!(region_tunables(&sorting, "cortex").is_ok());
    }

    #[test]
    fn test_plan_paths() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(temp_dir.path());
        let planner = JobPlanner::new(&config, explicit());

        let specs = vec![spec("sessionA", vec![0], &["hippocampus", "cortex"])];
        let jobs = planner.plan(&specs).unwrap();

        assert_eq!(jobs.len(), 2);
        let out = temp_dir.path().join("out");
        let job = &jobs[1];
        assert_eq!(job.session_id, "sessionA_imec1");
        assert_eq!(
            job.data_directory,
            out.join("supercat_sessionA_g0").join("sessionA_g0_imec1")
        );
        assert_eq!(
            job.continuous_file,
            job.data_directory.join("sessionA_g0_tcat.imec1.ap.bin")
        );
        assert_eq!(job.meta_file, job.data_directory.join("sessionA_g0_tcat.imec1.ap.meta"));
        assert_eq!(job.sorter_output_dir, job.data_directory.join("Kilosort_imec1_ks4"));
        assert_eq!(
            job.sorting_json,
            out.join("preprocessing_json").join("sessionA_imec1-input.json")
        );
        assert_eq!(
            job.preprocessing_json,
            out.join("preprocessing_json").join("sessionA1_CatGT-input.json")
        );
        assert!(job.keep_original_output);
        assert_eq!(job.sorting.ks_th, "[8,9]");
        assert_eq!(job.sorting.qm_isi_thresh, 0.002);
        assert_eq!(job.sorting.probe_string, "0:1");
    }

    #[test]
    fn test_jobs_carry_region_tunables() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = config(temp_dir.path());
        config.sorting.thresholds.insert("cortex".to_string(), vec![9, 10]);
        config.sorting.refractory_ms.insert("cortex".to_string(), 1.5);
        let planner = JobPlanner::new(&config, explicit());

        let jobs = planner
            .plan(&[spec("sessionA", vec![0], &["cortex", "striatum"])])
            .unwrap();

        assert_eq!(jobs[0].tunables, region_tunables(&config.sorting, "cortex").unwrap());
        assert_eq!(jobs[0].tunables.threshold, vec![9, 10]);
        assert_eq!(jobs[1].tunables.threshold, vec![8, 9]);
        assert_eq!(jobs[1].tunables.refractory_ms, 2.0);
    }

    #[test]
    fn test_plan_uses_primary_run_only() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(temp_dir.path());
        let planner = JobPlanner::new(&config, explicit());

        let specs = vec![
            spec("pre", vec![0], &["cortex"]),
            spec("maze", vec![0], &["cortex", "cortex", "cortex"]),
        ];
        let jobs = planner.plan(&specs).unwrap();

        assert_eq!(jobs.len(), 1);
        assert!(jobs.iter().all(|j| j.run_name == "pre"));
    }

    #[test]
    fn test_trigger_range_spans_all_gates() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(temp_dir.path());
        let lookup = FixedTriggers {
            per_gate: [
                (0, TriggerRange { first: 1, last: 3 }),
                (1, TriggerRange { first: 0, last: 2 }),
            ]
            .into_iter()
            .collect(),
            folders: RefCell::new(Vec::new()),
        };
        let planner = JobPlanner::new(&config, &lookup);

        let specs = vec![spec("sessionA", vec![1, 0], &["hippocampus", "hippocampus"])];
        let jobs = planner.plan(&specs).unwrap();

        assert!(jobs.iter().all(|j| j.triggers == TriggerRange { first: 0, last: 3 }));
        assert!(jobs.iter().all(|j| j.first_gate == 0 && j.last_gate == 1));
        assert_eq!(jobs[0].preprocessing.trigger_string, "0,3");
        assert_eq!(
            lookup.folders.borrow().clone(),
            vec![
                raw_stream_folder(temp_dir.path(), "sessionA", 0, "imec0"),
                raw_stream_folder(temp_dir.path(), "sessionA", 1, "imec0"),
            ]
        );
    }

    #[test]
    fn test_trigger_range_from_disk() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(temp_dir.path());
        let folder = raw_stream_folder(temp_dir.path(), "run", 0, "imec0");
        fs::create_dir_all(&folder).unwrap();
        for t in 0..3 {
            File::create(folder.join(format!("run_g0_t{}.imec0.ap.bin", t))).unwrap();
        }

        let planner = JobPlanner::new(&config, FolderTriggerLookup::default());
        let range = planner.trigger_range(&spec("run", vec![0], &["cortex"])).unwrap();
        assert_eq!(range, TriggerRange { first: 0, last: 2 });
    }

    #[test]
    fn test_unknown_region_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = config(temp_dir.path());
        config.sorting.thresholds.remove(DEFAULT_REGION);
        let planner = JobPlanner::new(&config, explicit());

        let specs = vec![spec("sessionA", vec![0], &["hippocampus", "striatum"])];
        let err = planner.plan(&specs).unwrap_err();

        assert!(matches!(err, PlanError::UnknownRegion { .. }));
        assert!(!config.paths.json_dir().exists());
    }

    #[test]
    fn test_write_job_configs() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(temp_dir.path());
        let planner = JobPlanner::new(&config, explicit());

        let jobs = planner
            .plan(&[spec("sessionA", vec![0], &["hippocampus", "cortex"])])
            .unwrap();
        write_job_configs(&jobs).unwrap();

        for job in &jobs {
            assert!(job.preprocessing_json.exists());
            let content = fs::read_to_string(&job.sorting_json).unwrap();
            let value: serde_json::Value = serde_json::from_str(&content).unwrap();
            assert_eq!(value["ks_Th"], "[8,9]");
            assert_eq!(value["catGT_run_name"], job.session_id.as_str());
            assert_eq!(value["ks_make_copy"], true);
        }
    }

    #[test]
    fn test_keep_original_output_flag() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = config(temp_dir.path());
        config.sorting.modules = vec!["ks4_helper".to_string()];
        let planner = JobPlanner::new(&config, explicit());

        let jobs = planner.plan(&[spec("s", vec![0], &["cortex"])]).unwrap();
        assert!(!jobs[0].keep_original_output);
        assert!(!jobs[0].sorting.ks_make_copy);
    }

    #[test]
    fn test_plan_tprime() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = config(temp_dir.path());
        let specs = vec![spec("sessionA", vec![0, 1], &["cortex"])];

        let planner = JobPlanner::new(&config, explicit());
        let jobs = planner.plan(&specs).unwrap();
        assert!(planner.plan_tprime(&specs, &jobs).unwrap().is_none());

        config.tprime.enabled = true;
        let planner = JobPlanner::new(&config, explicit());
        let tprime = planner.plan_tprime(&specs, &jobs).unwrap().unwrap();
        assert_eq!(tprime.session_id, "sessionA_TPrime");
        assert_eq!(tprime.config.gate_string, "0,1");
        assert_eq!(tprime.config.event_ex_param_str, "-xd=2,0,384,6,500 -xd=1,0,6,12,0");
        assert_eq!(
            tprime.config.extracted_data_directory,
            temp_dir.path().join("out").join("supercat_sessionA_g0")
        );
    }
}
