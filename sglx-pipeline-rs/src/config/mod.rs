//! Configuration types for the SpikeGLX processing pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Region label used when a stream's own label has no tunables.
pub const DEFAULT_REGION: &str = "default";

/// Input and output locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory containing the raw run folders (e.g. `run_g0/run_g0_imec0`)
    #[serde(default = "default_npx_dir")]
    pub npx_dir: PathBuf,

    /// Output directory; defaults to `<npx_dir>/preprocessing_output`
    #[serde(default)]
    pub dest: Option<PathBuf>,

    /// Subdirectory of `dest` holding the per-stream job-config files
    #[serde(default = "default_json_dir_name")]
    pub json_dir_name: String,

    /// Append-only log receiving all external tool output
    #[serde(default = "default_log_name")]
    pub log_name: String,

    /// CSV file with one row per sorter module invocation
    #[serde(default = "default_summary_name")]
    pub summary_name: String,
}

fn default_npx_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_json_dir_name() -> String {
    "preprocessing_json".to_string()
}

fn default_log_name() -> String {
    "pipeline_log.txt".to_string()
}

fn default_summary_name() -> String {
    "pipeline_summary.csv".to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            npx_dir: default_npx_dir(),
            dest: None,
            json_dir_name: default_json_dir_name(),
            log_name: default_log_name(),
            summary_name: default_summary_name(),
        }
    }
}

impl PathsConfig {
    /// Resolved output directory.
    pub fn dest_dir(&self) -> PathBuf {
        self.dest
            .clone()
            .unwrap_or_else(|| self.npx_dir.join("preprocessing_output"))
    }

    pub fn json_dir(&self) -> PathBuf {
        self.dest_dir().join(&self.json_dir_name)
    }

    pub fn log_path(&self) -> PathBuf {
        self.dest_dir().join(&self.log_name)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.dest_dir().join(&self.summary_name)
    }
}

/// A run entered by hand instead of discovered from disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManualRun {
    pub name: String,
    /// Gate descriptor, e.g. `"0"` or `"0,1"`
    pub gates: String,
    /// Probe range, e.g. `"0:1"`
    pub probes: String,
    /// One region label per probe
    pub regions: Vec<String>,
}

/// How run folders are recognised on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Suffix identifying acquisition metadata files
    #[serde(default = "default_metadata_suffix")]
    pub metadata_suffix: String,

    /// Metadata field holding the file creation time
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,

    /// Prefix of per-stream subfolders (`<segment>_<prefix><index>`)
    #[serde(default = "default_stream_prefix")]
    pub stream_prefix: String,

    /// Region label assigned to every discovered stream
    #[serde(default = "default_region")]
    pub default_region: String,

    /// When set, these runs are used as-is and the data directory is not scanned
    #[serde(default)]
    pub runs: Option<Vec<ManualRun>>,
}

fn default_metadata_suffix() -> String {
    ".meta".to_string()
}

fn default_timestamp_field() -> String {
    "fileCreateTime".to_string()
}

fn default_stream_prefix() -> String {
    "imec".to_string()
}

fn default_region() -> String {
    "hippocampus".to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            metadata_suffix: default_metadata_suffix(),
            timestamp_field: default_timestamp_field(),
            stream_prefix: default_stream_prefix(),
            default_region: default_region(),
            runs: None,
        }
    }
}

/// CatGT concatenation (pass one) and supercat (pass two) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatGtConfig {
    /// Path to the CatGT executable
    #[serde(default = "default_catgt_executable")]
    pub executable: PathBuf,

    #[serde(default = "default_true")]
    pub pass_one: bool,

    #[serde(default = "default_true")]
    pub pass_two: bool,

    /// Per-run processing flags, passed verbatim
    #[serde(default = "default_process_params")]
    pub process_params: Vec<String>,

    /// Cross-run merge flags, passed verbatim
    #[serde(default = "default_supercat_params")]
    pub supercat_params: Vec<String>,

    /// Event extraction flags appended to both passes
    #[serde(default = "default_event_extract_params")]
    pub event_extract_params: Vec<String>,

    /// Also produce LF band output
    #[serde(default = "default_true")]
    pub process_lf: bool,

    /// AP to LF downsampling factor, used when `process_lf` is set
    #[serde(default = "default_downsample_factor")]
    pub downsample_factor: u32,

    #[serde(default)]
    pub ni_present: bool,

    /// Prefix CatGT gives pass-one output folders
    #[serde(default = "default_intermediate_prefix")]
    pub intermediate_prefix: String,

    /// Prefix CatGT gives the supercat output folder
    #[serde(default = "default_supercat_tag")]
    pub supercat_tag: String,
}

fn default_true() -> bool {
    true
}

fn default_catgt_executable() -> PathBuf {
    PathBuf::from("CatGT")
}

fn default_process_params() -> Vec<String> {
    [
        "-t=0,0",
        "-prb_fld",
        "-ap",
        "-ob",
        "-obx=0",
        "-out_prb_fld",
        "-gblcar",
        "-lffilter=butter,4,0.1,450",
        "-pass1_force_ni_ob_bin",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_supercat_params() -> Vec<String> {
    [
        "-ap",
        "-ob",
        "-obx=0",
        "-supercat_trim_edges",
        "-prb_fld",
        "-out_prb_fld",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_event_extract_params() -> Vec<String> {
    vec!["-xd=2,0,384,6,500".to_string(), "-xd=1,0,6,12,0".to_string()]
}

fn default_downsample_factor() -> u32 {
    24
}

fn default_intermediate_prefix() -> String {
    "catgt".to_string()
}

fn default_supercat_tag() -> String {
    "supercat".to_string()
}

impl Default for CatGtConfig {
    fn default() -> Self {
        Self {
            executable: default_catgt_executable(),
            pass_one: true,
            pass_two: true,
            process_params: default_process_params(),
            supercat_params: default_supercat_params(),
            event_extract_params: default_event_extract_params(),
            process_lf: true,
            downsample_factor: default_downsample_factor(),
            ni_present: false,
            intermediate_prefix: default_intermediate_prefix(),
            supercat_tag: default_supercat_tag(),
        }
    }
}

impl CatGtConfig {
    /// Full parameter list appended to every pass-one command.
    pub fn pass_one_args(&self, dest: &Path) -> Vec<String> {
        let mut params = self.process_params.clone();
        params.push(format!("-dest={}", dest.display()));
        params.extend(self.event_extract_params.iter().cloned());
        if self.process_lf {
            params.push("-lf".to_string());
            params.push(format!("-ap2lf_dwnsmp={}", self.downsample_factor));
        }
        if self.ni_present {
            params.push("-ni".to_string());
        }
        params
    }

    /// Full parameter list appended to the supercat command.
    pub fn supercat_args(&self, dest: &Path) -> Vec<String> {
        let mut params = self.supercat_params.clone();
        params.push(format!("-dest={}", dest.display()));
        if self.process_lf {
            params.push("-lf".to_string());
        }
        if self.ni_present {
            params.push("-ni".to_string());
        }
        params.extend(self.event_extract_params.iter().cloned());
        params
    }

    /// Stream selection recorded in the preprocessing job file.
    pub fn stream_string(&self, first_stream: bool) -> String {
        let mut streams = if first_stream && self.ni_present {
            "-ap -ni".to_string()
        } else {
            "-ap".to_string()
        };
        if self.process_lf {
            streams.push_str(" -lf");
        }
        streams
    }
}

/// Kilosort release driving the output tag and parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KilosortVersion {
    #[serde(rename = "2.0")]
    V2_0,
    #[serde(rename = "2.5")]
    V2_5,
    #[serde(rename = "3.0")]
    V3_0,
    #[serde(rename = "4")]
    V4,
}

impl KilosortVersion {
    /// Tag used in sorter output folder names.
    pub fn output_tag(self) -> &'static str {
        match self {
            KilosortVersion::V2_0 => "ks2",
            KilosortVersion::V2_5 => "ks25",
            KilosortVersion::V3_0 => "ks3",
            KilosortVersion::V4 => "ks4",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KilosortVersion::V2_0 => "2.0",
            KilosortVersion::V2_5 => "2.5",
            KilosortVersion::V3_0 => "3.0",
            KilosortVersion::V4 => "4",
        }
    }
}

/// Sorter and post-processing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Interpreter used to launch sorter modules
    #[serde(default = "default_python")]
    pub python: String,

    /// Package containing the sorter modules
    #[serde(default = "default_module_package")]
    pub module_package: String,

    /// Modules run per stream, in order
    #[serde(default = "default_modules")]
    pub modules: Vec<String>,

    #[serde(default = "default_ks_version")]
    pub ks_version: KilosortVersion,

    /// Trigger range to sort: `start,end` or explicit `first,last`
    #[serde(default = "default_triggers")]
    pub triggers: String,

    /// Detection thresholds per region label
    #[serde(default = "default_thresholds")]
    pub thresholds: BTreeMap<String, Vec<u32>>,

    /// Refractory period (ms) per region label
    #[serde(default = "default_refractory_ms")]
    pub refractory_ms: BTreeMap<String, f64>,

    #[serde(default)]
    pub ks_rem_dup: u32,
    #[serde(default = "default_one")]
    pub ks_save_rez: u32,
    #[serde(default)]
    pub ks_copy_fproc: u32,
    #[serde(default = "default_radius_um")]
    pub ks_template_radius_um: u32,
    #[serde(default = "default_radius_um")]
    pub ks_whitening_radius_um: u32,
    #[serde(default = "default_minfr_goodchannels")]
    pub ks_minfr_goodchannels: f64,
    /// Common average referencing; already done by CatGT
    #[serde(default)]
    pub ks_car: u32,
    #[serde(default = "default_nblocks")]
    pub ks_nblocks: u32,
    #[serde(default = "default_duplicate_spike_ms")]
    pub ks4_duplicate_spike_ms: f64,
    #[serde(default = "default_min_template_size_um")]
    pub ks4_min_template_size_um: u32,

    #[serde(default = "default_c_waves_snr_um")]
    pub c_waves_snr_um: u32,

    #[serde(default = "default_lfp_sample_rate")]
    pub lfp_sample_rate: u32,
}

fn default_python() -> String {
    "python".to_string()
}

fn default_module_package() -> String {
    "ecephys_spike_sorting.modules".to_string()
}

fn default_modules() -> Vec<String> {
    vec!["ks4_helper".to_string(), "kilosort_postprocessing".to_string()]
}

fn default_ks_version() -> KilosortVersion {
    KilosortVersion::V4
}

fn default_triggers() -> String {
    "start,end".to_string()
}

fn default_thresholds() -> BTreeMap<String, Vec<u32>> {
    ["default", "cortex", "hippocampus", "thalamus"]
        .iter()
        .map(|region| (region.to_string(), vec![8, 9]))
        .collect()
}

fn default_refractory_ms() -> BTreeMap<String, f64> {
    ["default", "cortex", "hippocampus", "thalamus"]
        .iter()
        .map(|region| (region.to_string(), 2.0))
        .collect()
}

fn default_one() -> u32 {
    1
}

fn default_radius_um() -> u32 {
    163
}

fn default_minfr_goodchannels() -> f64 {
    0.1
}

fn default_nblocks() -> u32 {
    6
}

fn default_duplicate_spike_ms() -> f64 {
    0.25
}

fn default_min_template_size_um() -> u32 {
    10
}

fn default_c_waves_snr_um() -> u32 {
    160
}

fn default_lfp_sample_rate() -> u32 {
    1250
}

impl Default for SortingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            python: default_python(),
            module_package: default_module_package(),
            modules: default_modules(),
            ks_version: default_ks_version(),
            triggers: default_triggers(),
            thresholds: default_thresholds(),
            refractory_ms: default_refractory_ms(),
            ks_rem_dup: 0,
            ks_save_rez: default_one(),
            ks_copy_fproc: 0,
            ks_template_radius_um: default_radius_um(),
            ks_whitening_radius_um: default_radius_um(),
            ks_minfr_goodchannels: default_minfr_goodchannels(),
            ks_car: 0,
            ks_nblocks: default_nblocks(),
            ks4_duplicate_spike_ms: default_duplicate_spike_ms(),
            ks4_min_template_size_um: default_min_template_size_um(),
            c_waves_snr_um: default_c_waves_snr_um(),
            lfp_sample_rate: default_lfp_sample_rate(),
        }
    }
}

impl SortingConfig {
    /// Whether an active module rewrites the sorter output in place.
    pub fn mutates_sorter_output(&self) -> bool {
        self.modules
            .iter()
            .any(|m| m == "kilosort_postprocessing" || m == "noise_templates")
    }
}

/// TPrime synchronisation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TPrimeConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Period of the SYNC wave in seconds
    #[serde(default = "default_sync_period")]
    pub sync_period: f64,

    /// Stream all events are mapped onto (`ni`, `imec<N>` or `obx<N>`)
    #[serde(default = "default_to_stream")]
    pub to_stream: String,
}

fn default_sync_period() -> f64 {
    1.0
}

fn default_to_stream() -> String {
    "imec0".to_string()
}

impl Default for TPrimeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sync_period: default_sync_period(),
            to_stream: default_to_stream(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Remove pass-one output folders after a successful supercat
    #[serde(default = "default_true")]
    pub delete_intermediate: bool,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            delete_intermediate: true,
        }
    }
}

/// Main pipeline configuration combining all sub-configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub catgt: CatGtConfig,

    #[serde(default)]
    pub sorting: SortingConfig,

    #[serde(default)]
    pub tprime: TPrimeConfig,

    #[serde(default)]
    pub cleanup: CleanupConfig,
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
