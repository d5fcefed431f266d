//! Command-line interface for the SpikeGLX pipeline.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};
use std::path::PathBuf;
use std::time::Instant;

use crate::pipeline::{self, Pipeline, Stages};
use crate::{PipelineConfig, PipelineDriver};

#[derive(Parser)]
#[command(name = "sglx-pipeline")]
#[command(about = "CatGT and Kilosort orchestration for SpikeGLX recordings", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration to a YAML file
    InitConfig {
        /// Output YAML path
        path: PathBuf,
    },

    /// List the runs found in the data directory, in processing order
    Scan {
        /// Data directory (overrides paths.npx_dir)
        directory: Option<PathBuf>,
    },

    /// Print the commands and sorter jobs a run would execute
    Plan,

    /// Run the pipeline
    Run {
        /// Do not run CatGT on the individual runs
        #[arg(long)]
        skip_pass_one: bool,
        /// Do not run supercat
        #[arg(long)]
        skip_pass_two: bool,
        /// Do not run the sorter modules
        #[arg(long)]
        skip_sorting: bool,
        /// Keep the pass-one output folders
        #[arg(long)]
        keep_intermediate: bool,
    },
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<62} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 39 {
            let head: String = value.chars().take(36).collect();
            format!("{}...", head)
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<39} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    match path {
        Some(path) => {
            let config = PipelineConfig::from_yaml(path)
                .map_err(|e| anyhow!("failed to load config from {}: {}", path.display(), e))?;
            info!("Loaded config from: {}", path.display());
            Ok(config)
        }
        None => Ok(PipelineConfig::default()),
    }
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    let result = load_config(cli.config.as_ref()).and_then(|config| match cli.command {
        Commands::InitConfig { path } => cmd_init_config(&path),
        Commands::Scan { directory } => cmd_scan(directory, config),
        Commands::Plan => cmd_plan(&config),
        Commands::Run {
            skip_pass_one,
            skip_pass_two,
            skip_sorting,
            keep_intermediate,
        } => {
            let mut stages = Stages::from_config(&config);
            stages.pass_one &= !skip_pass_one;
            stages.pass_two &= !skip_pass_two;
            stages.sorting &= !skip_sorting;
            stages.cleanup &= !keep_intermediate;
            cmd_run(&config, stages)
        }
    });

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn cmd_init_config(path: &PathBuf) -> Result<()> {
    PipelineConfig::default()
        .to_yaml(path)
        .map_err(|e| anyhow!("failed to write config to {}: {}", path.display(), e))?;

    print_summary(
        "Default Config Written",
        &[("Path", path.display().to_string())],
    );
    Ok(())
}

fn cmd_scan(directory: Option<PathBuf>, mut config: PipelineConfig) -> Result<()> {
    let start = Instant::now();
    if let Some(directory) = directory {
        config.paths.npx_dir = directory;
    }

    let spinner = create_spinner("Scanning for recording segments...");
    let specs = pipeline::resolve_runs(&config);
    spinner.finish_and_clear();
    let specs = specs.with_context(|| format!("scanning {}", config.paths.npx_dir.display()))?;

    for (i, spec) in specs.iter().enumerate() {
        println!("{:>3}. {}", i + 1, spec);
    }

    let gates: usize = specs.iter().map(|s| s.gates.len()).sum();
    print_summary(
        "Scan Complete",
        &[
            ("Directory", config.paths.npx_dir.display().to_string()),
            ("Runs", specs.len().to_string()),
            ("Gates", gates.to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}

fn cmd_plan(config: &PipelineConfig) -> Result<()> {
    let start = Instant::now();

    let spinner = create_spinner("Resolving runs...");
    let specs = pipeline::resolve_runs(config);
    spinner.finish_and_clear();
    let specs = specs.context("resolving runs")?;

    let commands = pipeline::plan_commands(config, &specs).context("building CatGT commands")?;

    println!("Pass 1 ({} commands):", commands.pass_one.len());
    for command in &commands.pass_one {
        println!("  {}", command);
    }
    println!("Pass 2:");
    println!("  {}", commands.supercat);

    let mut job_count = 0;
    if config.sorting.enabled {
        let (jobs, tprime) = pipeline::plan_jobs(config, &specs).context("planning sorter jobs")?;
        println!("Sorter jobs:");
        for job in &jobs {
            let tunables = &job.tunables;
            println!(
                "  {} [{}] triggers {} Th={:?} refPerMS={}",
                job.session_id, job.region, job.triggers, tunables.threshold, tunables.refractory_ms
            );
            println!("    {}", job.continuous_file.display());
        }
        if let Some(tprime) = &tprime {
            println!("  {} -> {}", tprime.session_id, tprime.input_json.display());
        }
        job_count = jobs.len();
    }

    print_summary(
        "Plan Complete",
        &[
            ("Runs", specs.len().to_string()),
            ("Pass 1 commands", commands.pass_one.len().to_string()),
            ("Sorter jobs", job_count.to_string()),
            ("Destination", config.paths.dest_dir().display().to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}

fn cmd_run(config: &PipelineConfig, stages: Stages) -> Result<()> {
    let start = Instant::now();

    let spinner = create_spinner("Resolving runs...");
    let specs = pipeline::resolve_runs(config);
    spinner.finish_and_clear();
    let specs = specs.context("resolving runs")?;

    println!("Processing {} runs:", specs.len());
    for spec in &specs {
        println!("  {}", spec);
    }

    let log_path = config.paths.log_path();
    let driver = PipelineDriver::new(&log_path);
    let mut pipeline = Pipeline::new(config, driver).with_stages(stages);

    let report = pipeline.run(&specs).with_context(|| {
        format!(
            "pipeline stopped in state {} (log: {})",
            pipeline.state(),
            log_path.display()
        )
    })?;

    print_summary(
        "Pipeline Complete",
        &[
            ("Runs", specs.len().to_string()),
            ("Pass 1 commands", report.pass_one_commands.to_string()),
            ("Supercat", report.supercat_ran.to_string()),
            ("Streams sorted", report.sorted_sessions.len().to_string()),
            ("Modules run", report.modules_run.to_string()),
            ("Folders removed", report.removed.len().to_string()),
            ("Log", log_path.display().to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}
