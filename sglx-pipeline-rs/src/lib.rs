//! Orchestration of SpikeGLX preprocessing and spike sorting.
//!
//! This crate provides tools for:
//! - Discovering recording segments and grouping them into ordered runs
//! - Building CatGT per-run (pass one) and supercat (pass two) invocations
//! - Running external tools sequentially with an append-only log
//! - Planning and running the per-stream sorter jobs
//! - Removing pass-one intermediates after a successful supercat
//!
//! # Example
//!
//! ```no_run
//! use sglx_pipeline::{pipeline, PipelineConfig, PipelineDriver};
//!
//! let config = PipelineConfig::from_yaml("pipeline.yaml").unwrap();
//! let specs = pipeline::resolve_runs(&config).unwrap();
//! let driver = PipelineDriver::new(config.paths.log_path());
//! let report = pipeline::Pipeline::new(&config, driver).run(&specs).unwrap();
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod pipeline;
pub mod processors;

pub use config::{PipelineConfig, SortingConfig};
pub use crate::core::run_spec::RunSpec;
pub use pipeline::{Pipeline, PipelineError, PipelineState};
pub use processors::driver::PipelineDriver;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
