//! Writers for job-config JSON files and the CSV run summary.
//!
//! Job-config files are the only interface to the sorter stage: one JSON
//! object per stream per stage. The run summary gets one row per sorter
//! module invocation and is appended to across pipeline runs.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write data to file.
    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error.
    #[error("JSON write error for '{path}': {source}")]
    JsonError {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// CSV writing error.
    #[error("CSV write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Creates parent directories for a file path if they don't exist.
pub fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// Creates a buffered writer for the given path.
fn create_buffered_writer(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(BufWriter::new(file))
}

/// Write a job-config file as pretty-printed JSON, replacing any existing file.
///
/// # Arguments
///
/// * `path` - Output file path (parent directories will be created if needed)
/// * `config` - Any serializable job description
///
/// # Errors
///
/// Returns an error if the directories or file cannot be created, or the
/// value cannot be serialized.
pub fn write_job_config<T: Serialize>(path: &Path, config: &T) -> Result<()> {
    ensure_parent_dirs(path)?;
    let mut writer = create_buffered_writer(path)?;
    let path_str = path.display().to_string();

    serde_json::to_writer_pretty(&mut writer, config).map_err(|e| WriteError::JsonError {
        path: path_str.clone(),
        source: e,
    })?;
    writeln!(writer).map_err(|e| WriteError::WriteFile {
        path: path_str.clone(),
        source: e,
    })?;

    writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str,
        source: e,
    })?;

    Ok(())
}

/// One row of the run summary.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SummaryRow {
    pub timestamp: String,
    pub run: String,
    pub probe: String,
    pub module: String,
    pub elapsed_secs: f64,
}

/// Append rows to the CSV run summary.
///
/// The header is written only when the file is created.
pub fn append_summary_rows(path: &Path, rows: &[SummaryRow]) -> Result<()> {
    ensure_parent_dirs(path)?;
    let path_str = path.display().to_string();
    let is_new = !path.exists();

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| WriteError::CreateFile {
            path: path_str.clone(),
            source: e,
        })?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(is_new)
        .from_writer(BufWriter::new(file));

    for row in rows {
        writer.serialize(row).map_err(|e| WriteError::CsvError {
            path: path_str.clone(),
            source: e,
        })?;
    }

    writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str,
        source: e,
    })?;

    Ok(())
}
