//! Discovery of acquisition segments in a SpikeGLX data directory.
//!
//! A segment is one `<run>_g<gate>` folder written by the acquisition
//! software. It is recognised by the metadata files it contains directly;
//! each parallel stream is recorded in a `<segment>_<prefix><index>` subfolder.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use log::debug;
use regex::Regex;
use thiserror::Error;

use crate::config::DiscoveryConfig;

/// Format of the `fileCreateTime` metadata value.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Errors that can occur while scanning for segments.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to read directory '{path}': {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read metadata file '{path}': {source}")]
    ReadMetadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("run folder '{0}' does not end in _g<gate>")]
    MissingGateSuffix(String),

    #[error("no metadata file in '{folder}' has a {field} entry")]
    MissingTimestamp { folder: String, field: String },

    #[error("invalid timestamp '{value}' in '{path}'")]
    InvalidTimestamp { path: PathBuf, value: String },

    #[error("run folder '{0}' has no stream subfolders")]
    NoStreams(String),

    #[error("invalid folder pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Result type for scan operations.
pub type Result<T> = std::result::Result<T, ScanError>;

/// One physical acquisition folder.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Folder name, e.g. `sessionA_g0`.
    pub folder: String,
    /// Folder name without the `_g<gate>` suffix.
    pub run_name: String,
    pub gate: u32,
    /// Number of co-recorded stream subfolders.
    pub stream_count: u32,
    /// `(metadata file name, creation time)` for every metadata file that
    /// carried a timestamp, in file name order.
    pub timestamps: Vec<(String, NaiveDateTime)>,
}

impl Segment {
    /// Timestamp used to order this segment: the first metadata file's.
    pub fn created(&self) -> Option<NaiveDateTime> {
        self.timestamps.first().map(|(_, ts)| *ts)
    }
}

/// Read the value of `field` from a `key=value` metadata file.
///
/// Lines are decoded lossily; only the requested field has to be valid text.
/// Returns `Ok(None)` if the field is absent.
pub fn read_metadata_field(path: &Path, field: &str) -> Result<Option<String>> {
    let read_error = |source| ScanError::ReadMetadata {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = BufReader::new(File::open(path).map_err(read_error)?);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).map_err(read_error)? == 0 {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&buf);
        if let Some((key, value)) = line.split_once('=') {
            if key.trim() == field {
                return Ok(Some(value.trim().to_string()));
            }
        }
    }
}

/// Sorted names of the entries in `dir` matching `keep`.
fn sorted_entries<F>(dir: &Path, keep: F) -> Result<Vec<String>>
where
    F: Fn(&Path) -> bool,
{
    let read_error = |source| ScanError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };

    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_error)? {
        let path = entry.map_err(read_error)?.path();
        if !keep(path.as_path()) {
            continue;
        }
        if let Some(name) = path.file_name() {
            names.push(name.to_string_lossy().into_owned());
        }
    }

    names.sort();
    Ok(names)
}

/// Finds segments under a data directory.
///
/// The folder-name pattern is compiled once and reused for every folder.
pub struct SegmentScanner<'c> {
    config: &'c DiscoveryConfig,
    gate_suffix: Regex,
}

impl<'c> SegmentScanner<'c> {
    pub fn new(config: &'c DiscoveryConfig) -> Result<Self> {
        Ok(Self {
            config,
            gate_suffix: Regex::new(r"^(.+)_g(\d+)$")?,
        })
    }

    /// Split a folder name into run name and gate index.
    ///
    /// Matches a trailing `_g<digits>` suffix. Returns `None` when the name
    /// has no such suffix or the run name would be empty.
    pub fn split_gate_suffix<'f>(&self, folder: &'f str) -> Option<(&'f str, u32)> {
        let captures = self.gate_suffix.captures(folder)?;
        let run = captures.get(1)?.as_str();
        let gate = captures.get(2)?.as_str().parse().ok()?;
        Some((run, gate))
    }

    /// Count `<folder>_<prefix><digits>` subdirectories of a segment.
    pub fn count_streams(&self, segment_dir: &Path, folder: &str) -> Result<u32> {
        let pattern = Regex::new(&format!(
            r"^{}_{}\d+$",
            regex::escape(folder),
            regex::escape(&self.config.stream_prefix)
        ))?;

        let streams = sorted_entries(segment_dir, |p| p.is_dir())?
            .iter()
            .filter(|name| pattern.is_match(name))
            .count();
        Ok(streams as u32)
    }

    /// Read one candidate folder. Returns `Ok(None)` if it is not a run folder.
    pub fn read_segment(&self, dir: &Path) -> Result<Option<Segment>> {
        let config = self.config;
        let folder = match dir.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => return Ok(None),
        };

        let metadata_files = sorted_entries(dir, |p| {
            p.is_file()
                && p.file_name()
                    .map(|n| n.to_string_lossy().ends_with(&config.metadata_suffix))
                    .unwrap_or(false)
        })?;

        if metadata_files.is_empty() {
            debug!("Skipping {}: no {} files", folder, config.metadata_suffix);
            return Ok(None);
        }

        let (run_name, gate) = self
            .split_gate_suffix(&folder)
            .ok_or_else(|| ScanError::MissingGateSuffix(folder.clone()))?;

        let mut timestamps = Vec::with_capacity(metadata_files.len());
        for name in metadata_files {
            let path = dir.join(&name);
            if let Some(value) = read_metadata_field(&path, &config.timestamp_field)? {
                let ts = NaiveDateTime::parse_from_str(&value, TIMESTAMP_FORMAT)
                    .map_err(|_| ScanError::InvalidTimestamp { path: path.clone(), value })?;
                timestamps.push((name, ts));
            }
        }

        if timestamps.is_empty() {
            return Err(ScanError::MissingTimestamp {
                folder,
                field: config.timestamp_field.clone(),
            });
        }

        let stream_count = self.count_streams(dir, &folder)?;
        if stream_count == 0 {
            return Err(ScanError::NoStreams(folder));
        }

        debug!(
            "Found segment {} (run {}, gate {}, {} streams)",
            folder, run_name, gate, stream_count
        );

        Ok(Some(Segment {
            run_name: run_name.to_string(),
            gate,
            stream_count,
            timestamps,
            folder,
        }))
    }

    /// Scan the immediate subdirectories of `root`.
    pub fn scan(&self, root: &Path) -> Result<Vec<Segment>> {
        let folders = sorted_entries(root, |p| p.is_dir())?;
        let mut segments = Vec::with_capacity(folders.len());

        for folder in folders {
            if let Some(segment) = self.read_segment(&root.join(&folder))? {
                segments.push(segment);
            }
        }

        Ok(segments)
    }
}

/// Scan the immediate subdirectories of `root` for segments.
///
/// Folders without metadata files are skipped. Segments are returned in
/// folder name order; ordering by acquisition time is the resolver's job.
pub fn scan_segments(root: &Path, config: &DiscoveryConfig) -> Result<Vec<Segment>> {
    SegmentScanner::new(config)?.scan(root)
}
