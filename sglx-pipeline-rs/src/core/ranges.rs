//! Probe, gate and trigger range syntax.
//!
//! - gate lists: `"0"`, `"0,1"`
//! - stream ranges: `"0:1"`, `"2"`
//! - trigger ranges: `"start,end"` resolved against the files on disk, or
//!   explicit `"first,last"` indices

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use thiserror::Error;

use super::run_spec::StreamRange;

/// Errors that can occur while parsing or resolving ranges.
#[derive(Debug, Error)]
pub enum RangeError {
    #[error("invalid gate list '{0}'")]
    InvalidGates(String),

    #[error("invalid stream range '{0}'")]
    InvalidStreams(String),

    #[error("invalid trigger range '{0}'")]
    InvalidTriggers(String),

    #[error("failed to read stream folder '{path}': {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no trigger files for {run}_g{gate} {stream} in '{folder}'")]
    NoTriggers {
        run: String,
        gate: u32,
        stream: String,
        folder: PathBuf,
    },

    #[error("invalid trigger file pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Result type for range operations.
pub type Result<T> = std::result::Result<T, RangeError>;

fn parse_index(s: &str) -> Option<u32> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Parse a comma-separated gate list.
pub fn parse_gate_list(s: &str) -> Result<Vec<u32>> {
    s.split(',')
        .map(|g| parse_index(g).ok_or_else(|| RangeError::InvalidGates(s.to_string())))
        .collect()
}

/// Parse a `first:last` stream range (a single index is a one-stream range).
pub fn parse_stream_range(s: &str) -> Result<StreamRange> {
    let invalid = || RangeError::InvalidStreams(s.to_string());
    let (first, last) = match s.split_once(':') {
        Some((a, b)) => (parse_index(a).ok_or_else(invalid)?, parse_index(b).ok_or_else(invalid)?),
        None => {
            let i = parse_index(s).ok_or_else(invalid)?;
            (i, i)
        }
    };
    if last < first {
        return Err(invalid());
    }
    Ok(StreamRange { first, last })
}

/// Inclusive range of trigger indices within a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerRange {
    pub first: u32,
    pub last: u32,
}

impl TriggerRange {
    /// Smallest range covering both.
    pub fn union(self, other: TriggerRange) -> TriggerRange {
        TriggerRange {
            first: self.first.min(other.first),
            last: self.last.max(other.last),
        }
    }
}

impl fmt::Display for TriggerRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.first, self.last)
    }
}

/// Trigger range spec as given by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSpec {
    /// `start,end`: every trigger file present on disk
    All,
    Explicit(TriggerRange),
}

impl TriggerSpec {
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || RangeError::InvalidTriggers(s.to_string());
        let (a, b) = s.split_once(',').ok_or_else(invalid)?;
        match (a.trim(), b.trim()) {
            ("start", "end") => Ok(TriggerSpec::All),
            (a, b) => {
                let first = parse_index(a).ok_or_else(invalid)?;
                let last = parse_index(b).ok_or_else(invalid)?;
                if last < first {
                    return Err(invalid());
                }
                Ok(TriggerSpec::Explicit(TriggerRange { first, last }))
            }
        }
    }
}

/// Resolves the triggers recorded for one stream of one gate.
pub trait TriggerLookup {
    /// `folder` is the raw stream folder, e.g. `<npx>/run_g0/run_g0_imec0`;
    /// `stream` is the stream tag, e.g. `imec0`.
    fn trigger_range(&self, run: &str, gate: u32, stream: &str, folder: &Path) -> Result<TriggerRange>;
}

/// Reads trigger indices from `<run>_g<gate>_t<N>.<stream>.*` file names.
#[derive(Debug, Clone, Copy, Default)]
pub struct FolderTriggerLookup {
    pub spec: Option<TriggerRange>,
}

impl FolderTriggerLookup {
    pub fn new(spec: TriggerSpec) -> Self {
        match spec {
            TriggerSpec::All => Self { spec: None },
            TriggerSpec::Explicit(range) => Self { spec: Some(range) },
        }
    }
}

/// Pattern for the per-trigger files of one stream, `<run>_g<gate>_t<N>.<stream>.*`.
pub fn trigger_pattern(run: &str, gate: u32, stream: &str) -> Result<Regex> {
    Ok(Regex::new(&format!(
        r"^{}_g{}_t(\d+)\.{}\.",
        regex::escape(run),
        gate,
        regex::escape(stream)
    ))?)
}

/// Trigger index encoded in a file name matching `pattern`.
pub fn trigger_index(pattern: &Regex, file_name: &str) -> Option<u32> {
    pattern.captures(file_name)?.get(1)?.as_str().parse().ok()
}

impl TriggerLookup for FolderTriggerLookup {
    fn trigger_range(&self, run: &str, gate: u32, stream: &str, folder: &Path) -> Result<TriggerRange> {
        if let Some(range) = self.spec {
            return Ok(range);
        }

        let pattern = trigger_pattern(run, gate, stream)?;
        let read_error = |source| RangeError::ReadDir {
            path: folder.to_path_buf(),
            source,
        };

        let mut indices = Vec::new();
        for entry in fs::read_dir(folder).map_err(read_error)? {
            let name = entry.map_err(read_error)?.file_name();
            if let Some(index) = trigger_index(&pattern, &name.to_string_lossy()) {
                indices.push(index);
            }
        }

        match (indices.iter().min(), indices.iter().max()) {
            (Some(&first), Some(&last)) => Ok(TriggerRange { first, last }),
            _ => Err(RangeError::NoTriggers {
                run: run.to_string(),
                gate,
                stream: stream.to_string(),
                folder: folder.to_path_buf(),
            }),
        }
    }
}
