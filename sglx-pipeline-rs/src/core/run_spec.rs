//! Grouping of segments into logical runs.
//!
//! Every segment starts out as its own provisional run. Runs are ordered by
//! acquisition time, then segments that share a run name (the acquisition
//! was restarted under the same name, producing several gates) are merged.
//! A merged run is appended after the singleton runs rather than re-sorted;
//! the cross-run merge concatenates in exactly this order.

use std::fmt;

use chrono::NaiveDateTime;
use log::{debug, info};
use thiserror::Error;

use super::ranges::{self, RangeError};
use super::segments::Segment;
use crate::config::ManualRun;

/// Errors that can occur while resolving run specifications.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no run folders found")]
    NoRuns,

    #[error("segment '{0}' has no creation timestamp")]
    Unordered(String),

    #[error("run '{run}' declares {regions} region labels for {streams} streams")]
    RegionCount {
        run: String,
        regions: usize,
        streams: usize,
    },

    #[error("invalid manual run '{run}': {source}")]
    ManualRun {
        run: String,
        #[source]
        source: RangeError,
    },
}

/// Result type for resolver operations.
pub type Result<T> = std::result::Result<T, ResolveError>;

/// Contiguous range of stream indices, displayed as `first:last`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRange {
    pub first: u32,
    pub last: u32,
}

impl StreamRange {
    /// Range `0:count-1`. `count` must be at least one.
    pub fn from_count(count: u32) -> Self {
        Self {
            first: 0,
            last: count.saturating_sub(1),
        }
    }

    /// Number of streams in the range.
    pub fn count(&self) -> usize {
        (self.last - self.first) as usize + 1
    }

    /// Stream indices in order.
    pub fn indices(&self) -> impl Iterator<Item = u32> {
        self.first..=self.last
    }
}

impl fmt::Display for StreamRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.first, self.last)
    }
}

/// Canonical description of one logical run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSpec {
    pub name: String,
    /// Gates belonging to this run, in merge order. Never empty.
    pub gates: Vec<u32>,
    pub streams: StreamRange,
    /// One region label per stream.
    pub regions: Vec<String>,
    /// Creation times of the constituent segments, in merge order.
    pub created: Vec<NaiveDateTime>,
}

impl RunSpec {
    /// Comma-joined gate list, as passed to CatGT's `-g`.
    pub fn gate_descriptor(&self) -> String {
        self.gates
            .iter()
            .map(|g| g.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn first_gate(&self) -> u32 {
        self.gates.iter().copied().min().unwrap_or(0)
    }

    pub fn last_gate(&self) -> u32 {
        self.gates.iter().copied().max().unwrap_or(0)
    }

    /// Earliest constituent creation time, if known.
    pub fn earliest(&self) -> Option<NaiveDateTime> {
        self.created.iter().min().copied()
    }

    /// Region label of the `i`-th stream of this run.
    pub fn region(&self, i: usize) -> Option<&str> {
        self.regions.get(i).map(String::as_str)
    }
}

impl fmt::Display for RunSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (g={}, prb={}, regions=[{}])",
            self.name,
            self.gate_descriptor(),
            self.streams,
            self.regions.join(", ")
        )
    }
}

fn provisional(segment: &Segment, default_region: &str) -> Result<RunSpec> {
    let created = segment
        .created()
        .ok_or_else(|| ResolveError::Unordered(segment.folder.clone()))?;

    Ok(RunSpec {
        name: segment.run_name.clone(),
        gates: vec![segment.gate],
        streams: StreamRange::from_count(segment.stream_count),
        regions: vec![default_region.to_string(); segment.stream_count as usize],
        created: vec![created],
    })
}

/// Merge every group of specs sharing a run name.
///
/// Groups are visited in order of first appearance. The constituents are
/// removed and the merged spec is appended to the end of the list.
pub fn merge_gates(mut specs: Vec<RunSpec>) -> Vec<RunSpec> {
    let mut duplicates: Vec<String> = Vec::new();
    for spec in &specs {
        let count = specs.iter().filter(|s| s.name == spec.name).count();
        if count > 1 && !duplicates.contains(&spec.name) {
            duplicates.push(spec.name.clone());
        }
    }

    for name in duplicates {
        let (group, rest): (Vec<RunSpec>, Vec<RunSpec>) =
            specs.into_iter().partition(|s| s.name == name);

        let mut merged = RunSpec {
            name: name.clone(),
            gates: Vec::with_capacity(group.len()),
            streams: StreamRange::from_count(1),
            regions: Vec::new(),
            created: Vec::new(),
        };
        // Streams and regions are assumed identical across gates; the last
        // constituent's values are kept.
        for spec in group {
            merged.gates.extend(spec.gates);
            merged.created.extend(spec.created);
            merged.streams = spec.streams;
            merged.regions = spec.regions;
        }

        debug!("Merged run {} with gates {}", name, merged.gate_descriptor());
        specs = rest;
        specs.push(merged);
    }

    specs
}

/// Turn scanned segments into ordered, deduplicated run specifications.
pub fn resolve_run_specs(segments: &[Segment], default_region: &str) -> Result<Vec<RunSpec>> {
    if segments.is_empty() {
        return Err(ResolveError::NoRuns);
    }

    let mut specs = segments
        .iter()
        .map(|s| provisional(s, default_region))
        .collect::<Result<Vec<_>>>()?;

    // Stable: segments with equal timestamps keep scan order.
    specs.sort_by_key(|s| s.created[0]);

    let specs = merge_gates(specs);
    info!("Resolved {} runs from {} segments", specs.len(), segments.len());
    Ok(specs)
}

/// Convert hand-entered runs, keeping their order.
pub fn manual_run_specs(runs: &[ManualRun]) -> Result<Vec<RunSpec>> {
    if runs.is_empty() {
        return Err(ResolveError::NoRuns);
    }

    runs.iter()
        .map(|run| {
            let wrap = |source| ResolveError::ManualRun {
                run: run.name.clone(),
                source,
            };
            let gates = ranges::parse_gate_list(&run.gates).map_err(wrap)?;
            let streams = ranges::parse_stream_range(&run.probes).map_err(wrap)?;
            if run.regions.len() != streams.count() {
                return Err(ResolveError::RegionCount {
                    run: run.name.clone(),
                    regions: run.regions.len(),
                    streams: streams.count(),
                });
            }
            Ok(RunSpec {
                name: run.name.clone(),
                gates,
                streams,
                regions: run.regions.clone(),
                created: Vec::new(),
            })
        })
        .collect()
}
