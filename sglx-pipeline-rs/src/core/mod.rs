//! Run discovery, range syntax and file output.

pub mod ranges;
pub mod run_spec;
pub mod segments;
pub mod writers;

pub use ranges::{FolderTriggerLookup, TriggerLookup, TriggerRange, TriggerSpec};
pub use run_spec::{resolve_run_specs, RunSpec, StreamRange};
pub use segments::{scan_segments, Segment};
pub use writers::{SummaryRow, WriteError};
