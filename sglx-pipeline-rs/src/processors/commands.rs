//! CatGT command construction.
//!
//! Pass one concatenates the triggers of every run separately; pass two
//! ("supercat") joins the pass-one outputs of all runs. Both batches are
//! built from the same ordered run list so the supercat element order
//! matches the pass-one order exactly; CatGT concatenates in argument order.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::core::run_spec::RunSpec;

/// Errors that can occur while building commands.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("cannot build a supercat command without runs")]
    NoRuns,
}

/// Result type for command construction.
pub type Result<T> = std::result::Result<T, CommandError>;

/// A fully formed external tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ExternalCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Space-joined command line, as written to the log.
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

impl fmt::Display for ExternalCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Ordered commands with no shared state; run strictly in sequence.
pub type CommandBatch = Vec<ExternalCommand>;

/// Name of the pass-one output folder CatGT writes for a run.
///
/// CatGT names the folder after the first gate it processed, so the
/// supercat sources always point at `_g0`.
pub fn intermediate_folder(prefix: &str, run: &str, gate: u32) -> String {
    format!("{}_{}_g{}", prefix, run, gate)
}

/// Builds CatGT invocations for a set of runs.
#[derive(Debug, Clone)]
pub struct CommandBuilder<'a> {
    executable: &'a Path,
    /// Raw data directory (`-dir`)
    data_dir: &'a Path,
    /// Root holding the pass-one outputs
    dest: &'a Path,
    intermediate_prefix: &'a str,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(
        executable: &'a Path,
        data_dir: &'a Path,
        dest: &'a Path,
        intermediate_prefix: &'a str,
    ) -> Self {
        Self {
            executable,
            data_dir,
            dest,
            intermediate_prefix,
        }
    }

    /// One pass-one command per run, in run order.
    pub fn pass_one(&self, specs: &[RunSpec], params: &[String]) -> CommandBatch {
        specs
            .iter()
            .map(|spec| {
                let mut args = Vec::with_capacity(params.len() + 4);
                args.push(format!("-dir={}", self.data_dir.display()));
                args.push(format!("-run={}", spec.name));
                args.push(format!("-g={}", spec.gate_descriptor()));
                args.push(format!("-prb={}", spec.streams));
                args.extend(params.iter().cloned());
                ExternalCommand::new(self.executable, args)
            })
            .collect()
    }

    /// `(root, folder)` pairs consumed by supercat, in run order.
    pub fn supercat_sources(&self, specs: &[RunSpec]) -> Vec<(PathBuf, String)> {
        specs
            .iter()
            .map(|spec| {
                (
                    self.dest.to_path_buf(),
                    intermediate_folder(self.intermediate_prefix, &spec.name, 0),
                )
            })
            .collect()
    }

    /// The single pass-two command.
    ///
    /// The probe range is taken from the first run.
    pub fn supercat(&self, specs: &[RunSpec], params: &[String]) -> Result<ExternalCommand> {
        let first = specs.first().ok_or(CommandError::NoRuns)?;

        let elements: String = self
            .supercat_sources(specs)
            .iter()
            .map(|(root, folder)| format!("{{{},{}}}", root.display(), folder))
            .collect();

        let mut args = Vec::with_capacity(params.len() + 2);
        args.push(format!("-supercat={}", elements));
        args.push(format!("-prb={}", first.streams));
        args.extend(params.iter().cloned());
        Ok(ExternalCommand::new(self.executable, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::run_spec::StreamRange;

    fn spec(name: &str, gates: Vec<u32>, streams: u32) -> RunSpec {
        RunSpec {
            name: name.to_string(),
            gates,
            streams: StreamRange::from_count(streams),
            regions: vec!["hippocampus".to_string(); streams as usize],
            created: Vec::new(),
        }
    }

    fn builder<'a>() -> CommandBuilder<'a> {
        CommandBuilder::new(
            Path::new("/opt/CatGT/runit.sh"),
            Path::new("/data/npx"),
            Path::new("/data/npx/out"),
            "catgt",
        )
    }

    fn params() -> Vec<String> {
        vec!["-ap".to_string(), "-prb_fld".to_string()]
    }

    #[test]
    fn test_pass_one_command() {
        let specs = vec![spec("sessionA", vec![0, 1], 2)];
        let batch = builder().pass_one(&specs, &params());

        assert_eq!(batch.len(), 1);
        assert_eq!(
            batch[0].command_line(),
            "/opt/CatGT/runit.sh -dir=/data/npx -run=sessionA -g=0,1 -prb=0:1 -ap -prb_fld"
        );
    }

    #[test]
    fn test_pass_one_one_command_per_run() {
        let specs = vec![spec("pre", vec![0], 2), spec("maze", vec![0], 2), spec("post", vec![0], 1)];
        let batch = builder().pass_one(&specs, &params());

        assert_eq!(batch.len(), 3);
        let runs: Vec<&str> = batch.iter().map(|c| c.args[1].as_str()).collect();
        assert_eq!(runs, vec!["-run=pre", "-run=maze", "-run=post"]);
    }

    #[test]
    fn test_supercat_command() {
        let specs = vec![spec("pre", vec![0], 2), spec("maze", vec![0, 1], 2)];
        let cmd = builder().supercat(&specs, &params()).unwrap();

        assert_eq!(
            cmd.args,
            vec![
                "-supercat={/data/npx/out,catgt_pre_g0}{/data/npx/out,catgt_maze_g0}",
                "-prb=0:1",
                "-ap",
                "-prb_fld",
            ]
        );
    }

    #[test]
    fn test_supercat_order_matches_pass_one() {
        let specs = vec![spec("c", vec![0], 1), spec("a", vec![0], 1), spec("b", vec![2, 3], 1)];
        let b = builder();
        let pass_one = b.pass_one(&specs, &[]);
        let sources = b.supercat_sources(&specs);

        assert_eq!(pass_one.len(), sources.len());
        for (cmd, (_, folder)) in pass_one.iter().zip(&sources) {
            let run = cmd.args[1].trim_start_matches("-run=");
            assert_eq!(folder, &format!("catgt_{}_g0", run));
        }
    }

    #[test]
    fn test_supercat_uses_first_probe_range() {
        let specs = vec![spec("a", vec![0], 3), spec("b", vec![0], 1)];
        let cmd = builder().supercat(&specs, &[]).unwrap();
        assert_eq!(cmd.args[1], "-prb=0:2");
    }

    #[test]
    fn test_supercat_without_runs() {
        let err = builder().supercat(&[], &params()).unwrap_err();
        assert!(matches!(err, CommandError::NoRuns));
    }
}
