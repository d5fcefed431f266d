//! Supervised execution of external tools.
//!
//! Commands run one at a time. Standard output and error of the child share
//! one pipe, so their lines reach the console and the append-only log in the
//! order the child wrote them, framed by a timestamped header and an
//! exit-code footer.
//! The first non-zero exit aborts the rest of the batch.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use chrono::Local;
use log::info;
use thiserror::Error;

use super::commands::ExternalCommand;
use crate::core::writers;

/// Errors that can occur while running external commands.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for '{command}': {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command failed with exit code {code}: {command}")]
    CommandFailed { command: String, code: i32 },

    #[error("failed to write log '{path}': {source}")]
    Log {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Write(#[from] writers::WriteError),
}

/// Result type for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;

/// Runs a single external command to completion.
pub trait Executor {
    fn execute(&mut self, command: &ExternalCommand) -> Result<()>;
}

/// Runs commands as child processes, teeing their output to a log file.
#[derive(Debug, Clone)]
pub struct PipelineDriver {
    log_path: PathBuf,
    echo: bool,
}

impl PipelineDriver {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
            echo: true,
        }
    }

    /// Do not echo child output to the console.
    pub fn quiet(mut self) -> Self {
        self.echo = false;
        self
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    fn open_log(&self) -> Result<File> {
        writers::ensure_parent_dirs(&self.log_path)?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| self.log_error(e))
    }

    fn log_error(&self, source: std::io::Error) -> DriverError {
        DriverError::Log {
            path: self.log_path.clone(),
            source,
        }
    }

    fn emit(&self, log: &mut File, text: &str) -> Result<()> {
        if self.echo {
            print!("{}", text);
        }
        log.write_all(text.as_bytes()).map_err(|e| self.log_error(e))
    }
}

impl Executor for PipelineDriver {
    fn execute(&mut self, command: &ExternalCommand) -> Result<()> {
        let command_line = command.command_line();
        let mut log = self.open_log()?;
        let spawn_error = |source| DriverError::Spawn {
            command: command_line.clone(),
            source,
        };

        // One pipe for both streams keeps the child's write order.
        let (reader, writer) = io::pipe().map_err(spawn_error)?;
        let stderr = writer.try_clone().map_err(spawn_error)?;

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(writer)
            .stderr(stderr)
            .spawn()
            .map_err(spawn_error)?;

        let ts = Local::now().format("%Y-%m-%d %H:%M:%S");
        let mut log_failure = self
            .emit(&mut log, &format!("\n\n[{}] Running command:\n{}\n", ts, command_line))
            .err();

        // Keep draining after a log failure so the child never blocks on a full pipe.
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if log_failure.is_some() {
                        continue;
                    }
                    let mut line = String::from_utf8_lossy(&buf).into_owned();
                    if !line.ends_with('\n') {
                        line.push('\n');
                    }
                    log_failure = self.emit(&mut log, &line).err();
                }
            }
        }

        let status = child.wait().map_err(|e| DriverError::Wait {
            command: command_line.clone(),
            source: e,
        })?;
        // Terminated by a signal
        let code = status.code().unwrap_or(-1);

        if let Some(e) = log_failure {
            return Err(e);
        }
        self.emit(&mut log, &format!("\n[exit code: {}]\n", code))?;

        if status.success() {
            Ok(())
        } else {
            Err(DriverError::CommandFailed {
                command: command_line,
                code,
            })
        }
    }
}

/// Run `batch` in order, stopping at the first failure.
pub fn run_batch<E: Executor + ?Sized>(
    executor: &mut E,
    batch: &[ExternalCommand],
    label: &str,
) -> Result<()> {
    let total = batch.len();
    for (i, command) in batch.iter().enumerate() {
        info!("{} {}/{}", label, i + 1, total);
        executor.execute(command)?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Records commands instead of running them; fails the `fail_at`-th call.
    #[derive(Debug, Default)]
    pub(crate) struct FakeExecutor {
        pub executed: Vec<ExternalCommand>,
        pub fail_at: Option<usize>,
    }

    impl FakeExecutor {
        pub fn failing_at(index: usize) -> Self {
            Self {
                executed: Vec::new(),
                fail_at: Some(index),
            }
        }

        pub fn lines(&self) -> Vec<String> {
            self.executed.iter().map(|c| c.command_line()).collect()
        }
    }

    impl Executor for FakeExecutor {
        fn execute(&mut self, command: &ExternalCommand) -> Result<()> {
            let index = self.executed.len();
            self.executed.push(command.clone());
            if self.fail_at == Some(index) {
                return Err(DriverError::CommandFailed {
                    command: command.command_line(),
                    code: 1,
                });
            }
            Ok(())
        }
    }

    #[cfg(unix)]
    fn sh(script: &str) -> ExternalCommand {
        ExternalCommand::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[test]
    fn test_fake_executor_stops_batch() {
        let batch = vec![
            ExternalCommand::new("catgt", vec!["-run=a".to_string()]),
            ExternalCommand::new("catgt", vec!["-run=b".to_string()]),
            ExternalCommand::new("catgt", vec!["-run=c".to_string()]),
        ];
        let mut executor = FakeExecutor::failing_at(1);

        let err = run_batch(&mut executor, &batch, "Pass 1").unwrap_err();
        assert!(matches!(err, DriverError::CommandFailed { ref command, .. } if command == "catgt -run=b"));
        assert_eq!(executor.lines(), vec!["catgt -run=a", "catgt -run=b"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_execute_tees_output_to_log() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("logs").join("pipeline.log");
        let mut driver = PipelineDriver::new(&log_path).quiet();

        driver.execute(&sh("echo to-stdout; echo to-stderr 1>&2")).unwrap();

        let log = std::fs::read_to_string(&log_path).unwrap();
        assert!(log.starts_with("\n\n["));
        assert!(log.contains("] Running command:\nsh -c echo to-stdout; echo to-stderr 1>&2\n"));
        assert!(log.contains("to-stdout\n"));
        assert!(log.contains("to-stderr\n"));
        assert!(log.ends_with("\n[exit code: 0]\n"));
    }

    #[cfg(unix)]
    #[test]
    fn test_log_is_appended() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("pipeline.log");
        std::fs::write(&log_path, "previous run\n").unwrap();
        let mut driver = PipelineDriver::new(&log_path).quiet();

        driver.execute(&sh("echo first")).unwrap();
        driver.execute(&sh("echo second")).unwrap();

        let log = std::fs::read_to_string(&log_path).unwrap();
        assert!(log.starts_with("previous run\n"));
        assert_eq!(log.matches("Running command:").count(), 2);
        assert!(log.find("first").unwrap() < log.find("second").unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("pipeline.log");
        let mut driver = PipelineDriver::new(&log_path).quiet();

        let err = driver.execute(&sh("echo failing; exit 3")).unwrap_err();
        assert!(matches!(err, DriverError::CommandFailed { code: 3, .. }));

        let log = std::fs::read_to_string(&log_path).unwrap();
        assert!(log.ends_with("\n[exit code: 3]\n"));
    }

    #[cfg(unix)]
    #[test]
    fn test_batch_skips_after_failure() {
        let temp_dir = TempDir::new().unwrap();
        let marker = temp_dir.path().join("third-ran");
        let mut driver = PipelineDriver::new(temp_dir.path().join("pipeline.log")).quiet();

        let batch = vec![
            sh("true"),
            sh("exit 2"),
            sh(&format!("touch '{}'", marker.display())),
        ];
        let err = run_batch(&mut driver, &batch, "Pass 1").unwrap_err();

        assert!(matches!(err, DriverError::CommandFailed { code: 2, ref command } if command == "sh -c exit 2"));
        assert!(!marker.exists());
    }

    #[test]
    fn test_missing_executable() {
        let temp_dir = TempDir::new().unwrap();
        let mut driver = PipelineDriver::new(temp_dir.path().join("pipeline.log")).quiet();

        let err = driver
            .execute(&ExternalCommand::new(
                temp_dir.path().join("no-such-tool"),
                vec!["-dir=.".to_string()],
            ))
            .unwrap_err();
        assert!(matches!(err, DriverError::Spawn { .. }));

        let log = std::fs::read_to_string(temp_dir.path().join("pipeline.log")).unwrap();
        assert!(!log.contains("Running command"));
    }

    #[cfg(unix)]
    #[test]
    fn test_stdout_and_stderr_keep_write_order() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("pipeline.log");
        let mut driver = PipelineDriver::new(&log_path).quiet();

        driver
            .execute(&sh("for i in $(seq 1 300); do echo out$i; echo err$i 1>&2; done"))
            .unwrap();

        let log = std::fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = log
            .lines()
            .filter(|l| l.starts_with("out") || l.starts_with("err"))
            .collect();
        let expected: Vec<String> = (1..=300)
            .flat_map(|i| [format!("out{}", i), format!("err{}", i)])
            .collect();
        assert_eq!(lines, expected);
    }
}
