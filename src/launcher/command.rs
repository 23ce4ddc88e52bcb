//! Worker invocation description and captured result.

use std::path::{Path, PathBuf};

use crate::config::WorkerProgram;

/// A fully-resolved worker invocation
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerCommand {
    /// Short name used in logs and diagnostics
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    /// Added on top of the inherited environment
    pub env: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
    /// Only applies to synchronous invocations
    pub timeout_ms: Option<u64>,
}

impl WorkerCommand {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
            timeout_ms: None,
        }
    }

    /// Start from a configured worker program.
    pub fn from_program(name: impl Into<String>, program: &WorkerProgram) -> Self {
        Self {
            args: program.args.clone(),
            timeout_ms: program.timeout_ms,
            ..Self::new(name, program.command.clone())
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs(mut self, pairs: Vec<(String, String)>) -> Self {
        self.env.extend(pairs);
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }
}

/// Captured result of a synchronous invocation.
///
/// Worker failures are data: a missing exit code means the worker could not
/// be launched, timed out, or was killed by a signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl WorkerOutput {
    /// Output for a worker that never started.
    pub fn launch_failure(command: &WorkerCommand, error: &std::io::Error) -> Self {
        Self {
            exit_code: None,
            stdout: String::new(),
            stderr: format!("failed to launch {} ({}): {}", command.name, command.program, error),
            timed_out: false,
        }
    }

    /// Output for a worker killed after exceeding its timeout.
    pub fn timeout(command: &WorkerCommand, timeout_ms: u64) -> Self {
        Self {
            exit_code: None,
            stdout: String::new(),
            stderr: format!("{} timed out after {}ms", command.name, timeout_ms),
            timed_out: true,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout followed by stderr, as stored in run logs.
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }

    /// Best text to show a caller when the worker failed.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match self.exit_code {
            Some(code) => format!("worker exited with code {}", code),
            None => "worker terminated without an exit code".to_string(),
        }
    }
}
