//! Process Launcher - runs worker programs as OS processes
//!
//! Two modes:
//! - **captured**: run to completion, collect stdout/stderr and the exit code
//! - **detached**: spawn with stdout and stderr redirected into a log file and
//!   hand back a handle the caller can wait on

use std::fs::{self, File};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::process::{Child, Command};

use crate::launcher::command::{WorkerCommand, WorkerOutput};

/// Spawns worker programs.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher;

impl ProcessLauncher {
    pub fn new() -> Self {
        Self
    }

    fn build(command: &WorkerCommand) -> Command {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args);
        for (key, value) in &command.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &command.current_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd
    }

    /// Run a worker to completion and capture its output.
    ///
    /// Never fails: launch errors, timeouts, and non-zero exits all come back
    /// as a `WorkerOutput`.
    pub async fn run_captured(&self, command: &WorkerCommand) -> WorkerOutput {
        let mut cmd = Self::build(command);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to launch {}: {}", command.name, e);
                return WorkerOutput::launch_failure(command, &e);
            }
        };
        debug!("Launched {} (pid {:?})", command.name, child.id());

        let result = match command.timeout_ms {
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), child.wait_with_output()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("{} timed out after {}ms", command.name, ms);
                    return WorkerOutput::timeout(command, ms);
                }
            },
            None => child.wait_with_output().await,
        };

        match result {
            Ok(output) => {
                let captured = WorkerOutput {
                    exit_code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    timed_out: false,
                };
                info!("{} exited with {:?}", command.name, captured.exit_code);
                captured
            }
            Err(e) => {
                warn!("Failed waiting for {}: {}", command.name, e);
                WorkerOutput::launch_failure(command, &e)
            }
        }
    }

    /// Spawn a worker whose combined output goes to `log_path`.
    ///
    /// The log file is truncated and its directory created if absent.
    pub fn spawn_detached(&self, command: &WorkerCommand, log_path: &Path) -> std::io::Result<DetachedWorker> {
        if let Some(parent) = log_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let stdout = File::create(log_path)?;
        let stderr = stdout.try_clone()?;

        let mut cmd = Self::build(command);
        cmd.stdout(Stdio::from(stdout)).stderr(Stdio::from(stderr));
        let child = cmd.spawn()?;
        let pid = child.id();
        info!("Spawned {} (pid {:?}), logging to {}", command.name, pid, log_path.display());

        Ok(DetachedWorker {
            name: command.name.clone(),
            child,
            pid,
        })
    }
}

/// Handle to a detached worker process.
///
/// Dropping the handle does not kill the worker.
#[derive(Debug)]
pub struct DetachedWorker {
    name: String,
    child: Child,
    pid: Option<u32>,
}

impl DetachedWorker {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Wait for the worker to exit.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        let status = self.child.wait().await?;
        info!("{} (pid {:?}) exited with {}", self.name, self.pid, status);
        Ok(status)
    }
}
