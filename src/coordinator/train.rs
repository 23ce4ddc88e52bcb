//! Training runs: persisted `pending`, executed by a background task.
//!
//! Per run, the background task writes the persisted terminal status first and
//! the registry's terminal status second. Anything that observes a terminal
//! status in the registry can therefore rely on the store agreeing.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use log::{debug, error, info, warn};
use tokio::sync::Semaphore;

use super::view::TrainRunView;
use super::{Coordinator, ensure_parent};
use crate::checkpoint::CheckpointDir;
use crate::domain::{RunKind, RunStatus, TrainParams, TrainRun};
use crate::error::{Result, WavediffError};
use crate::launcher::{ProcessLauncher, WorkerCommand, settings};
use crate::registry::LiveStatusRegistry;
use crate::store::RunStore;
use crate::tail::{Fallback, LogTail, TailEvent};

/// Everything the background task needs, detached from the coordinator
struct TrainTask {
    run_id: i64,
    command: WorkerCommand,
    log_path: PathBuf,
    checkpoint_dir: PathBuf,
    keep_last: usize,
    store: Arc<RunStore>,
    registry: Arc<LiveStatusRegistry>,
    launcher: ProcessLauncher,
    slots: Arc<Semaphore>,
}

impl TrainTask {
    async fn run(self) {
        let _permit = match Arc::clone(&self.slots).acquire_owned().await {
            Ok(permit) => Some(permit),
            Err(e) => {
                warn!("Training slots unavailable for run {}: {}", self.run_id, e);
                None
            }
        };
        debug!("Train run {} acquired a training slot", self.run_id);

        let status = self.execute().await;
        self.retain_checkpoints();

        let status = self.persist_terminal(status);
        self.registry.finish(self.run_id, status);
    }

    /// Write the terminal status, or adopt the one already stored.
    fn persist_terminal(&self, status: RunStatus) -> RunStatus {
        match self.store.set_train_status(self.run_id, status) {
            Ok(true) => {
                info!("Train run {} finished: {}", self.run_id, status);
                status
            }
            Ok(false) => match self.store.get_train_run(self.run_id) {
                Ok(Some(stored)) if stored.status.is_terminal() => {
                    warn!(
                        "Train run {} was already marked {}; worker result {} not recorded",
                        self.run_id, stored.status, status
                    );
                    stored.status
                }
                Ok(_) => {
                    warn!("Train run {} was deleted before it finished ({})", self.run_id, status);
                    status
                }
                Err(e) => {
                    error!("Failed to re-read train run {}: {}", self.run_id, e);
                    status
                }
            },
            Err(e) => {
                error!("Failed to persist status {} for train run {}: {}", status, self.run_id, e);
                status
            }
        }
    }

    async fn execute(&self) -> RunStatus {
        let mut worker = match self.launcher.spawn_detached(&self.command, &self.log_path) {
            Ok(worker) => worker,
            Err(e) => {
                error!("Failed to launch trainer for run {}: {}", self.run_id, e);
                self.append_log(&format!("failed to launch {}: {}", self.command.program, e));
                return RunStatus::Failed;
            }
        };
        if let Some(pid) = worker.pid() {
            self.registry.attach_pid(self.run_id, pid);
        }

        match worker.wait().await {
            Ok(exit) => RunStatus::from_exit(exit.success()),
            Err(e) => {
                error!("Lost track of trainer for run {}: {}", self.run_id, e);
                RunStatus::Failed
            }
        }
    }

    fn retain_checkpoints(&self) {
        match CheckpointDir::new(&self.checkpoint_dir).prune(self.keep_last) {
            Ok(report) if !report.failed.is_empty() => {
                warn!(
                    "Train run {}: {} checkpoint(s) could not be deleted",
                    self.run_id,
                    report.failed.len()
                );
            }
            Ok(_) => {}
            Err(e) => warn!("Checkpoint retention skipped for run {}: {}", self.run_id, e),
        }
    }

    fn append_log(&self, line: &str) {
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .and_then(|mut file| writeln!(file, "{}", line));
        if let Err(e) = result {
            warn!("Could not write to {}: {}", self.log_path.display(), e);
        }
    }
}

impl Coordinator {
    /// Create a `pending` training run and start its worker in the background.
    ///
    /// Returns as soon as the record exists; the worker may still be waiting
    /// for a training slot.
    pub fn submit_train_run(&self, params: &TrainParams) -> Result<TrainRun> {
        params.validate()?;
        let paths = &self.paths;
        let run = self
            .store
            .create_train_run(&serde_json::to_value(params)?, params.epochs, |id| {
                (paths.train_log_path(id), paths.checkpoint_dir(id))
            })?;
        info!("Submitted train run {} ({} epochs)", run.id, run.epoch_count);

        let prepared =
            ensure_parent(&run.log_path).and_then(|()| fs::create_dir_all(&run.checkpoint_dir).map_err(Into::into));
        if let Err(e) = prepared {
            error!("Could not prepare directories for train run {}: {}", run.id, e);
            self.store.set_train_status(run.id, RunStatus::Failed)?;
            return Err(e);
        }

        let command = WorkerCommand::from_program("trainer", &self.workers.trainer)
            .envs(settings::train_env(params, &run.checkpoint_dir, &self.checkpoints))
            .current_dir(&paths.work_dir());

        self.registry.register(run.id, &run.log_path);
        let task = TrainTask {
            run_id: run.id,
            command,
            log_path: run.log_path.clone(),
            checkpoint_dir: run.checkpoint_dir.clone(),
            keep_last: self.checkpoints.keep_last,
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            launcher: self.launcher.clone(),
            slots: Arc::clone(&self.training_slots),
        };
        tokio::spawn(task.run());

        Ok(run)
    }

    /// Resolve once the run reaches a terminal status.
    ///
    /// Runs this process does not track resolve immediately with their
    /// persisted status.
    pub async fn wait_for_train_run(&self, id: i64) -> Result<RunStatus> {
        let Some(mut rx) = self.registry.subscribe(id) else {
            return Ok(self.get_train_run(id)?.status());
        };
        let status = *rx
            .wait_for(|status| status.is_terminal())
            .await
            .map_err(|e| WavediffError::Storage(format!("status channel for run {} closed: {}", id, e)))?;
        Ok(status)
    }

    pub fn get_train_run(&self, id: i64) -> Result<TrainRunView> {
        let run = self.find_train_run(id)?;
        Ok(TrainRunView::reconcile(run, self.registry.observe(id), self.boot_ms))
    }

    /// All training runs, newest first, with live status overlaid.
    pub fn list_train_runs(&self) -> Result<Vec<TrainRunView>> {
        Ok(self
            .store
            .list_train_runs()?
            .into_iter()
            .map(|run| {
                let live = self.registry.observe(run.id);
                TrainRunView::reconcile(run, live, self.boot_ms)
            })
            .collect())
    }

    /// Delete a training run and its generation runs.
    ///
    /// A running worker is not stopped. Returns the number of generation runs
    /// removed.
    pub fn delete_train_run(&self, id: i64) -> Result<usize> {
        let removed = self
            .store
            .delete_train_run(id)?
            .ok_or(WavediffError::RunNotFound { kind: RunKind::Train, id })?;
        if self.registry.observe(id).is_some_and(|entry| !entry.status.is_terminal()) {
            warn!("Deleted train run {} while its worker is still running", id);
        }
        info!("Deleted train run {} and {} generation run(s)", id, removed);
        Ok(removed)
    }

    /// Follow a training run's log until it reaches a terminal status.
    ///
    /// The log path comes from the persisted record, so finished runs from a
    /// previous process replay their log and end with their persisted status.
    pub fn stream_train_logs(&self, id: i64) -> Result<BoxStream<'static, TailEvent>> {
        let run = self.find_train_run(id)?;
        let fallback = if run.status.is_terminal() {
            Fallback::Terminal(run.status)
        } else if run.created_at < self.boot_ms {
            Fallback::Stale(run.status)
        } else {
            Fallback::Wait
        };
        debug!("Streaming log for train run {} from {}", id, run.log_path.display());

        let tail = LogTail::new(
            id,
            run.log_path,
            Arc::clone(&self.registry),
            fallback,
            Duration::from_millis(self.tail.poll_interval_ms),
        );
        Ok(tail.into_stream().boxed())
    }

    pub(crate) fn find_train_run(&self, id: i64) -> Result<TrainRun> {
        self.store
            .get_train_run(id)?
            .ok_or(WavediffError::RunNotFound { kind: RunKind::Train, id })
    }
}
