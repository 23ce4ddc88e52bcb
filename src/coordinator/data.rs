//! Data-generation runs: synchronous, one status transition.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::Deserialize;

use super::{Coordinator, ensure_parent};
use crate::domain::{DataParams, DataRun, RunKind, RunStatus};
use crate::error::{Result, WavediffError};
use crate::launcher::{WorkerCommand, settings};

const ROWS_MARKER: &str = "Rows generated:";

/// Structured result the generator may write to `WAVEDIFF_RESULT_PATH`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DataResult {
    pub rows: u64,
    #[serde(default)]
    pub artifact_path: Option<PathBuf>,
}

impl DataResult {
    /// Read and remove the result file. Missing or malformed files yield None.
    fn take(path: &Path) -> Option<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                return None;
            }
        };
        if let Err(e) = fs::remove_file(path) {
            debug!("Could not remove {}: {}", path.display(), e);
        }
        match serde_json::from_str(&text) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!("Ignoring malformed result file {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Row count from the last `Rows generated: <N>` line of the generator output.
pub fn parse_row_count(stdout: &str) -> Option<u64> {
    stdout.lines().rev().find_map(|line| {
        let (_, rest) = line.split_once(ROWS_MARKER)?;
        rest.split_whitespace().next()?.parse().ok()
    })
}

impl Coordinator {
    /// Run the data generator to completion and record the outcome.
    ///
    /// The record is created `running` before the worker starts. A failed
    /// worker is persisted as `failed` and returned as `WorkerFailed`.
    pub async fn submit_data_run(&self, params: &DataParams) -> Result<DataRun> {
        params.validate()?;
        let work_dir = self.paths.work_dir();
        fs::create_dir_all(&work_dir)?;

        let default_artifact = self.paths.data_artifact();
        let run = self
            .store
            .insert_data_run(&serde_json::to_value(params)?, &default_artifact)?;
        info!("Submitted data run {}", run.id);

        let result_path = self.paths.data_result_path(run.id);
        ensure_parent(&result_path)?;
        match fs::remove_file(&result_path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                debug!("Could not remove stale {}: {}", result_path.display(), e);
            }
            _ => {}
        }

        let command = WorkerCommand::from_program("data_generator", &self.workers.data_generator)
            .args(settings::data_args(params))
            .envs(settings::data_env(&result_path))
            .current_dir(&work_dir);
        let output = self.launcher.run_captured(&command).await;

        let structured = DataResult::take(&result_path);
        let row_count = match &structured {
            Some(result) => result.rows,
            None => parse_row_count(&output.stdout).unwrap_or(0),
        };
        let artifact_path = structured
            .and_then(|result| result.artifact_path)
            .map(|path| work_dir.join(path))
            .unwrap_or(default_artifact);
        let status = RunStatus::from_exit(output.success());
        let log = output.combined();

        if !self
            .store
            .complete_data_run(run.id, status, row_count, &artifact_path, &log)?
        {
            warn!(
                "Data run {} was removed or already finalized; keeping the stored record",
                run.id
            );
        }
        info!("Data run {} finished: {} ({} rows)", run.id, status, row_count);

        if status == RunStatus::Failed {
            return Err(WavediffError::WorkerFailed {
                run_id: Some(run.id),
                diagnostic: output.diagnostic(),
            });
        }

        Ok(DataRun {
            status,
            row_count,
            artifact_path,
            log,
            ..run
        })
    }

    /// All data runs, newest first.
    pub fn list_data_runs(&self) -> Result<Vec<DataRun>> {
        self.store.list_data_runs()
    }

    pub fn get_data_run(&self, id: i64) -> Result<DataRun> {
        self.store
            .get_data_run(id)?
            .ok_or(WavediffError::RunNotFound { kind: RunKind::Data, id })
    }
}
