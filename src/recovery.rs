//! Crash recovery for runs a previous process left unfinished.
//!
//! A training run's worker is owned by the process that spawned it. If that
//! process dies, the persisted record stays `pending`/`running` forever and no
//! registry entry will ever finish it. The sweep marks such runs `failed`.
//!
//! Only runs created before `started_before_ms` are considered, and training
//! runs this process still tracks in its registry are skipped.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use log::{info, warn};

use crate::domain::{RunKind, RunStatus};
use crate::error::Result;
use crate::registry::LiveStatusRegistry;
use crate::store::RunStore;

/// Line appended to the train log of an interrupted run.
pub const INTERRUPTED_NOTE: &str = "[wavediff] run interrupted: the orchestrating process exited before the worker finished";

/// One run the sweep changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryAction {
    pub kind: RunKind,
    pub run_id: i64,
    /// Persisted status before the sweep
    pub previous: RunStatus,
}

/// Result of a recovery sweep
#[derive(Debug, Default)]
pub struct RecoveryReport {
    pub actions: Vec<RecoveryAction>,
    /// Runs that were left alone because this process still owns them
    pub skipped_live: Vec<i64>,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn count(&self, kind: RunKind) -> usize {
        self.actions.iter().filter(|a| a.kind == kind).count()
    }
}

/// Mark interrupted data and training runs as failed.
pub fn recover_interrupted(
    store: &RunStore,
    registry: &LiveStatusRegistry,
    started_before_ms: i64,
) -> Result<RecoveryReport> {
    let mut report = RecoveryReport::default();

    for run in store.list_unfinished_train_runs()? {
        if run.created_at >= started_before_ms {
            continue;
        }
        if registry.observe(run.id).is_some() {
            report.skipped_live.push(run.id);
            continue;
        }
        if !store.set_train_status(run.id, RunStatus::Failed)? {
            continue;
        }
        append_note(&run.log_path);
        warn!("Marked interrupted train run {} as failed (was {})", run.id, run.status);
        report.actions.push(RecoveryAction {
            kind: RunKind::Train,
            run_id: run.id,
            previous: run.status,
        });
    }

    for run in store.list_data_runs_by_status(RunStatus::Running)? {
        if run.created_at >= started_before_ms {
            continue;
        }
        let log = format!("{}{}\n", run.log, INTERRUPTED_NOTE);
        if !store.complete_data_run(run.id, RunStatus::Failed, run.row_count, &run.artifact_path, &log)? {
            continue;
        }
        warn!("Marked interrupted data run {} as failed", run.id);
        report.actions.push(RecoveryAction {
            kind: RunKind::Data,
            run_id: run.id,
            previous: run.status,
        });
    }

    info!(
        "Recovery sweep: {} train run(s), {} data run(s) marked failed",
        report.count(RunKind::Train),
        report.count(RunKind::Data)
    );
    Ok(report)
}

fn append_note(log_path: &Path) {
    if log_path.as_os_str().is_empty() {
        return;
    }
    let result = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .and_then(|mut file| writeln!(file, "{}", INTERRUPTED_NOTE));
    if let Err(e) = result {
        warn!("Could not annotate {}: {}", log_path.display(), e);
    }
}
