//! Reconciled view of a training run.

use serde::Serialize;

use crate::domain::{RunStatus, TrainRun};
use crate::registry::LiveEntry;

/// Where a view's status came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusSource {
    /// The registry of this process
    Live,
    /// The store, and the status is trustworthy
    Persisted,
    /// The store says pending/running but no process owns the run
    Stale,
}

/// A training run as callers see it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainRunView {
    #[serde(flatten)]
    pub run: TrainRun,
    pub status_source: StatusSource,
    /// Worker process id while this process tracks the run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

impl TrainRunView {
    /// Overlay live state on a persisted record.
    ///
    /// `boot_ms` separates runs this process could own from runs a previous
    /// process left behind.
    pub fn reconcile(mut run: TrainRun, live: Option<LiveEntry>, boot_ms: i64) -> Self {
        match live {
            Some(entry) => {
                run.status = entry.status;
                Self {
                    run,
                    status_source: StatusSource::Live,
                    pid: entry.pid,
                }
            }
            None => {
                let status_source = if !run.status.is_terminal() && run.created_at < boot_ms {
                    StatusSource::Stale
                } else {
                    StatusSource::Persisted
                };
                Self {
                    run,
                    status_source,
                    pid: None,
                }
            }
        }
    }

    pub fn id(&self) -> i64 {
        self.run.id
    }

    pub fn status(&self) -> RunStatus {
        self.run.status
    }

    pub fn is_stale(&self) -> bool {
        self.status_source == StatusSource::Stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn run(status: RunStatus, created_at: i64) -> TrainRun {
        TrainRun {
            id: 4,
            created_at,
            params: serde_json::json!({}),
            epoch_count: 2,
            status,
            log_path: PathBuf::from("logs/train_4.log"),
            checkpoint_dir: PathBuf::from("checkpoints/run_4"),
        }
    }

    #[test]
    fn test_registry_overrides_store() {
        let live = LiveEntry {
            status: RunStatus::Running,
            pid: Some(77),
            log_path: PathBuf::from("logs/train_4.log"),
        };
        let view = TrainRunView::reconcile(run(RunStatus::Pending, 10), Some(live), 5);
        assert_eq!(view.status(), RunStatus::Running);
        assert_eq!(view.status_source, StatusSource::Live);
        assert_eq!(view.pid, Some(77));
    }

    #[test]
    fn test_terminal_persisted_status() {
        let view = TrainRunView::reconcile(run(RunStatus::Success, 10), None, 100);
        assert_eq!(view.status(), RunStatus::Success);
        assert_eq!(view.status_source, StatusSource::Persisted);
    }

    #[test]
    fn test_unfinished_run_from_previous_process_is_stale() {
        let view = TrainRunView::reconcile(run(RunStatus::Running, 10), None, 100);
        assert!(view.is_stale());
        assert_eq!(view.status(), RunStatus::Running);
    }

    #[test]
    fn test_serializes_flat() {
        let view = TrainRunView::reconcile(run(RunStatus::Failed, 10), None, 100);
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["id"], 4);
        assert_eq!(json["status"], "failed");
        assert_eq!(json["status_source"], "persisted");
        assert!(json.get("pid").is_none());
    }
}
