//! Live Status Registry - in-memory execution state for training runs
//!
//! Maps run id to `{status, worker pid, log path}` for as long as this process
//! lives. While an entry exists it is authoritative over the persisted status;
//! after a restart it is gone and the store is the only record.
//!
//! Entries are created once, in `running`, and move monotonically to a
//! terminal status. They are never evicted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use log::{debug, warn};
use tokio::sync::watch;

use crate::domain::RunStatus;

/// Snapshot of one run's live state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveEntry {
    pub status: RunStatus,
    /// OS process id of the worker, once spawned
    pub pid: Option<u32>,
    pub log_path: PathBuf,
}

struct Slot {
    entry: LiveEntry,
    status_tx: watch::Sender<RunStatus>,
}

/// Process-wide registry shared by the coordinator and log streams.
///
/// Readers take a shared lock; each run has exactly one writer (its background
/// task), and every write is a short exclusive section.
#[derive(Default)]
pub struct LiveStatusRegistry {
    slots: RwLock<HashMap<i64, Slot>>,
}

impl std::fmt::Debug for LiveStatusRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveStatusRegistry")
            .field("entries", &self.len())
            .finish()
    }
}

impl LiveStatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a `running` entry before the worker is spawned.
    ///
    /// Returns false (and changes nothing) if the run is already registered.
    pub fn register(&self, run_id: i64, log_path: &Path) -> bool {
        let mut slots = match self.slots.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slots.contains_key(&run_id) {
            warn!("Run {} is already registered", run_id);
            return false;
        }
        let (status_tx, _) = watch::channel(RunStatus::Running);
        slots.insert(
            run_id,
            Slot {
                entry: LiveEntry {
                    status: RunStatus::Running,
                    pid: None,
                    log_path: log_path.to_path_buf(),
                },
                status_tx,
            },
        );
        debug!("Registered run {}", run_id);
        true
    }

    /// Record the worker's process id.
    pub fn attach_pid(&self, run_id: i64, pid: u32) {
        let mut slots = match self.slots.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(slot) = slots.get_mut(&run_id) {
            slot.entry.pid = Some(pid);
        }
    }

    /// Current entry, or None if this process has no memory of the run.
    pub fn observe(&self, run_id: i64) -> Option<LiveEntry> {
        let slots = match self.slots.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots.get(&run_id).map(|slot| slot.entry.clone())
    }

    /// Move an entry to a terminal status.
    ///
    /// Returns false if the run is unknown, already terminal, or `status` is
    /// not terminal.
    pub fn finish(&self, run_id: i64, status: RunStatus) -> bool {
        if !status.is_terminal() {
            warn!("Refusing non-terminal finish for run {}: {}", run_id, status);
            return false;
        }
        let mut slots = match self.slots.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(slot) = slots.get_mut(&run_id) else {
            warn!("Finish for unregistered run {}", run_id);
            return false;
        };
        if slot.entry.status.is_terminal() {
            warn!(
                "Run {} already finished as {}, ignoring {}",
                run_id, slot.entry.status, status
            );
            return false;
        }
        slot.entry.status = status;
        slot.status_tx.send_replace(status);
        debug!("Run {} finished: {}", run_id, status);
        true
    }

    /// Watch a run's status; resolves terminal transitions without polling.
    pub fn subscribe(&self, run_id: i64) -> Option<watch::Receiver<RunStatus>> {
        let slots = match self.slots.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots.get(&run_id).map(|slot| slot.status_tx.subscribe())
    }

    pub fn len(&self) -> usize {
        match self.slots.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
