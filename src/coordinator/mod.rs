//! Run Coordinator - submits runs and reconciles live and persisted state
//!
//! The coordinator owns every status write. It ties together:
//! - the `RunStore` for durable records
//! - the `LiveStatusRegistry` for in-flight training runs
//! - the `ProcessLauncher` for worker programs
//! - checkpoint retention and log tailing
//!
//! Training runs are handed to background tasks bounded by a semaphore sized
//! from `concurrency.max_training_jobs`; data and generation runs execute
//! inline with the request.

mod data;
mod generation;
mod train;
mod view;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info};
use tokio::sync::Semaphore;

use crate::config::{CheckpointConfig, Config, PathsConfig, TailConfig, WorkersConfig};
use crate::error::Result;
use crate::id::now_ms;
use crate::launcher::ProcessLauncher;
use crate::recovery::{self, RecoveryReport};
use crate::registry::LiveStatusRegistry;
use crate::store::RunStore;

pub use data::{DataResult, parse_row_count};
pub use generation::{GeneratedImage, validate_image_name};
pub use view::{StatusSource, TrainRunView};

/// Orchestrates data, training, and generation runs
pub struct Coordinator {
    store: Arc<RunStore>,
    registry: Arc<LiveStatusRegistry>,
    launcher: ProcessLauncher,
    paths: PathsConfig,
    workers: WorkersConfig,
    checkpoints: CheckpointConfig,
    tail: TailConfig,
    training_slots: Arc<Semaphore>,
    /// Runs created before this instant cannot be owned by this coordinator
    boot_ms: i64,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("base_dir", &self.paths.base_dir)
            .field("registry", &self.registry)
            .field("boot_ms", &self.boot_ms)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Create the directory layout, open the database, and optionally sweep
    /// runs a previous process left unfinished.
    pub fn open(config: &Config) -> Result<Self> {
        let paths = &config.paths;
        for dir in [
            paths.base_dir.clone(),
            paths.logs_dir(),
            paths.checkpoints_dir(),
            paths.generated_dir(),
            paths.work_dir(),
        ] {
            fs::create_dir_all(&dir)?;
        }

        let store = RunStore::open(&paths.database())?;
        info!("Opened run store at {}", paths.database().display());
        let coordinator = Self::new(config, store);

        if config.recovery.mark_interrupted_on_startup {
            coordinator.recover_interrupted()?;
        }
        Ok(coordinator)
    }

    /// Build a coordinator around an already-open store.
    pub fn new(config: &Config, store: RunStore) -> Self {
        let jobs = config.concurrency.max_training_jobs.max(1);
        debug!("Training concurrency limit: {}", jobs);
        Self {
            store: Arc::new(store),
            registry: Arc::new(LiveStatusRegistry::new()),
            launcher: ProcessLauncher::new(),
            paths: config.paths.clone(),
            workers: config.workers.clone(),
            checkpoints: config.checkpoints.clone(),
            tail: config.tail.clone(),
            training_slots: Arc::new(Semaphore::new(jobs)),
            boot_ms: now_ms(),
        }
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    pub fn registry(&self) -> &LiveStatusRegistry {
        &self.registry
    }

    pub fn paths(&self) -> &PathsConfig {
        &self.paths
    }

    /// Mark runs left `pending`/`running` by a previous process as failed.
    pub fn recover_interrupted(&self) -> Result<RecoveryReport> {
        recovery::recover_interrupted(&self.store, &self.registry, self.boot_ms)
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}
