//! Checkpoint retention for training runs.
//!
//! Snapshots are named `model_epoch_{N}.pt` inside a run's checkpoint
//! directory. After a run ends only the `keep_last` highest epochs survive.
//! Retention is by count only, never by age or size.

use std::fs;
use std::path::PathBuf;

use log::{info, warn};

use crate::error::Result;

const PREFIX: &str = "model_epoch_";
const SUFFIX: &str = ".pt";

/// File name for the snapshot taken after `epoch` (0-indexed).
pub fn checkpoint_file_name(epoch: u32) -> String {
    format!("{}{}{}", PREFIX, epoch, SUFFIX)
}

/// Epoch index embedded in a snapshot file name.
pub fn parse_epoch(file_name: &str) -> Option<u32> {
    file_name.strip_prefix(PREFIX)?.strip_suffix(SUFFIX)?.parse().ok()
}

/// A snapshot file on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub epoch: u32,
    pub path: PathBuf,
}

/// Outcome of a retention pass
#[derive(Debug, Default)]
pub struct PruneReport {
    pub kept: Vec<Checkpoint>,
    pub deleted: Vec<Checkpoint>,
    /// Snapshots that could not be removed, with the reason
    pub failed: Vec<(Checkpoint, String)>,
}

/// One run's checkpoint directory
#[derive(Debug, Clone)]
pub struct CheckpointDir {
    dir: PathBuf,
}

impl CheckpointDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Write the snapshot for `epoch`, creating the directory if needed.
    #[cfg(test)]
    pub fn save(&self, epoch: u32, state: &[u8]) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(checkpoint_file_name(epoch));
        fs::write(&path, state)?;
        Ok(path)
    }

    /// All snapshots, sorted by epoch ascending. A missing directory is empty.
    pub fn list(&self) -> Result<Vec<Checkpoint>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let pattern = format!(
            "{}/{}*{}",
            glob::Pattern::escape(&self.dir.to_string_lossy()),
            PREFIX,
            SUFFIX
        );
        let paths = glob::glob(&pattern).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        let mut checkpoints: Vec<Checkpoint> = paths
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!("Skipping unreadable checkpoint entry: {}", e);
                    None
                }
            })
            .filter_map(|path| {
                let epoch = parse_epoch(path.file_name()?.to_str()?)?;
                Some(Checkpoint { epoch, path })
            })
            .collect();
        checkpoints.sort_by_key(|c| c.epoch);
        Ok(checkpoints)
    }

    /// Highest-epoch snapshot, if any.
    pub fn latest(&self) -> Result<Option<Checkpoint>> {
        Ok(self.list()?.pop())
    }

    /// Delete all but the `keep_last` highest-epoch snapshots.
    ///
    /// Deletion is best-effort per file; failures are logged and reported, never
    /// raised. `keep_last == 0` keeps everything.
    pub fn prune(&self, keep_last: usize) -> Result<PruneReport> {
        let mut checkpoints = self.list()?;
        if keep_last == 0 || checkpoints.len() <= keep_last {
            return Ok(PruneReport {
                kept: checkpoints,
                ..Default::default()
            });
        }

        let kept = checkpoints.split_off(checkpoints.len() - keep_last);
        let mut report = PruneReport {
            kept,
            ..Default::default()
        };

        for checkpoint in checkpoints {
            match fs::remove_file(&checkpoint.path) {
                Ok(()) => report.deleted.push(checkpoint),
                Err(e) => {
                    warn!("Failed to delete checkpoint {}: {}", checkpoint.path.display(), e);
                    report.failed.push((checkpoint, e.to_string()));
                }
            }
        }

        info!(
            "Pruned {} checkpoint(s) in {}, kept {}",
            report.deleted.len(),
            self.dir.display(),
            report.kept.len()
        );
        Ok(report)
    }
}
