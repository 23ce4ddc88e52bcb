//! Persisted run records.
//!
//! One struct per table. Ids are assigned by the store; `created_at` is Unix
//! milliseconds.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::domain::params::TrainParams;
use crate::domain::status::RunStatus;
use crate::error::Result;

/// A synthetic data-generation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRun {
    pub id: i64,
    pub created_at: i64,
    /// Submitted parameters, stored verbatim
    pub params: serde_json::Value,
    /// CSV produced by the generator
    pub artifact_path: PathBuf,
    pub row_count: u64,
    /// running | success | failed
    pub status: RunStatus,
    /// Captured stdout followed by stderr
    pub log: String,
}

/// A model training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainRun {
    pub id: i64,
    pub created_at: i64,
    pub params: serde_json::Value,
    pub epoch_count: u32,
    /// Persisted status; the live registry may know better while the
    /// orchestrating process is alive
    pub status: RunStatus,
    /// Assigned once the id is known
    pub log_path: PathBuf,
    /// Assigned once the id is known
    pub checkpoint_dir: PathBuf,
}

impl TrainRun {
    /// Decode the stored parameters, filling anything missing with defaults.
    pub fn train_params(&self) -> Result<TrainParams> {
        Ok(serde_json::from_value(self.params.clone())?)
    }
}

/// A sample produced from a successful training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRun {
    pub id: i64,
    pub created_at: i64,
    pub train_run_id: i64,
    pub artifact_path: PathBuf,
    pub artifact_name: String,
    /// success | failed
    pub status: RunStatus,
}

impl GenerationRun {
    /// Service-relative URL the image is fetched from.
    pub fn image_url(&self) -> String {
        format!("/api/image/{}", self.artifact_name)
    }
}
