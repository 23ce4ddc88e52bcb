//! Submission parameters for data-generation and training runs.
//!
//! Defaults mirror what the worker programs assume when nothing is passed.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WavediffError};

/// Parameters for the synthetic price-series generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataParams {
    pub days: u32,
    pub mu: f64,
    pub sigma: f64,
    pub lam: f64,
    pub jump_mean: f64,
    pub jump_std: f64,
    pub year: i32,
    pub month: u32,
}

impl Default for DataParams {
    fn default() -> Self {
        Self {
            days: 30,
            mu: 0.05,
            sigma: 0.2,
            lam: 0.1,
            jump_mean: -0.02,
            jump_std: 0.1,
            year: 2022,
            month: 1,
        }
    }
}

impl DataParams {
    /// Reject parameter sets the generator cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.days == 0 {
            return Err(WavediffError::InvalidParams("days must be positive".into()));
        }
        if !(1..=12).contains(&self.month) {
            return Err(WavediffError::InvalidParams(format!(
                "month must be in 1..=12, got {}",
                self.month
            )));
        }
        if self.sigma < 0.0 || self.jump_std < 0.0 || self.lam < 0.0 {
            return Err(WavediffError::InvalidParams(
                "sigma, lam and jump_std must not be negative".into(),
            ));
        }
        Ok(())
    }
}

/// Parameters for a diffusion training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainParams {
    pub window_size: u32,
    pub stride: u32,
    pub wavelet: String,
    pub scales: u32,
    pub image_size: u32,
    pub batch_size: u32,
    pub epochs: u32,
    pub lr: f64,
    pub num_timesteps: u32,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            window_size: 256,
            stride: 64,
            wavelet: "morl".to_string(),
            scales: 128,
            image_size: 128,
            batch_size: 16,
            epochs: 10,
            lr: 1e-4,
            num_timesteps: 1000,
        }
    }
}

impl TrainParams {
    /// Reject parameter sets the trainer cannot run with.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("window_size", self.window_size),
            ("stride", self.stride),
            ("scales", self.scales),
            ("image_size", self.image_size),
            ("batch_size", self.batch_size),
            ("epochs", self.epochs),
            ("num_timesteps", self.num_timesteps),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(WavediffError::InvalidParams(format!("{} must be positive", name)));
        }
        if self.stride > self.window_size {
            return Err(WavediffError::InvalidParams(format!(
                "stride {} exceeds window_size {}",
                self.stride, self.window_size
            )));
        }
        if self.wavelet.trim().is_empty() {
            return Err(WavediffError::InvalidParams("wavelet must not be empty".into()));
        }
        if !(self.lr > 0.0 && self.lr.is_finite()) {
            return Err(WavediffError::InvalidParams(format!("lr must be positive, got {}", self.lr)));
        }
        Ok(())
    }
}
