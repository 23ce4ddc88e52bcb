//! Parameter marshaling for the worker programs.
//!
//! The configuration surface is fixed: each setting has one environment
//! variable. Data generation takes CLI flags instead.

use std::path::Path;

use crate::config::CheckpointConfig;
use crate::domain::{DataParams, TrainParams};

/// Every setting a worker program can receive through its environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerSetting {
    WindowSize,
    Stride,
    Wavelet,
    Scales,
    ImageSize,
    BatchSize,
    Epochs,
    LearningRate,
    NumTimesteps,
    SaveDir,
    OutputPath,
    CheckpointEvery,
    KeepCheckpoints,
    CheckpointPath,
    ResultPath,
}

impl WorkerSetting {
    pub fn env_key(&self) -> &'static str {
        match self {
            WorkerSetting::WindowSize => "WAVEDIFF_WINDOW_SIZE",
            WorkerSetting::Stride => "WAVEDIFF_STRIDE",
            WorkerSetting::Wavelet => "WAVEDIFF_WAVELET",
            WorkerSetting::Scales => "WAVEDIFF_SCALES",
            WorkerSetting::ImageSize => "WAVEDIFF_IMAGE_SIZE",
            WorkerSetting::BatchSize => "WAVEDIFF_BATCH_SIZE",
            WorkerSetting::Epochs => "WAVEDIFF_EPOCHS",
            WorkerSetting::LearningRate => "WAVEDIFF_LR",
            WorkerSetting::NumTimesteps => "WAVEDIFF_NUM_TIMESTEPS",
            WorkerSetting::SaveDir => "WAVEDIFF_SAVE_DIR",
            WorkerSetting::OutputPath => "WAVEDIFF_OUTPUT_PATH",
            WorkerSetting::CheckpointEvery => "WAVEDIFF_CHECKPOINT_EVERY",
            WorkerSetting::KeepCheckpoints => "WAVEDIFF_KEEP_CHECKPOINTS",
            WorkerSetting::CheckpointPath => "WAVEDIFF_CHECKPOINT_PATH",
            WorkerSetting::ResultPath => "WAVEDIFF_RESULT_PATH",
        }
    }
}

/// Environment pairs, ready for `WorkerCommand::envs`
pub type WorkerEnv = Vec<(String, String)>;

fn pair(setting: WorkerSetting, value: impl ToString) -> (String, String) {
    (setting.env_key().to_string(), value.to_string())
}

/// CLI flags for the data generator.
pub fn data_args(params: &DataParams) -> Vec<String> {
    [
        ("--year", params.year.to_string()),
        ("--month", params.month.to_string()),
        ("--days", params.days.to_string()),
        ("--mu", params.mu.to_string()),
        ("--sigma", params.sigma.to_string()),
        ("--lam", params.lam.to_string()),
        ("--jump_mean", params.jump_mean.to_string()),
        ("--jump_std", params.jump_std.to_string()),
    ]
    .into_iter()
    .flat_map(|(flag, value)| [flag.to_string(), value])
    .collect()
}

/// Environment for the data generator.
pub fn data_env(result_path: &Path) -> WorkerEnv {
    vec![pair(WorkerSetting::ResultPath, result_path.display())]
}

/// Environment for the trainer.
pub fn train_env(params: &TrainParams, save_dir: &Path, checkpoints: &CheckpointConfig) -> WorkerEnv {
    vec![
        pair(WorkerSetting::WindowSize, params.window_size),
        pair(WorkerSetting::Stride, params.stride),
        pair(WorkerSetting::Wavelet, &params.wavelet),
        pair(WorkerSetting::Scales, params.scales),
        pair(WorkerSetting::ImageSize, params.image_size),
        pair(WorkerSetting::BatchSize, params.batch_size),
        pair(WorkerSetting::Epochs, params.epochs),
        pair(WorkerSetting::LearningRate, params.lr),
        pair(WorkerSetting::NumTimesteps, params.num_timesteps),
        pair(WorkerSetting::SaveDir, save_dir.display()),
        pair(WorkerSetting::CheckpointEvery, checkpoints.every_epochs.max(1)),
        pair(WorkerSetting::KeepCheckpoints, checkpoints.keep_last),
    ]
}

/// Environment for the sampler.
pub fn sample_env(params: &TrainParams, save_dir: &Path, checkpoint: &Path, output_path: &Path) -> WorkerEnv {
    vec![
        pair(WorkerSetting::ImageSize, params.image_size),
        pair(WorkerSetting::NumTimesteps, params.num_timesteps),
        pair(WorkerSetting::SaveDir, save_dir.display()),
        pair(WorkerSetting::Epochs, params.epochs),
        pair(WorkerSetting::CheckpointPath, checkpoint.display()),
        pair(WorkerSetting::OutputPath, output_path.display()),
    ]
}
