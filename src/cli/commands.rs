//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - data / data-runs: synthetic data generation
//! - train / runs / show / logs / delete: training runs
//! - generate / generations / image: sampling from trained models
//! - recover: mark runs a previous process left unfinished as failed

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use wavediff::domain::{DataParams, TrainParams};

/// WaveDiff - orchestrates data generation, diffusion training, and sampling
#[derive(Parser, Debug)]
#[command(name = "wavediff")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate a synthetic price series
    Data(DataArgs),

    /// List data-generation runs
    DataRuns,

    /// Start a training run and follow its log
    Train(TrainArgs),

    /// List training runs
    Runs,

    /// Show one training run
    Show {
        /// Training run ID
        id: i64,
    },

    /// Follow a training run's log
    Logs {
        /// Training run ID
        id: i64,
    },

    /// Delete a training run and its generations
    Delete {
        /// Training run ID
        id: i64,
    },

    /// Sample an image from a successful training run
    Generate {
        /// Training run ID
        train_run_id: i64,
    },

    /// List generation runs
    Generations {
        /// Only generations from this training run
        #[arg(short, long)]
        train_run: Option<i64>,
    },

    /// Copy a generated image out of the generated directory
    Image {
        /// Image file name, e.g. gen_3_1700000000.png
        file: String,

        /// Destination (defaults to the file name in the current directory)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Mark runs left pending/running by a previous process as failed
    Recover,
}

/// Data generator parameters
#[derive(Args, Debug, Clone)]
#[command(allow_negative_numbers = true)]
pub struct DataArgs {
    /// Number of trading days to simulate
    #[arg(long, default_value_t = 30)]
    pub days: u32,

    /// Drift
    #[arg(long, default_value_t = 0.05)]
    pub mu: f64,

    /// Volatility
    #[arg(long, default_value_t = 0.2)]
    pub sigma: f64,

    /// Jump intensity
    #[arg(long, default_value_t = 0.1)]
    pub lam: f64,

    #[arg(long, default_value_t = -0.02)]
    pub jump_mean: f64,

    #[arg(long, default_value_t = 0.1)]
    pub jump_std: f64,

    #[arg(long, default_value_t = 2022)]
    pub year: i32,

    #[arg(long, default_value_t = 1)]
    pub month: u32,
}

impl From<&DataArgs> for DataParams {
    fn from(args: &DataArgs) -> Self {
        DataParams {
            days: args.days,
            mu: args.mu,
            sigma: args.sigma,
            lam: args.lam,
            jump_mean: args.jump_mean,
            jump_std: args.jump_std,
            year: args.year,
            month: args.month,
        }
    }
}

/// Training parameters
#[derive(Args, Debug, Clone)]
pub struct TrainArgs {
    #[arg(long, default_value_t = 256)]
    pub window_size: u32,

    #[arg(long, default_value_t = 64)]
    pub stride: u32,

    /// Continuous wavelet used for the scalogram
    #[arg(long, default_value = "morl")]
    pub wavelet: String,

    #[arg(long, default_value_t = 128)]
    pub scales: u32,

    #[arg(long, default_value_t = 128)]
    pub image_size: u32,

    #[arg(long, default_value_t = 16)]
    pub batch_size: u32,

    #[arg(short, long, default_value_t = 10)]
    pub epochs: u32,

    /// Learning rate
    #[arg(long, default_value_t = 1e-4)]
    pub lr: f64,

    /// Diffusion steps
    #[arg(long, default_value_t = 1000)]
    pub num_timesteps: u32,
}

impl From<&TrainArgs> for TrainParams {
    fn from(args: &TrainArgs) -> Self {
        TrainParams {
            window_size: args.window_size,
            stride: args.stride,
            wavelet: args.wavelet.clone(),
            scales: args.scales,
            image_size: args.image_size,
            batch_size: args.batch_size,
            epochs: args.epochs,
            lr: args.lr,
            num_timesteps: args.num_timesteps,
        }
    }
}
