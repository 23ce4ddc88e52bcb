//! Domain types for WaveDiff
//!
//! - Run records for the three run kinds (data, train, generation)
//! - RunStatus / RunKind discriminators
//! - Submission parameters

pub mod params;
pub mod records;
pub mod status;

pub use params::{DataParams, TrainParams};
pub use records::{DataRun, GenerationRun, TrainRun};
pub use status::{RunKind, RunStatus};
