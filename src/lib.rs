//! WaveDiff - run orchestration for synthetic data, training, and sampling
//!
//! WaveDiff launches external worker programs, records each run's lifecycle in
//! SQLite, reconciles in-memory live status with persisted history, streams
//! training logs as they grow, and prunes old model checkpoints.

pub mod checkpoint;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod id;
pub mod launcher;
pub mod recovery;
pub mod registry;
pub mod store;
pub mod tail;

pub use coordinator::Coordinator;
pub use error::{Result, WavediffError};
