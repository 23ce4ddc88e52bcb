//! Record store for WaveDiff runs.
//!
//! One SQLite table per run kind:
//! - **data_runs**: synthetic data-generation runs
//! - **train_runs**: training runs (deletable, cascades to generations)
//! - **generation_runs**: samples drawn from a successful training run
//!
//! # Example
//!
//! ```ignore
//! use wavediff::store::RunStore;
//!
//! let store = RunStore::open(Path::new("/var/lib/wavediff/wavediff.db"))?;
//! let run = store.create_train_run(&params, 10, |id| (log_path(id), ckpt_dir(id)))?;
//! store.set_train_status(run.id, RunStatus::Success)?;
//! ```

mod run_store;

pub use run_store::RunStore;
