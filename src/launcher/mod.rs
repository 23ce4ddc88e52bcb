//! Process Launcher - synchronous and detached worker invocation
//!
//! - `command`: what to run and what came back
//! - `process`: spawning via tokio::process
//! - `settings`: parameter marshaling into CLI flags and `WAVEDIFF_*` env vars

pub mod command;
pub mod process;
pub mod settings;

pub use command::{WorkerCommand, WorkerOutput};
pub use process::{DetachedWorker, ProcessLauncher};
pub use settings::WorkerSetting;
