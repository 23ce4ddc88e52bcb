//! Generation runs: sample an image from a successful training run.

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use super::Coordinator;
use crate::checkpoint::CheckpointDir;
use crate::domain::{GenerationRun, RunStatus};
use crate::error::{Result, WavediffError};
use crate::id::unix_secs;
use crate::launcher::{WorkerCommand, settings};

/// Bytes of a generated image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub name: String,
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

/// Accept only a bare file name: no separators, no parent references.
pub fn validate_image_name(name: &str) -> Result<()> {
    let bare = !name.is_empty()
        && !name.contains(['/', '\\'])
        && !name.contains("..")
        && Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name);
    if bare {
        Ok(())
    } else {
        Err(WavediffError::ImageNotFound(name.to_string()))
    }
}

/// Claim `gen_{train_id}_{secs}.png`, suffixed `_{n}` if that name is taken.
///
/// The name is reserved by creating an empty placeholder with `create_new`,
/// so concurrent generations never share an output file. The sampler
/// overwrites the placeholder.
fn reserve_artifact(dir: &Path, train_run_id: i64, secs: u64) -> Result<(String, PathBuf)> {
    let stem = format!("gen_{}_{}", train_run_id, secs);
    let mut name = format!("{}.png", stem);
    let mut n = 1;
    loop {
        let path = dir.join(&name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => return Ok((name, path)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                name = format!("{}_{}.png", stem, n);
                n += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// True once the sampler has replaced the placeholder with real output.
fn wrote_output(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|meta| meta.is_file() && meta.len() > 0)
}

impl Coordinator {
    /// Run the sampler against a successful training run's newest checkpoint.
    ///
    /// The training run's persisted status must be `success`; anything else is
    /// rejected with `NotReady` before the sampler is started. Once the sampler
    /// has been invoked a generation run is recorded, `failed` unless it exited
    /// 0 and replaced the reserved placeholder with a non-empty file.
    pub async fn submit_generation(&self, train_run_id: i64) -> Result<GenerationRun> {
        let run = self.find_train_run(train_run_id)?;
        if run.status != RunStatus::Success {
            return Err(WavediffError::NotReady {
                train_run_id,
                status: run.status,
            });
        }
        let params = run.train_params()?;
        let checkpoint = CheckpointDir::new(&run.checkpoint_dir).latest()?.ok_or_else(|| {
            WavediffError::Precondition(format!(
                "training run {} has no checkpoint in {}",
                train_run_id,
                run.checkpoint_dir.display()
            ))
        })?;

        let generated_dir = self.paths.generated_dir();
        fs::create_dir_all(&generated_dir)?;
        let (name, output_path) = reserve_artifact(&generated_dir, train_run_id, unix_secs())?;

        let command = WorkerCommand::from_program("sampler", &self.workers.sampler)
            .envs(settings::sample_env(
                &params,
                &run.checkpoint_dir,
                &checkpoint.path,
                &output_path,
            ))
            .current_dir(&self.paths.work_dir());
        info!(
            "Sampling {} from train run {} (epoch {})",
            name, train_run_id, checkpoint.epoch
        );
        let output = self.launcher.run_captured(&command).await;

        let produced = output.success() && wrote_output(&output_path);
        if !produced {
            match fs::remove_file(&output_path) {
                Err(e) if e.kind() != ErrorKind::NotFound => {
                    debug!("Could not remove {}: {}", output_path.display(), e);
                }
                _ => {}
            }
        }
        let generation = self.store.insert_generation_run(
            train_run_id,
            &output_path,
            &name,
            RunStatus::from_exit(produced),
        )?;

        if !produced {
            let diagnostic = if output.success() {
                format!("sampler exited 0 but did not write {}", output_path.display())
            } else {
                output.diagnostic()
            };
            warn!("Generation run {} failed: {}", generation.id, diagnostic);
            return Err(WavediffError::WorkerFailed {
                run_id: Some(generation.id),
                diagnostic,
            });
        }

        info!("Generation run {} wrote {}", generation.id, output_path.display());
        Ok(generation)
    }

    /// Generation runs, newest first, optionally for one training run.
    pub fn list_generations(&self, train_run_id: Option<i64>) -> Result<Vec<GenerationRun>> {
        match train_run_id {
            Some(id) => self.store.list_generation_runs_for(id),
            None => self.store.list_generation_runs(),
        }
    }

    /// Read a generated image by bare file name.
    pub async fn fetch_generated_image(&self, name: &str) -> Result<GeneratedImage> {
        validate_image_name(name)?;
        let path = self.paths.generated_dir().join(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(GeneratedImage {
                name: name.to_string(),
                path,
                bytes,
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(WavediffError::ImageNotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}
