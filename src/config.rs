use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub workers: WorkersConfig,
    pub tail: TailConfig,
    pub checkpoints: CheckpointConfig,
    pub concurrency: ConcurrencyConfig,
    pub recovery: RecoveryConfig,
}

/// Filesystem layout. Unset sub-paths derive from `base_dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub base_dir: PathBuf,
    pub logs_dir: Option<PathBuf>,
    pub checkpoints_dir: Option<PathBuf>,
    pub generated_dir: Option<PathBuf>,
    pub database: Option<PathBuf>,
    /// Working directory the worker programs run in
    pub work_dir: Option<PathBuf>,
    /// Where the data generator writes its CSV, relative to `work_dir`
    pub data_artifact: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            base_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("wavediff"),
            logs_dir: None,
            checkpoints_dir: None,
            generated_dir: None,
            database: None,
            work_dir: None,
            data_artifact: PathBuf::from("data/index_time_series.csv"),
        }
    }
}

impl PathsConfig {
    /// Lay everything out under a single directory.
    pub fn rooted_at(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.logs_dir.clone().unwrap_or_else(|| self.base_dir.join("logs"))
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.checkpoints_dir
            .clone()
            .unwrap_or_else(|| self.base_dir.join("checkpoints"))
    }

    pub fn generated_dir(&self) -> PathBuf {
        self.generated_dir
            .clone()
            .unwrap_or_else(|| self.base_dir.join("generated"))
    }

    pub fn database(&self) -> PathBuf {
        self.database.clone().unwrap_or_else(|| self.base_dir.join("wavediff.db"))
    }

    pub fn work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(|| self.base_dir.clone())
    }

    pub fn data_artifact(&self) -> PathBuf {
        self.work_dir().join(&self.data_artifact)
    }

    /// `{logs_dir}/train_{id}.log`
    pub fn train_log_path(&self, run_id: i64) -> PathBuf {
        self.logs_dir().join(format!("train_{}.log", run_id))
    }

    /// `{checkpoints_dir}/run_{id}`
    pub fn checkpoint_dir(&self, run_id: i64) -> PathBuf {
        self.checkpoints_dir().join(format!("run_{}", run_id))
    }

    /// `{logs_dir}/data_{id}.result.json`
    pub fn data_result_path(&self, run_id: i64) -> PathBuf {
        self.logs_dir().join(format!("data_{}.result.json", run_id))
    }
}

/// An external worker program: executable plus leading arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerProgram {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Upper bound for synchronous invocations
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl WorkerProgram {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            timeout_ms: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    /// Run an inline POSIX shell script. Appended arguments start at `$1`.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script).arg("sh")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub data_generator: WorkerProgram,
    pub trainer: WorkerProgram,
    pub sampler: WorkerProgram,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            data_generator: WorkerProgram::new("python3").arg("data_downloader.py").timeout_ms(600000),
            trainer: WorkerProgram::new("python3").arg("train.py"),
            sampler: WorkerProgram::new("python3").arg("generate.py").timeout_ms(1800000),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TailConfig {
    pub poll_interval_ms: u64,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self { poll_interval_ms: 500 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Snapshot cadence passed to the trainer
    pub every_epochs: u32,
    /// Snapshots kept after a run; 0 keeps all
    pub keep_last: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            every_epochs: 1,
            keep_last: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub max_training_jobs: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self { max_training_jobs: 2 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Mark runs a previous process left pending/running as failed on startup
    pub mark_interrupted_on_startup: bool,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_sections() {
        let yaml = serde_yaml::to_string(&Config::default()).unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        let keys: Vec<&str> = value
            .as_mapping()
            .unwrap()
            .keys()
            .filter_map(|k| k.as_str())
            .collect();
        assert_eq!(
            keys,
            vec!["paths", "workers", "tail", "checkpoints", "concurrency", "recovery"]
        );
    }

    #[test]
    fn test_default_sub_paths_derive_from_base() {
        let paths = PathsConfig::rooted_at("/srv/wavediff");
        assert_eq!(paths.logs_dir(), PathBuf::from("/srv/wavediff/logs"));
        assert_eq!(paths.checkpoints_dir(), PathBuf::from("/srv/wavediff/checkpoints"));
        assert_eq!(paths.generated_dir(), PathBuf::from("/srv/wavediff/generated"));
        assert_eq!(paths.database(), PathBuf::from("/srv/wavediff/wavediff.db"));
        assert_eq!(
            paths.data_artifact(),
            PathBuf::from("/srv/wavediff/data/index_time_series.csv")
        );
    }

    #[test]
    fn test_path_conventions() {
        let paths = PathsConfig::rooted_at("/srv/wavediff");
        assert_eq!(paths.train_log_path(12), PathBuf::from("/srv/wavediff/logs/train_12.log"));
        assert_eq!(paths.checkpoint_dir(12), PathBuf::from("/srv/wavediff/checkpoints/run_12"));
        assert_eq!(
            paths.data_result_path(3),
            PathBuf::from("/srv/wavediff/logs/data_3.result.json")
        );
    }

    #[test]
    fn test_load_from_yaml_keeps_defaults_for_missing_sections() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("wavediff.yml");
        fs::write(
            &path,
            r#"
paths:
  base_dir: /data/wd
  logs_dir: /var/log/wd
checkpoints:
  keep_last: 5
workers:
  trainer:
    command: /usr/bin/python3
    args: ["train.py"]
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.paths.logs_dir(), PathBuf::from("/var/log/wd"));
        assert_eq!(config.paths.checkpoints_dir(), PathBuf::from("/data/wd/checkpoints"));
        assert_eq!(config.checkpoints.keep_last, 5);
        assert_eq!(config.checkpoints.every_epochs, 1);
        assert_eq!(config.workers.trainer.command, "/usr/bin/python3");
        assert_eq!(config.workers.sampler.args, vec!["generate.py".to_string()]);
        assert_eq!(config.tail.poll_interval_ms, 500);
        assert!(!config.recovery.mark_interrupted_on_startup);
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let missing = PathBuf::from("/nonexistent/wavediff.yml");
        assert!(Config::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_worker_program_shell() {
        let program = WorkerProgram::shell("echo hi");
        assert_eq!(program.command, "sh");
        assert_eq!(program.args, vec!["-c", "echo hi", "sh"]);
        assert_eq!(program.timeout_ms, None);
    }
}
