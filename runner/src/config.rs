use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::Error,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{error, warn};

// check if a file is executable
pub fn check_executable(path: &Path) -> Result<bool, ConfigErrors> {
    if !path.is_file() {
        Err(ConfigErrors::FileNotFound(path.to_path_buf()))
    } else {
        match File::open(path).map(|file| file.metadata()) {
            Ok(Ok(metadata)) => Ok((metadata.mode() & 0o111) != 0),
            Ok(Err(e)) | Err(e) => Err(ConfigErrors::MetadataNotFound(e)),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Executor not supported: {0}")]
    UnsupportedExecutor(String),
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
    #[error("Metadata not found")]
    MetadataNotFound(#[from] Error),
    #[error("Settings could not be read: {0}")]
    Read(Error),
    #[error("Settings could not be parsed: {0}")]
    Deserialize(#[from] serde_yaml::Error),
    #[error("Settings failed the preflight checks, see the errors above")]
    Preflight,
}

/// Settings of the runner itself, the per batch state lives in the batch file
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    // Name of the selected executor, see Executors::load for the selection proccess
    #[serde(default = "default_executor")]
    pub name: String,
    #[serde(default = "default_sacct")]
    pub sacct: PathBuf,
    #[serde(default = "default_sbatch")]
    pub sbatch: PathBuf,
    // timeout for a single sacct/sbatch call in ms
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    // passed to every sbatch call before the per batch arguments
    #[serde(default)]
    pub sbatch_args: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct ReportConfig {
    // number of example jobs shown per state
    #[serde(default = "default_samples")]
    pub samples: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            name: default_executor(),
            sacct: default_sacct(),
            sbatch: default_sbatch(),
            timeout: default_timeout(),
            sbatch_args: Vec::new(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            samples: default_samples(),
        }
    }
}

impl RunnerConfig {
    /// Load settings from a yaml file, no file means defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigErrors> {
        let mut config = match path {
            Some(path) => {
                let content = fs::read_to_string(path).map_err(|error| {
                    if error.kind() == std::io::ErrorKind::NotFound {
                        ConfigErrors::FileNotFound(path.to_path_buf())
                    } else {
                        ConfigErrors::Read(error)
                    }
                })?;

                serde_yaml::from_str::<Self>(&content)?
            }
            None => Self::default(),
        };

        if config.preflight_checks() {
            Err(ConfigErrors::Preflight)
        } else {
            Ok(config)
        }
    }

    /// Returns true if any error was found, every problem is logged before returning
    pub fn preflight_checks(&mut self) -> bool {
        let mut contains_error = false;

        self.executor.name = self.executor.name.to_lowercase();
        if self.executor.name != "slurm" {
            error!(
                "executor.name ({}) is not supported, please use `slurm`",
                self.executor.name
            );
            contains_error = true;
        }

        if self.executor.timeout == 0 {
            error!("executor.timeout cannot be 0, every sacct/sbatch call would time out");
            contains_error = true;
        }

        // bare names are resolved through PATH when the command is spawned
        for (name, exec) in [
            ("sacct", &self.executor.sacct),
            ("sbatch", &self.executor.sbatch),
        ] {
            if exec.components().count() <= 1 {
                continue;
            }

            match check_executable(exec) {
                Ok(true) => {}
                Ok(false) => {
                    error!(
                        "executor.{name} target {} is not executable",
                        exec.to_string_lossy()
                    );
                    contains_error = true;
                }
                Err(e) => {
                    error!(
                        "Failed to determine if executor.{name} ({}) is an executable: {e}",
                        exec.to_string_lossy()
                    );
                    contains_error = true;
                }
            }
        }

        if self.report.samples == 0 {
            warn!("report.samples is 0, the status report will only show counts");
        }

        contains_error
    }
}

fn default_executor() -> String {
    "slurm".to_owned()
}

fn default_sacct() -> PathBuf {
    PathBuf::from("sacct")
}

fn default_sbatch() -> PathBuf {
    PathBuf::from("sbatch")
}

fn default_timeout() -> u64 {
    60_000
}

fn default_samples() -> usize {
    5
}
