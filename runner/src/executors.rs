mod command;
pub mod slurm;

use crate::{
    accounting::AccountingRecord,
    config::{ConfigErrors, ExecutorConfig},
};
use std::{io, path::PathBuf, time::Duration};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Failed to spawn {tool}: {source}")]
    Spawn { tool: String, source: io::Error },
    #[error("Failed to wait for {tool}: {source}")]
    Wait { tool: String, source: io::Error },
    #[error("{tool} did not finish within {timeout:?} and was killed")]
    Timeout { tool: String, timeout: Duration },
    #[error("{tool} exited with status {code}:\n{output}")]
    CommandFailed {
        tool: String,
        code: i32,
        output: String,
    },
    #[error("No job id found in the {tool} output:\n{output}")]
    UnparsableJobId { tool: String, output: String },
}

impl ExecutorError {
    /// Exit code to hand back to the caller, a failed tool passes its own code through
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::CommandFailed { code, .. } if *code != 0 => *code,
            _ => 1,
        }
    }
}

/// Everything needed to submit one array job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub work_dir: PathBuf,
    pub name: String,
    /// rendered `--array` argument
    pub array: String,
    /// environment handed to the array tasks on top of the submitting environment
    pub exports: Vec<(String, String)>,
    /// per batch arguments, usually ending with the job script
    pub extra_args: Vec<String>,
}

#[derive(Debug)]
pub enum Executors {
    Slurm(slurm::SlurmExecutor),
}

impl Executors {
    pub fn load(config: &ExecutorConfig) -> Result<Self, ConfigErrors> {
        match config.name.as_str() {
            "slurm" => Ok(Self::Slurm(slurm::SlurmExecutor::load(config))),
            _ => Err(ConfigErrors::UnsupportedExecutor(config.name.clone())),
        }
    }

    /// Accounting records of all given jobs, an unanswered query is an empty result
    pub fn query(
        &self,
        job_ids: &[u64],
        since: Option<&str>,
    ) -> Result<Vec<AccountingRecord>, ExecutorError> {
        match self {
            Self::Slurm(executor) => executor.query(job_ids, since),
        }
    }

    /// Submit an array job and return its id
    pub fn submit(&self, request: &SubmitRequest) -> Result<u64, ExecutorError> {
        match self {
            Self::Slurm(executor) => executor.submit(request),
        }
    }
}
