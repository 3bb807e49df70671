use super::{command, ExecutorError, SubmitRequest};
use crate::{
    accounting::{parse_lines, AccountingRecord},
    config::ExecutorConfig,
};
use itertools::Itertools;
use std::{path::PathBuf, process::Command, time::Duration};
use tracing::{debug, info, instrument, warn};

/// sacct columns in the order `AccountingRecord::parse_line` expects them
pub const SACCT_FORMAT: &str = "JobID,State,Partition,Submit,Start,End,JobIDRaw";

/// Talks to SLURM through its command line tools
#[derive(Debug, Clone)]
pub struct SlurmExecutor {
    sacct: PathBuf,
    sbatch: PathBuf,
    timeout: Duration,
    sbatch_args: Vec<String>,
}

impl SlurmExecutor {
    pub fn load(config: &ExecutorConfig) -> Self {
        Self {
            sacct: config.sacct.clone(),
            sbatch: config.sbatch.clone(),
            timeout: Duration::from_millis(config.timeout),
            sbatch_args: config.sbatch_args.clone(),
        }
    }

    fn sacct_command(&self, job_ids: &[u64], since: Option<&str>) -> Command {
        let mut command = Command::new(&self.sacct);

        // one line per allocation (no steps), no header, `|` separated without trailing `|`
        command
            .args(["-X", "-n", "-P"])
            .arg(format!("--format={SACCT_FORMAT}"))
            .arg(format!("--jobs={}", job_ids.iter().join(",")));
        if let Some(since) = since {
            command.arg(format!("--starttime={since}"));
        }

        command
    }

    #[instrument(skip(self), level = "info")]
    pub fn query(
        &self,
        job_ids: &[u64],
        since: Option<&str>,
    ) -> Result<Vec<AccountingRecord>, ExecutorError> {
        if job_ids.is_empty() {
            info!("No jobs submitted yet");
            return Ok(Vec::new());
        }

        let output = command::run("sacct", self.sacct_command(job_ids, since), self.timeout)?;
        let records = parse_lines(output.stdout.lines());

        if !output.status.success() {
            if records.is_empty() {
                warn!(
                    status = %output.status,
                    output = %output.combined(),
                    "sacct failed without results, treating as no jobs found"
                );
            } else {
                warn!(
                    status = %output.status,
                    "sacct failed but returned {} records, using them",
                    records.len()
                );
            }
        }

        if records.is_empty() {
            info!("No jobs found");
        } else {
            debug!("Retrieved {} accounting records", records.len());
        }

        Ok(records)
    }

    fn sbatch_command(&self, request: &SubmitRequest) -> Command {
        let mut command = Command::new(&self.sbatch);

        command
            .arg("--parsable")
            .arg(format!("--job-name={}", request.name))
            .arg(format!("--array={}", request.array))
            .arg("--chdir")
            .arg(&request.work_dir);
        if !request.exports.is_empty() {
            command.arg(format!(
                "--export=ALL,{}",
                request
                    .exports
                    .iter()
                    .map(|(key, value)| format!("{key}={value}"))
                    .join(",")
            ));
        }
        command.args(&self.sbatch_args).args(&request.extra_args);

        command
    }

    #[instrument(skip(self), level = "info")]
    pub fn submit(&self, request: &SubmitRequest) -> Result<u64, ExecutorError> {
        let output = command::run("sbatch", self.sbatch_command(request), self.timeout)?;

        if !output.status.success() {
            return Err(ExecutorError::CommandFailed {
                tool: "sbatch".to_owned(),
                // killed by a signal
                code: output.status.code().unwrap_or(1),
                output: output.combined(),
            });
        }

        match parse_job_id(&output.stdout) {
            Some(job_id) => {
                info!(job_id = job_id, array = %request.array, "Submitted array job");
                Ok(job_id)
            }
            None => Err(ExecutorError::UnparsableJobId {
                tool: "sbatch".to_owned(),
                output: output.combined(),
            }),
        }
    }
}

/// Find the job id in sbatch output.
///
/// Understands `--parsable` output (`4242` or `4242;cluster`) and the default
/// `Submitted batch job 4242` message.
pub fn parse_job_id(output: &str) -> Option<u64> {
    const MARKER: &str = "Submitted batch job ";

    output.lines().map(str::trim).find_map(|line| {
        let id = match line.find(MARKER) {
            Some(index) => &line[index + MARKER.len()..],
            None => line.split(';').next().unwrap_or(line),
        };

        id.trim().parse().ok()
    })
}
