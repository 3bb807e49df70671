pub mod job_id;

pub use job_id::{ArrayIndex, IndexPart, JobId};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;
use tracing::{debug, warn};

/// Format used by `sacct` for Submit/Start/End with the default `SLURM_TIME_FORMAT`
pub const SACCT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Number of fields in one accounting line, see `executors::slurm::SACCT_FORMAT`
pub const FIELD_COUNT: usize = 7;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("expected 7 fields but found {0}")]
    FieldCount(usize),
    #[error("job id '{0}' has no numeric base")]
    JobId(String),
    #[error("timestamp '{0}' is not in the sacct format")]
    Timestamp(String),
}

/// Closed set of states a job is bucketed into
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Completed,
    Failed,
    TimedOut,
    Running,
    Pending,
    Other,
}

impl JobState {
    pub const ALL: [JobState; 6] = [
        JobState::Completed,
        JobState::Failed,
        JobState::TimedOut,
        JobState::Running,
        JobState::Pending,
        JobState::Other,
    ];

    /// Map a raw sacct state onto a bucket.
    ///
    /// sacct decorates some states (`CANCELLED by 1000`, `CANCELLED+`), so only the leading
    /// word is looked at. Everything not listed here ends up in `Other`.
    pub fn from_sacct(raw: &str) -> Self {
        let word = raw
            .split_whitespace()
            .next()
            .unwrap_or("")
            .trim_end_matches('+');

        match word {
            "COMPLETED" => Self::Completed,
            "FAILED" | "NODE_FAIL" | "OUT_OF_MEMORY" | "BOOT_FAIL" | "DEADLINE" => Self::Failed,
            "TIMEOUT" => Self::TimedOut,
            "RUNNING" | "COMPLETING" | "CONFIGURING" => Self::Running,
            "PENDING" => Self::Pending,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Running => "running",
            Self::Pending => "pending",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lowered = value.to_lowercase();

        Self::ALL
            .into_iter()
            .find(|state| {
                state.as_str() == lowered || (lowered == "timeout" && *state == Self::TimedOut)
            })
            .ok_or_else(|| {
                format!(
                    "unknown state '{value}', expected one of: {}",
                    Self::ALL.map(|state| state.as_str()).join(", ")
                )
            })
    }
}

/// One line of `sacct` output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountingRecord {
    pub job_id: JobId,
    pub state: JobState,
    pub partition: String,
    pub submit_time: Option<NaiveDateTime>,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    pub raw_id: String,
}

fn parse_timestamp(value: &str) -> Result<Option<NaiveDateTime>, ParseError> {
    let value = value.trim();

    match value {
        "" | "Unknown" | "None" | "N/A" => Ok(None),
        value => NaiveDateTime::parse_from_str(value, SACCT_TIME_FORMAT)
            .map(Some)
            .map_err(|_| ParseError::Timestamp(value.to_owned())),
    }
}

impl AccountingRecord {
    /// Parse a single pipe delimited line.
    ///
    /// Returns `Ok(None)` for job steps (`1234_5.batch`, `1234.extern`) which never count as
    /// jobs of their own.
    pub fn parse_line(line: &str) -> Result<Option<Self>, ParseError> {
        let fields = line.split('|').collect::<Vec<_>>();

        if fields.len() < FIELD_COUNT {
            return Err(ParseError::FieldCount(fields.len()));
        }

        let id = fields[0].trim();
        if id.contains('.') {
            return Ok(None);
        }

        Ok(Some(Self {
            job_id: id.parse()?,
            state: JobState::from_sacct(fields[1].trim()),
            partition: fields[2].trim().to_owned(),
            submit_time: parse_timestamp(fields[3])?,
            start_time: parse_timestamp(fields[4])?,
            end_time: parse_timestamp(fields[5])?,
            raw_id: fields[6].trim().to_owned(),
        }))
    }
}

/// Parse raw accounting output, skipping (and logging) malformed lines
pub fn parse_lines<'a, I>(lines: I) -> Vec<AccountingRecord>
where
    I: IntoIterator<Item = &'a str>,
{
    lines
        .into_iter()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match AccountingRecord::parse_line(line) {
            Ok(Some(record)) => Some(record),
            Ok(None) => {
                debug!(line = line, "Skipped job step");
                None
            }
            Err(error) => {
                warn!(line = line, "Skipped malformed accounting line: {error}");
                None
            }
        })
        .collect()
}
