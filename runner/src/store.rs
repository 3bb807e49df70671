//! Durable `KEY=VALUE` batch file.
//!
//! The file is shared with the job scripts of a batch, so lines the runner does not own
//! (comments, foreign keys) are written back untouched.

use std::{
    fmt,
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to read batch file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("Failed to write batch file {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("{key} has invalid value '{value}'")]
    InvalidValue { key: Key, value: String },
    #[error("Unknown key '{0}'")]
    UnknownKey(String),
}

/// Keys the runner reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    JobIds,
    JobDate,
    BatchName,
    NextRunId,
    LastRunId,
    MaxId,
    Reserve,
    Array,
    MaxArraySize,
}

impl Key {
    pub const ALL: [Key; 9] = [
        Key::JobIds,
        Key::JobDate,
        Key::BatchName,
        Key::NextRunId,
        Key::LastRunId,
        Key::MaxId,
        Key::Reserve,
        Key::Array,
        Key::MaxArraySize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JobIds => "JOB_IDS",
            Self::JobDate => "JOB_DATE",
            Self::BatchName => "BATCH_NAME",
            Self::NextRunId => "NEXT_RUN_ID",
            Self::LastRunId => "LAST_RUN_ID",
            Self::MaxId => "MAX_ID",
            Self::Reserve => "RESERVE",
            Self::Array => "ARRAY",
            Self::MaxArraySize => "MAX_ARRAY_SIZE",
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Key {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| StoreError::UnknownKey(value.to_owned()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Entry { key: String, value: String },
    Verbatim(String),
}

impl Line {
    fn parse(line: &str) -> Self {
        let trimmed = line.trim_start();

        match trimmed.split_once('=') {
            Some((key, value)) if !trimmed.starts_with('#') && !key.trim().is_empty() => {
                Self::Entry {
                    key: key.trim().to_owned(),
                    value: value.trim().to_owned(),
                }
            }
            _ => Self::Verbatim(line.to_owned()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchStore {
    path: PathBuf,
    lines: Vec<Line>,
}

impl BatchStore {
    /// Load a batch file, a missing file is an empty store that is created on `save`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let lines = match fs::read_to_string(&path) {
            Ok(content) => content.lines().map(Line::parse).collect(),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                debug!(path = ?path, "Batch file not found, starting empty");
                Vec::new()
            }
            Err(source) => return Err(StoreError::Read { path, source }),
        };

        Ok(Self { path, lines })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn find(&self, key: Key) -> Option<usize> {
        self.lines.iter().position(|line| {
            matches!(line, Line::Entry { key: name, .. } if name.eq_ignore_ascii_case(key.as_str()))
        })
    }

    /// Raw value, empty values are treated as unset
    pub fn get(&self, key: Key) -> Option<&str> {
        self.find(key)
            .and_then(|index| match &self.lines[index] {
                Line::Entry { value, .. } => Some(value.as_str()),
                Line::Verbatim(_) => None,
            })
            .filter(|value| !value.is_empty())
    }

    pub fn get_parsed<T: FromStr>(&self, key: Key) -> Result<Option<T>, StoreError> {
        self.get(key)
            .map(|value| {
                value.parse().map_err(|_| StoreError::InvalidValue {
                    key,
                    value: value.to_owned(),
                })
            })
            .transpose()
    }

    /// Update the first occurrence of `key` or append it
    pub fn set<V: ToString>(&mut self, key: Key, value: V) {
        let value = value.to_string();

        match self.find(key) {
            Some(index) => {
                self.lines[index] = Line::Entry {
                    key: key.as_str().to_owned(),
                    value,
                }
            }
            None => self.lines.push(Line::Entry {
                key: key.as_str().to_owned(),
                value,
            }),
        }
    }

    /// Job ids submitted so far, in submission order
    pub fn job_ids(&self) -> Result<Vec<u64>, StoreError> {
        self.get(Key::JobIds)
            .into_iter()
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| {
                id.parse().map_err(|_| StoreError::InvalidValue {
                    key: Key::JobIds,
                    value: id.to_owned(),
                })
            })
            .collect()
    }

    /// Append a job id to the ledger
    pub fn push_job_id(&mut self, job_id: u64) {
        let ids = match self.get(Key::JobIds) {
            Some(ids) => format!("{ids},{job_id}"),
            None => job_id.to_string(),
        };

        self.set(Key::JobIds, ids);
    }

    fn render(&self) -> String {
        self.lines
            .iter()
            .map(|line| match line {
                Line::Entry { key, value } => format!("{key}={value}\n"),
                Line::Verbatim(text) => format!("{text}\n"),
            })
            .collect()
    }

    /// Commit to disk: write a sibling temp file, fsync, then rename over the original
    pub fn save(&self) -> Result<(), StoreError> {
        let write_error = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        let mut temp_name = self.path.file_name().unwrap_or_default().to_os_string();
        temp_name.push(".tmp");
        let temp_path = self.path.with_file_name(temp_name);

        let mut file = File::create(&temp_path).map_err(write_error)?;
        file.write_all(self.render().as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(write_error)?;
        drop(file);

        fs::rename(&temp_path, &self.path).map_err(write_error)?;
        sync_parent(&self.path).map_err(write_error)?;
        debug!(path = ?self.path, "Saved batch file");

        Ok(())
    }
}

// the rename is only durable once the directory entry is on disk
fn sync_parent(path: &Path) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    File::open(parent)?.sync_all()
}
