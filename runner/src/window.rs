//! Reservation windows over a bounded batch of logical indices.
//!
//! Every invocation looks at how many units are queued or running, and if there is room in the
//! reservation it picks the next contiguous block of logical indices after the persisted cursor.
//! The block is submitted as a SLURM array whose literal indices live in the scheduler's space:
//! zero based by default, or folded modulo `MAX_ARRAY_SIZE` when the cluster caps array indices.
//!
//! Nothing here locks the batch file. Two concurrent runs reading the same cursor would both
//! submit the same window, callers have to serialize runs per batch (see `sync::locking`).


use crate::store::{BatchStore, Key, StoreError};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum WindowError {
    #[error("MAX_ID must be set to submit with a reservation")]
    MissingMaxId,
    #[error("RESERVE must be set to submit with a reservation")]
    MissingReserve,
    #[error("RESERVE must be a positive number of jobs, found {0}")]
    InvalidReserve(i64),
    #[error("Failed to read the reservation cursor: {0}")]
    Store(#[from] StoreError),
}

/// Persisted progress through a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReservationCursor {
    pub next_run_id: u64,
    /// `None` until the first window was submitted
    pub last_run_id: Option<u64>,
    pub max_id: u64,
    pub reserve_capacity: u64,
    /// cluster limit on array indices, `None` when indices are not folded
    pub max_array_size: Option<u64>,
}

impl ReservationCursor {
    /// Read the cursor and the reservation settings from a batch file
    pub fn load(store: &BatchStore) -> Result<Self, WindowError> {
        let reserve = store
            .get_parsed::<i64>(Key::Reserve)?
            .ok_or(WindowError::MissingReserve)?;
        let reserve_capacity = u64::try_from(reserve)
            .ok()
            .filter(|capacity| *capacity > 0)
            .ok_or(WindowError::InvalidReserve(reserve))?;

        let next_run_id = store.get_parsed(Key::NextRunId)?.unwrap_or(0);
        // a submitted window always ends past its start, so a negative LAST_RUN_ID or one equal
        // to NEXT_RUN_ID (both zeroed by hand) marks a fresh or reset batch
        let last_run_id = store
            .get_parsed::<i64>(Key::LastRunId)?
            .and_then(|last| u64::try_from(last).ok())
            .filter(|last| *last != next_run_id);

        Ok(Self {
            next_run_id,
            last_run_id,
            max_id: store
                .get_parsed(Key::MaxId)?
                .ok_or(WindowError::MissingMaxId)?,
            reserve_capacity,
            max_array_size: store
                .get_parsed::<u64>(Key::MaxArraySize)?
                .filter(|size| *size > 0),
        })
    }

    /// Write the cursor position back, the reservation settings are left alone
    pub fn store(&self, store: &mut BatchStore) {
        store.set(Key::NextRunId, self.next_run_id);
        match self.last_run_id {
            Some(last) => store.set(Key::LastRunId, last),
            None => store.set(Key::LastRunId, -1),
        }
    }
}

/// Inclusive range of logical indices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexRange {
    pub first: u64,
    pub last: u64,
}

impl fmt::Display for IndexRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.first, self.last)
    }
}

/// Inclusive range of literal array indices as handed to `sbatch --array`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArrayRange {
    pub start: u64,
    pub end: u64,
    /// array size the indices were folded into, a folded range may wrap (`start > end`)
    pub size: Option<u64>,
}

impl ArrayRange {
    pub fn zero_based(end: u64) -> Self {
        Self {
            start: 0,
            end,
            size: None,
        }
    }

    pub fn folded(first: u64, last: u64, size: u64) -> Self {
        Self {
            start: first % size,
            end: last % size,
            size: Some(size),
        }
    }

    pub fn wraps(&self) -> bool {
        self.start > self.end
    }

    /// number of array tasks the range expands to
    pub fn task_count(&self) -> u64 {
        match self.size {
            Some(size) if self.wraps() => (size - self.start) + (self.end + 1),
            _ => self.end - self.start + 1,
        }
    }
}

fn write_span(f: &mut fmt::Formatter<'_>, start: u64, end: u64) -> fmt::Result {
    if start == end {
        write!(f, "{start}")
    } else {
        write!(f, "{start}-{end}")
    }
}

impl fmt::Display for ArrayRange {
    /// `3-4,0-1` for a range that wrapped past the array size, `3-7` or `3` otherwise
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.size {
            Some(size) if self.wraps() => {
                write_span(f, self.start, size - 1)?;
                f.write_str(",")?;
                write_span(f, 0, self.end)
            }
            _ => write_span(f, self.start, self.end),
        }
    }
}

/// A window that should be submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Submission {
    /// logical indices covered, used for bookkeeping
    pub window: IndexRange,
    /// literal `--array` argument
    pub array: ArrayRange,
    /// cursor to persist once the submission was accepted
    pub cursor: ReservationCursor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowOutcome {
    Submit(Submission),
    Skip(String),
    Complete,
}

/// Decide what to submit next given the current occupancy
pub fn next_window(
    cursor: &ReservationCursor,
    occupancy: u64,
) -> Result<WindowOutcome, WindowError> {
    let capacity = cursor.reserve_capacity;
    if capacity == 0 {
        return Err(WindowError::InvalidReserve(0));
    }

    let next_run_id = cursor.last_run_id.map_or(0, |last| last + 1);
    if next_run_id >= cursor.max_id {
        debug!(next_run_id, max_id = cursor.max_id, "Batch exhausted");
        return Ok(WindowOutcome::Complete);
    }

    if occupancy >= capacity {
        return Ok(WindowOutcome::Skip(format!(
            "queue full: {occupancy} of {capacity}"
        )));
    }

    let num_to_run = capacity - occupancy;
    let last_run_id = (next_run_id + num_to_run).min(cursor.max_id);

    let array = match cursor.max_array_size {
        Some(size) => {
            if last_run_id - next_run_id + 1 > size {
                warn!(
                    window = %IndexRange { first: next_run_id, last: last_run_id },
                    size,
                    "Window is larger than MAX_ARRAY_SIZE, folded indices overlap and fewer tasks are submitted"
                );
            }

            ArrayRange::folded(next_run_id, last_run_id, size)
        }
        None => ArrayRange::zero_based(num_to_run),
    };

    Ok(WindowOutcome::Submit(Submission {
        window: IndexRange {
            first: next_run_id,
            last: last_run_id,
        },
        array,
        cursor: ReservationCursor {
            next_run_id,
            last_run_id: Some(last_run_id),
            ..*cursor
        },
    }))
}
