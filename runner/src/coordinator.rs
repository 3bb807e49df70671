//! One submission cycle against a batch file.
//!
//! The cursor is only written after sbatch accepted the window. If the submission fails the
//! batch file is left exactly as it was, so rerunning the cycle later picks the same window.


use crate::{
    executors::ExecutorError,
    store::{BatchStore, Key, StoreError},
    window::{next_window, ReservationCursor, Submission, WindowError, WindowOutcome},
};
use chrono::Local;
use thiserror::Error;
use tracing::{error, info};

/// `sacct --starttime` compatible date stamped on the first submission
pub const JOB_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Error, Debug)]
pub enum CycleError {
    #[error(transparent)]
    Window(#[from] WindowError),
    #[error("Submission failed, the batch file was not changed: {0}")]
    Submit(#[from] ExecutorError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CycleError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Submit(error) => error.exit_code(),
            Self::Window(_) | Self::Store(_) => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Submitted {
        job_id: u64,
        submission: Submission,
    },
    Skipped(String),
    Complete,
}

/// Record an accepted submission in the batch file and commit it
pub fn record_submission(store: &mut BatchStore, job_id: u64) -> Result<(), StoreError> {
    store.push_job_id(job_id);
    if store.get(Key::JobDate).is_none() {
        store.set(Key::JobDate, Local::now().format(JOB_DATE_FORMAT));
    }

    store.save()
}

/// Pick the next window for `occupancy` and hand it to `submit`.
///
/// `submit` is called at most once and never retried, sbatch is not idempotent.
pub fn run_cycle<F>(
    store: &mut BatchStore,
    occupancy: u64,
    submit: F,
) -> Result<CycleOutcome, CycleError>
where
    F: FnOnce(&Submission) -> Result<u64, ExecutorError>,
{
    let cursor = ReservationCursor::load(store)?;

    let submission = match next_window(&cursor, occupancy)? {
        WindowOutcome::Submit(submission) => submission,
        WindowOutcome::Skip(reason) => {
            info!("Nothing to submit, {reason}");
            return Ok(CycleOutcome::Skipped(reason));
        }
        WindowOutcome::Complete => {
            info!(max_id = cursor.max_id, "Batch complete");
            return Ok(CycleOutcome::Complete);
        }
    };

    info!(
        window = %submission.window,
        array = %submission.array,
        occupancy,
        "Submitting window"
    );

    let job_id = submit(&submission).map_err(|error| {
        error!(
            window = %submission.window,
            "Submission failed, cursor stays at {:?}", cursor.last_run_id
        );
        error
    })?;

    submission.cursor.store(store);
    if let Err(error) = record_submission(store, job_id) {
        // sbatch already accepted the job, the next run would resubmit this window
        error!(
            job_id,
            window = %submission.window,
            "Job was submitted but the batch file could not be updated, set NEXT_RUN_ID={} LAST_RUN_ID={} and append {job_id} to JOB_IDS by hand",
            submission.window.first,
            submission.window.last
        );
        return Err(error.into());
    }

    Ok(CycleOutcome::Submitted { job_id, submission })
}
