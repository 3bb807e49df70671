mod accounting;
mod classify;
mod config;
mod coordinator;
mod executors;
mod occupancy;
mod report;
mod store;
mod sync;
mod window;

#[cfg(test)]
mod main_test;

use crate::{
    accounting::{AccountingRecord, JobState},
    classify::classify,
    config::{ConfigErrors, RunnerConfig},
    coordinator::{record_submission, run_cycle, CycleError, CycleOutcome},
    executors::{ExecutorError, Executors, SubmitRequest},
    occupancy::Occupancy,
    report::summarize,
    store::{BatchStore, Key, StoreError},
    sync::{BatchLock, LockError},
    window::{next_window, ReservationCursor, WindowError, WindowOutcome},
};
use clap::{error::ErrorKind, Parser, Subcommand};
use std::{
    io,
    path::{Path, PathBuf},
    process,
};
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jobwin")]
#[command(about = "Submit large SLURM job arrays in windows that fit a reservation", version)]
struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Runner settings (yaml), defaults are used when omitted
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Batch file holding the cursor and the job id ledger
    #[arg(short, long, global = true, default_value = "batch.conf")]
    batch: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize the jobs submitted so far
    Status {
        /// Output in JSON format
        #[arg(long)]
        json: bool,

        /// Example jobs shown per state (default: report.samples)
        #[arg(long)]
        samples: Option<usize>,

        /// Only print the job ids in one state
        #[arg(long, value_name = "STATE")]
        list: Option<JobState>,
    },

    /// Submit the next window of the batch
    Submit {
        /// Print what would be submitted without calling sbatch
        #[arg(long)]
        dry_run: bool,

        /// Arguments passed on to sbatch, usually ending with the job script (after --)
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Start the batch over, keeping MAX_ID and RESERVE
    Reset,

    /// Print a batch setting
    Get { key: Key },

    /// Change a batch setting
    Set {
        key: Key,
        #[arg(allow_negative_numbers = true)]
        value: String,
    },
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigErrors),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Window(#[from] WindowError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error(transparent)]
    Cycle(#[from] CycleError),
    #[error("Failed to serialize the report: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Validation(String),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            Self::Executor(error) => error.exit_code(),
            Self::Cycle(error) => error.exit_code(),
            _ => 1,
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            let code = match error.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            if let Err(print_error) = error.print() {
                eprintln!("{print_error}");
            }
            process::exit(code);
        }
    };

    init_tracing(cli.verbose);

    if let Err(error) = run(cli) {
        error!("{error}");
        process::exit(error.exit_code());
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = RunnerConfig::load(cli.settings.as_deref())?;

    match cli.command {
        Commands::Status {
            json,
            samples,
            list,
        } => {
            let executor = Executors::load(&config.executor)?;
            let store = BatchStore::open(&cli.batch)?;

            run_status(
                &executor,
                &store,
                json,
                samples.unwrap_or(config.report.samples),
                list,
            )
        }
        Commands::Submit { dry_run, args } => {
            let executor = Executors::load(&config.executor)?;
            let _lock = BatchLock::acquire(&cli.batch)?;
            let mut store = BatchStore::open(&cli.batch)?;

            run_submit(&executor, &mut store, dry_run, args)
        }
        Commands::Reset => {
            let _lock = BatchLock::acquire(&cli.batch)?;
            let mut store = BatchStore::open(&cli.batch)?;

            store.set(Key::NextRunId, 0);
            store.set(Key::LastRunId, -1);
            store.set(Key::JobIds, "");
            store.save()?;
            info!(batch = ?cli.batch, "Batch reset");

            Ok(())
        }
        Commands::Get { key } => {
            let store = BatchStore::open(&cli.batch)?;

            match store.get(key) {
                Some(value) => {
                    println!("{value}");
                    Ok(())
                }
                None => Err(CliError::Validation(format!(
                    "{key} is not set in {}",
                    cli.batch.display()
                ))),
            }
        }
        Commands::Set { key, value } => {
            let numeric = matches!(
                key,
                Key::NextRunId | Key::LastRunId | Key::MaxId | Key::Reserve | Key::MaxArraySize
            );
            if numeric && value.parse::<i64>().is_err() {
                return Err(StoreError::InvalidValue { key, value }.into());
            }

            let _lock = BatchLock::acquire(&cli.batch)?;
            let mut store = BatchStore::open(&cli.batch)?;
            store.set(key, value);
            store.save()?;

            Ok(())
        }
    }
}

/// Accounting records of every job in the ledger
fn query(executor: &Executors, store: &BatchStore) -> Result<Vec<AccountingRecord>, CliError> {
    let job_ids = store.job_ids()?;

    Ok(executor.query(&job_ids, store.get(Key::JobDate))?)
}

fn run_status(
    executor: &Executors,
    store: &BatchStore,
    json: bool,
    samples: usize,
    list: Option<JobState>,
) -> Result<(), CliError> {
    let buckets = classify(query(executor, store)?);

    if let Some(state) = list {
        for record in buckets.get(state) {
            println!("{}", record.job_id);
        }
        return Ok(());
    }

    let report = summarize(&buckets, samples);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }

    Ok(())
}

fn job_name(store: &BatchStore) -> String {
    match store.get(Key::BatchName) {
        Some(name) => name.to_owned(),
        None => store
            .path()
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "jobwin".to_owned()),
    }
}

// job scripts resolve relative paths against the batch file
fn work_dir(store: &BatchStore) -> PathBuf {
    store
        .path()
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf()
}

fn run_submit(
    executor: &Executors,
    store: &mut BatchStore,
    dry_run: bool,
    args: Vec<String>,
) -> Result<(), CliError> {
    let name = job_name(store);
    let work_dir = work_dir(store);

    if store.get(Key::Reserve).is_none() {
        let array = match store.get(Key::Array) {
            Some(array) => array.to_owned(),
            None => {
                return Err(CliError::Validation(format!(
                    "Neither RESERVE nor ARRAY is set in {}",
                    store.path().display()
                )))
            }
        };

        return submit_fixed(executor, store, dry_run, name, work_dir, array, args);
    }

    let buckets = classify(query(executor, store)?);
    let occupancy = Occupancy::from(&buckets);
    for warning in &occupancy.warnings {
        warn!("{warning}");
    }
    info!(occupancy = occupancy.units, "Counted queued and running jobs");

    if dry_run {
        let cursor = ReservationCursor::load(store)?;
        match next_window(&cursor, occupancy.units)? {
            WindowOutcome::Submit(submission) => println!(
                "would submit indices {} as array {} ({} tasks)",
                submission.window,
                submission.array,
                submission.array.task_count()
            ),
            WindowOutcome::Skip(reason) => println!("{reason}"),
            WindowOutcome::Complete => println!("complete"),
        }
        return Ok(());
    }

    let outcome = run_cycle(store, occupancy.units, |submission| {
        executor.submit(&SubmitRequest {
            work_dir,
            name,
            array: submission.array.to_string(),
            exports: vec![
                (
                    "JOBWIN_NEXT_RUN_ID".to_owned(),
                    submission.window.first.to_string(),
                ),
                (
                    "JOBWIN_LAST_RUN_ID".to_owned(),
                    submission.window.last.to_string(),
                ),
            ],
            extra_args: args,
        })
    })?;

    match outcome {
        CycleOutcome::Submitted { job_id, submission } => println!(
            "submitted job {job_id} for indices {} (array {})",
            submission.window, submission.array
        ),
        CycleOutcome::Skipped(reason) => println!("{reason}"),
        CycleOutcome::Complete => println!("complete"),
    }

    Ok(())
}

// ARRAY without RESERVE: the range is submitted as given and the cursor is not used
fn submit_fixed(
    executor: &Executors,
    store: &mut BatchStore,
    dry_run: bool,
    name: String,
    work_dir: PathBuf,
    array: String,
    args: Vec<String>,
) -> Result<(), CliError> {
    if dry_run {
        println!("would submit array {array}");
        return Ok(());
    }

    let job_id = executor.submit(&SubmitRequest {
        work_dir,
        name,
        array: array.clone(),
        exports: Vec::new(),
        extra_args: args,
    })?;
    record_submission(store, job_id)?;

    println!("submitted job {job_id} for array {array}");
    Ok(())
}
