use crate::{
    accounting::{AccountingRecord, JobState},
    classify::Buckets,
};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::{collections::BTreeMap, fmt};

/// Mean durations over one bucket in whole seconds, `None` when no record qualifies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Averages {
    /// end - start
    pub turnaround: Option<i64>,
    /// end - submit
    pub wall_time: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub total: usize,
    pub counts: BTreeMap<JobState, usize>,
    pub samples: BTreeMap<JobState, Vec<AccountingRecord>>,
    pub averages: BTreeMap<JobState, Averages>,
}

fn average<F>(records: &[AccountingRecord], since: F) -> Option<i64>
where
    F: Fn(&AccountingRecord) -> Option<NaiveDateTime>,
{
    let seconds = records
        .iter()
        .filter_map(|record| Some((record.end_time? - since(record)?).num_seconds()))
        .collect::<Vec<_>>();

    if seconds.is_empty() {
        None
    } else {
        Some(seconds.iter().sum::<i64>() / seconds.len() as i64)
    }
}

/// Count, sample and time every bucket
pub fn summarize(buckets: &Buckets, sample_size: usize) -> Report {
    let mut report = Report {
        total: buckets.len(),
        counts: BTreeMap::new(),
        samples: BTreeMap::new(),
        averages: BTreeMap::new(),
    };

    for (state, records) in buckets.iter() {
        report.counts.insert(state, records.len());
        report
            .samples
            .insert(state, records.iter().take(sample_size).cloned().collect());
        report.averages.insert(
            state,
            Averages {
                turnaround: average(records, |record| record.start_time),
                wall_time: average(records, |record| record.submit_time),
            },
        );
    }

    report
}

fn format_seconds(seconds: Option<i64>) -> String {
    match seconds {
        Some(seconds) => {
            let sign = if seconds < 0 { "-" } else { "" };
            let seconds = seconds.abs();

            format!(
                "{sign}{}:{:02}:{:02}",
                seconds / 3600,
                seconds % 3600 / 60,
                seconds % 60
            )
        }
        None => "undefined".to_owned(),
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} jobs", self.total)?;

        for (state, count) in &self.counts {
            let averages = self.averages.get(state).copied().unwrap_or_default();

            writeln!(
                f,
                "{:<10} {:>6}   turnaround {:>9}   wall {:>9}",
                state.as_str(),
                count,
                format_seconds(averages.turnaround),
                format_seconds(averages.wall_time)
            )?;

            for record in self.samples.get(state).into_iter().flatten() {
                writeln!(f, "    {} ({})", record.job_id, record.partition)?;
            }
        }

        Ok(())
    }
}
