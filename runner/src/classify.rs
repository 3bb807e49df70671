use crate::accounting::{AccountingRecord, JobState};
use std::collections::BTreeMap;

/// One bucket per `JobState`, records kept in accounting order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buckets(BTreeMap<JobState, Vec<AccountingRecord>>);

impl Buckets {
    pub fn get(&self, state: JobState) -> &[AccountingRecord] {
        self.0.get(&state).map(Vec::as_slice).unwrap_or_default()
    }

    /// total number of records over all buckets
    pub fn len(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (JobState, &[AccountingRecord])> {
        self.0
            .iter()
            .map(|(state, records)| (*state, records.as_slice()))
    }
}

/// Partition records by state
pub fn classify<I>(records: I) -> Buckets
where
    I: IntoIterator<Item = AccountingRecord>,
{
    let mut buckets = JobState::ALL
        .into_iter()
        .map(|state| (state, Vec::new()))
        .collect::<BTreeMap<_, _>>();

    for record in records {
        buckets.entry(record.state).or_default().push(record);
    }

    Buckets(buckets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounting::parse_lines;

    const FIXTURE: &str = "\
10_0|COMPLETED|batch|2026-10-18T09:00:00|2026-10-18T09:01:00|2026-10-18T09:03:00|11
10_1|FAILED|batch|2026-10-18T09:00:00|2026-10-18T09:01:00|2026-10-18T09:02:00|12
10_2|COMPLETED|batch|2026-10-18T09:00:00|2026-10-18T09:02:00|2026-10-18T09:04:00|13
10_3|TIMEOUT|batch|2026-10-18T09:00:00|2026-10-18T09:01:00|2026-10-18T10:01:00|14
10_4|RUNNING|batch|2026-10-18T09:00:00|2026-10-18T09:01:00|Unknown|15
10_[5-9]|PENDING|batch|2026-10-18T09:00:00|Unknown|Unknown|10
10_10|CANCELLED by 0|batch|2026-10-18T09:00:00|None|2026-10-18T09:00:30|16
10_11|SUSPENDED|batch|2026-10-18T09:00:00|2026-10-18T09:01:00|Unknown|17
";

    #[test]
    fn buckets_partition_the_input() {
        let records = parse_lines(FIXTURE.lines());
        let total = records.len();
        let buckets = classify(records.clone());

        assert_eq!(buckets.len(), total);
        assert_eq!(buckets.iter().count(), JobState::ALL.len());

        for record in &records {
            let containing = buckets
                .iter()
                .filter(|(_, bucket)| bucket.contains(record))
                .count();

            assert_eq!(containing, 1, "{} must be in exactly one bucket", record.job_id);
        }
    }

    #[test]
    fn input_order_is_kept_inside_a_bucket() {
        let buckets = classify(parse_lines(FIXTURE.lines()));

        let completed = buckets
            .get(JobState::Completed)
            .iter()
            .map(|record| record.job_id.to_string())
            .collect::<Vec<_>>();

        assert_eq!(completed, ["10_0", "10_2"]);
        assert_eq!(buckets.get(JobState::Other).len(), 2);
        assert_eq!(buckets.get(JobState::TimedOut).len(), 1);
    }

    #[test]
    fn empty_input_still_has_every_bucket() {
        let buckets = classify(Vec::new());

        assert_eq!(buckets.len(), 0);
        for state in JobState::ALL {
            assert!(buckets.get(state).is_empty());
        }
    }
}
