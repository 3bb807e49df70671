use crate::{
    accounting::{AccountingRecord, ArrayIndex, JobState},
    classify::Buckets,
};

/// Units currently queued or running against the reservation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Occupancy {
    pub units: u64,
    /// one entry per pending record whose index token could not be read
    pub warnings: Vec<String>,
}

/// Count running records plus the expanded size of all pending records.
///
/// A malformed pending token contributes nothing and is reported in `warnings`.
pub fn occupancy(pending: &[AccountingRecord], running: &[AccountingRecord]) -> Occupancy {
    let mut result = Occupancy {
        units: running.len() as u64,
        warnings: Vec::new(),
    };

    for record in pending {
        match &record.job_id.index {
            ArrayIndex::None | ArrayIndex::Single(_) => result.units += 1,
            ArrayIndex::Compressed(parts) => {
                result.units += parts.iter().map(|part| part.units()).sum::<u64>();
            }
            ArrayIndex::Malformed(token) => result.warnings.push(format!(
                "pending job {} has an unreadable array index '{token}', counted as 0",
                record.job_id.base
            )),
        }
    }

    result
}

impl From<&Buckets> for Occupancy {
    fn from(buckets: &Buckets) -> Self {
        occupancy(buckets.get(JobState::Pending), buckets.get(JobState::Running))
    }
}
