use super::ParseError;
use itertools::Itertools;
use serde::{Serialize, Serializer};
use std::{fmt, str::FromStr};

/// A single element of a compressed index token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexPart {
    Single(u64),
    /// inclusive `lo-hi` as printed by sacct
    Range { lo: u64, hi: u64 },
}

impl IndexPart {
    /// Number of units this part is accounted as.
    ///
    /// NOTE: a range counts `hi - lo`, not `hi - lo + 1`. Reservation sizes in existing batch
    /// files were tuned against this width, so it is kept.
    pub fn units(&self) -> u64 {
        match self {
            Self::Single(_) => 1,
            Self::Range { lo, hi } => hi - lo,
        }
    }
}

impl fmt::Display for IndexPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(index) => write!(f, "{index}"),
            Self::Range { lo, hi } => write!(f, "{lo}-{hi}"),
        }
    }
}

/// The part after `_` in an array job id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrayIndex {
    /// not an array job
    None,
    Single(u64),
    /// pending siblings reported as one line, e.g. `[0-99%10]` or `[1,4-7]`
    Compressed(Vec<IndexPart>),
    /// kept verbatim so the caller can report it
    Malformed(String),
}

impl ArrayIndex {
    fn parse(token: &str) -> Self {
        let malformed = || Self::Malformed(token.to_owned());

        let Some(inner) = token
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
        else {
            return token.parse().map(Self::Single).unwrap_or_else(|_| malformed());
        };

        // drop the array throttle, `[0-99%10]` limits concurrency but not the index set
        let inner = inner.split_once('%').map_or(inner, |(indices, _)| indices);

        inner
            .split(',')
            .map(|part| match part.split_once('-') {
                Some((lo, hi)) => match (lo.trim().parse(), hi.trim().parse()) {
                    (Ok(lo), Ok(hi)) if lo <= hi => Some(IndexPart::Range { lo, hi }),
                    _ => None,
                },
                None => part.trim().parse().ok().map(IndexPart::Single),
            })
            .collect::<Option<Vec<_>>>()
            .map(Self::Compressed)
            .unwrap_or_else(malformed)
    }
}

/// Composite `base[_index]` job identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobId {
    pub base: u64,
    pub index: ArrayIndex,
}

impl FromStr for JobId {
    type Err = ParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (base, index) = match raw.split_once('_') {
            Some((base, index)) => (base, ArrayIndex::parse(index)),
            None => (raw, ArrayIndex::None),
        };

        let base = base
            .parse()
            .map_err(|_| ParseError::JobId(raw.to_owned()))?;

        Ok(Self { base, index })
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.index {
            ArrayIndex::None => write!(f, "{}", self.base),
            ArrayIndex::Single(index) => write!(f, "{}_{index}", self.base),
            ArrayIndex::Compressed(parts) => write!(f, "{}_[{}]", self.base, parts.iter().join(",")),
            ArrayIndex::Malformed(token) => write!(f, "{}_{token}", self.base),
        }
    }
}

impl Serialize for JobId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_and_single_ids() {
        assert_eq!(
            "1234".parse(),
            Ok(JobId {
                base: 1234,
                index: ArrayIndex::None
            })
        );
        assert_eq!(
            "1234_17".parse(),
            Ok(JobId {
                base: 1234,
                index: ArrayIndex::Single(17)
            })
        );
    }

    #[test]
    fn compressed_tokens() {
        let id: JobId = "77_[0-99%10]".parse().unwrap();
        assert_eq!(
            id.index,
            ArrayIndex::Compressed(vec![IndexPart::Range { lo: 0, hi: 99 }])
        );

        let id: JobId = "77_[1,4-7]".parse().unwrap();
        assert_eq!(
            id.index,
            ArrayIndex::Compressed(vec![
                IndexPart::Single(1),
                IndexPart::Range { lo: 4, hi: 7 }
            ])
        );
        assert_eq!(id.to_string(), "77_[1,4-7]");
    }

    #[test]
    fn malformed_tokens_keep_the_base() {
        for token in ["[9-2]", "[a-b]", "[3-", "x", "[]"] {
            let id: JobId = format!("5_{token}").parse().unwrap();

            assert_eq!(id.base, 5);
            assert_eq!(id.index, ArrayIndex::Malformed(token.to_owned()));
        }
    }

    #[test]
    fn range_width_is_hi_minus_lo() {
        assert_eq!(IndexPart::Range { lo: 3, hi: 10 }.units(), 7);
        assert_eq!(IndexPart::Range { lo: 4, hi: 4 }.units(), 0);
        assert_eq!(IndexPart::Single(4).units(), 1);
    }

    #[test]
    fn non_numeric_base_is_an_error() {
        assert!(matches!("abc_1".parse::<JobId>(), Err(ParseError::JobId(_))));
        assert!(matches!("".parse::<JobId>(), Err(ParseError::JobId(_))));
    }
}
