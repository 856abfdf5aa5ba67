//! Quality gate for raw upstream rows
//!
//! Rules, applied in order:
//! 1. Publication timing: an hour later than `floor(now - lag)` is rejected; the source never
//!    finalizes an hour before the lag has elapsed.
//! 2. Negative values: under [`NegativePolicy::Nullify`] a negative value becomes absent and
//!    the record is kept; under [`NegativePolicy::RejectRecord`] any negative value rejects
//!    the whole record.

use airq_common::config::{NegativePolicy, SourceConfig};
use airq_common::HourBucket;
use chrono::{DateTime, TimeDelta, Utc};
use std::fmt;

use crate::models::{Pollutant, RawSourceRow, Record};

/// Machine-readable reason attached to a gate decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QcFlag {
    RejectPublicationTiming,
    NegativeNullified(Pollutant),
    NegativeReject(Pollutant),
    RejectNegativePolicy,
}

impl QcFlag {
    pub fn is_rejection(&self) -> bool {
        matches!(self, QcFlag::RejectPublicationTiming | QcFlag::RejectNegativePolicy)
    }
}

impl fmt::Display for QcFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QcFlag::RejectPublicationTiming => write!(f, "REJECT_PUBLICATION_TIMING"),
            QcFlag::NegativeNullified(p) => write!(f, "NEGATIVE_NULLIFIED:{}", p.remote_key()),
            QcFlag::NegativeReject(p) => write!(f, "NEGATIVE_REJECT:{}", p.remote_key()),
            QcFlag::RejectNegativePolicy => write!(f, "REJECT_NEGATIVE_POLICY"),
        }
    }
}

/// Gate decision for one raw row
#[derive(Debug, Clone, PartialEq)]
pub enum GateVerdict {
    Accepted { record: Record, flags: Vec<QcFlag> },
    Rejected { flags: Vec<QcFlag> },
}

impl GateVerdict {
    pub fn flags(&self) -> &[QcFlag] {
        match self {
            GateVerdict::Accepted { flags, .. } | GateVerdict::Rejected { flags } => flags,
        }
    }

    pub fn into_record(self) -> Option<Record> {
        match self {
            GateVerdict::Accepted { record, .. } => Some(record),
            GateVerdict::Rejected { .. } => None,
        }
    }
}

/// Publication-timing and negative-value rules
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityGate {
    publication_lag: TimeDelta,
    policy: NegativePolicy,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self::new(1, NegativePolicy::Nullify)
    }
}

impl QualityGate {
    pub fn new(publication_lag_hours: u32, policy: NegativePolicy) -> Self {
        Self {
            publication_lag: TimeDelta::hours(i64::from(publication_lag_hours)),
            policy,
        }
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(config.publication_lag_hours, config.negative_policy)
    }

    pub fn policy(&self) -> NegativePolicy {
        self.policy
    }

    /// Latest hour the source is expected to have finalized: `floor(now - lag)`
    pub fn latest_publishable(&self, now: DateTime<Utc>, reference: &HourBucket) -> HourBucket {
        HourBucket::floor_in(now - self.publication_lag, *reference.start().offset())
    }

    /// Apply the rules to one raw row already matched to `hour`
    pub fn evaluate(&self, raw: &RawSourceRow, hour: HourBucket, now: DateTime<Utc>) -> GateVerdict {
        if hour > self.latest_publishable(now, &hour) {
            return GateVerdict::Rejected {
                flags: vec![QcFlag::RejectPublicationTiming],
            };
        }

        let mut readings = raw.readings();
        let mut flags = Vec::new();
        for pollutant in Pollutant::ALL {
            if matches!(readings.get(pollutant), Some(v) if v < 0.0) {
                match self.policy {
                    NegativePolicy::Nullify => {
                        readings.set(pollutant, None);
                        flags.push(QcFlag::NegativeNullified(pollutant));
                    }
                    NegativePolicy::RejectRecord => flags.push(QcFlag::NegativeReject(pollutant)),
                }
            }
        }

        if self.policy == NegativePolicy::RejectRecord && !flags.is_empty() {
            flags.push(QcFlag::RejectNegativePolicy);
            return GateVerdict::Rejected { flags };
        }

        GateVerdict::Accepted {
            record: Record::new(hour, readings),
            flags,
        }
    }
}
