//! Source range fetcher
//!
//! Turns a local hour range into gated records:
//! 1. Cap the end at `latest_publishable + 1h` so not-yet-final hours are never expected
//! 2. Group the expected hours by reporting period and load each period once
//! 3. Match each expected hour to its raw row and run it through the quality gate
//!
//! The period cache lives for one call only. A cache that outlived the call could serve
//! a month's data fetched under an earlier `now` to a later call.

use airq_common::time::{parse_source_timestamp, HourRange, PeriodKey};
use airq_common::HourBucket;
use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

use crate::error::SyncResult;
use crate::models::{RawSourceRow, Record};
use crate::services::quality_gate::{GateVerdict, QcFlag, QualityGate};
use crate::types::SourceExtractor;

/// An hour whose raw row exists but was rejected by the quality gate
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedHour {
    pub hour: HourBucket,
    pub flags: Vec<QcFlag>,
}

/// Output of [`RangeFetcher::fetch_range`]
#[derive(Debug, Clone, PartialEq)]
pub struct RangeFetch {
    /// Accepted records, chronological
    pub records: Vec<Record>,
    /// Expected hours with no raw row upstream
    pub missing_hours: Vec<HourBucket>,
    /// Expected hours whose raw row the gate rejected
    pub rejected_hours: Vec<RejectedHour>,
    pub meta: RangeMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeMeta {
    pub start_local: HourBucket,
    pub end_local: HourBucket,
    pub effective_end_local: HourBucket,
    pub publish_upto_local: HourBucket,
    pub expected_hours: usize,
    pub records: usize,
    pub missing: usize,
    pub rejected: usize,
    pub periods_fetched: usize,
}

/// Per-call cache of period datasets
struct PeriodCache<'s, S: SourceExtractor> {
    source: &'s S,
    periods: HashMap<PeriodKey, Vec<RawSourceRow>>,
}

impl<'s, S: SourceExtractor> PeriodCache<'s, S> {
    fn new(source: &'s S) -> Self {
        Self {
            source,
            periods: HashMap::new(),
        }
    }

    async fn load(&mut self, period: PeriodKey) -> SyncResult<()> {
        if !self.periods.contains_key(&period) {
            let rows = self.source.fetch_period(period).await?;
            self.periods.insert(period, rows);
        }
        Ok(())
    }

    fn rows(&self, period: &PeriodKey) -> &[RawSourceRow] {
        self.periods.get(period).map(Vec::as_slice).unwrap_or_default()
    }

    fn len(&self) -> usize {
        self.periods.len()
    }
}

/// Fetches and gates source records for hour ranges
pub struct RangeFetcher<'a, S: SourceExtractor> {
    source: &'a S,
    gate: QualityGate,
    offset: FixedOffset,
}

impl<'a, S: SourceExtractor> RangeFetcher<'a, S> {
    /// `offset` is the source's local reporting time zone
    pub fn new(source: &'a S, gate: QualityGate, offset: FixedOffset) -> Self {
        Self {
            source,
            gate,
            offset,
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Gated records for local `[start, end)` as of `now`
    pub async fn fetch_range(
        &self,
        start: HourBucket,
        end: HourBucket,
        now: DateTime<Utc>,
    ) -> SyncResult<RangeFetch> {
        let start = start.in_offset(self.offset);
        let end = end.in_offset(self.offset);
        let publish_upto = self.gate.latest_publishable(now, &start);
        let effective_end = end.min(publish_upto.next());
        let range = HourRange::new(start, effective_end);

        let periods: BTreeSet<PeriodKey> = range.hours().map(|h| h.period()).collect();
        let mut cache = PeriodCache::new(self.source);
        for period in &periods {
            cache.load(*period).await?;
        }

        let mut index: HashMap<HourBucket, &RawSourceRow> = HashMap::new();
        for period in &periods {
            for raw in cache.rows(period) {
                let Some(hour) = self.row_hour(raw) else {
                    continue;
                };
                // A later row for the same hour replaces the earlier one
                if range.contains(&hour) {
                    index.insert(hour, raw);
                }
            }
        }

        let mut records = Vec::new();
        let mut missing_hours = Vec::new();
        let mut rejected_hours = Vec::new();
        for hour in range.hours() {
            let Some(raw) = index.get(&hour) else {
                missing_hours.push(hour);
                continue;
            };
            match self.gate.evaluate(raw, hour, now) {
                GateVerdict::Accepted { record, flags } => {
                    if !flags.is_empty() {
                        warn!(hour = %hour, flags = %join_flags(&flags), "Quality flags applied");
                    }
                    records.push(record);
                }
                GateVerdict::Rejected { flags } => {
                    warn!(hour = %hour, flags = %join_flags(&flags), "Source row rejected by quality gate");
                    rejected_hours.push(RejectedHour { hour, flags });
                }
            }
        }

        let meta = RangeMeta {
            start_local: start,
            end_local: end,
            effective_end_local: effective_end,
            publish_upto_local: publish_upto,
            expected_hours: range.len(),
            records: records.len(),
            missing: missing_hours.len(),
            rejected: rejected_hours.len(),
            periods_fetched: cache.len(),
        };
        info!(
            expected = meta.expected_hours,
            records = meta.records,
            missing = meta.missing,
            rejected = meta.rejected,
            periods = meta.periods_fetched,
            "Source range fetched"
        );

        Ok(RangeFetch {
            records,
            missing_hours,
            rejected_hours,
            meta,
        })
    }

    /// Every accepted record for one exact hour, in source order
    pub async fn fetch_hour(&self, target: HourBucket, now: DateTime<Utc>) -> SyncResult<Vec<Record>> {
        let target = target.in_offset(self.offset);
        let rows = self.source.fetch_period(target.period()).await?;

        let records = rows
            .iter()
            .filter(|raw| self.row_hour(raw) == Some(target))
            .filter_map(|raw| match self.gate.evaluate(raw, target, now) {
                GateVerdict::Accepted { record, .. } => Some(record),
                GateVerdict::Rejected { flags } => {
                    warn!(hour = %target, flags = %join_flags(&flags), "Source row rejected by quality gate");
                    None
                }
            })
            .collect();
        Ok(records)
    }

    fn row_hour(&self, raw: &RawSourceRow) -> Option<HourBucket> {
        let observed = raw.observed_at.as_deref()?;
        match parse_source_timestamp(observed, self.offset) {
            Ok(local) => Some(HourBucket::floor(local)),
            Err(e) => {
                debug!(observed, error = %e, "Skipping source row with unparsable timestamp");
                None
            }
        }
    }
}

fn join_flags(flags: &[QcFlag]) -> String {
    flags.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
}
