//! Hour buckets and timestamp utilities
//!
//! Every reading in the pipeline is keyed by an [`HourBucket`]: an instant floored to the
//! top of the hour in the offset it was expressed in. Buckets compare and hash by instant,
//! so a UTC bucket and a local bucket for the same hour are equal.
//!
//! None of these helpers read the process clock except [`now`]; callers read it once and
//! thread the value through.

use crate::{Error, Result};
use chrono::{
    DateTime, Datelike, FixedOffset, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Timelike, Utc,
};
use serde::{Serialize, Serializer};
use std::fmt;

/// Remote-store detection timestamp format (millisecond precision, `Z` suffix)
const DETECTED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Canonical form used when comparing remote timestamps for dedup
const NORMALIZED_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Local timestamp format used by the upstream source (`2026/01/11 05:00:00`)
const SOURCE_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Build a fixed offset from whole hours east of UTC
pub fn fixed_offset(hours: i32) -> Result<FixedOffset> {
    FixedOffset::east_opt(hours * 3600)
        .ok_or_else(|| Error::InvalidInput(format!("UTC offset out of range: {} hours", hours)))
}

/// A timestamp floored to the hour (minutes, seconds and sub-seconds are zero)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HourBucket(DateTime<FixedOffset>);

impl HourBucket {
    /// Floor a timestamp to the top of its hour, keeping its offset
    pub fn floor(dt: DateTime<FixedOffset>) -> Self {
        let offset = *dt.offset();
        let local = dt.naive_local();
        let floored_local =
            local.date().and_time(NaiveTime::MIN) + TimeDelta::hours(i64::from(local.hour()));
        let floored_utc = floored_local - TimeDelta::seconds(i64::from(offset.local_minus_utc()));
        Self(DateTime::from_naive_utc_and_offset(floored_utc, offset))
    }

    /// Floor a UTC instant to the hour in UTC
    pub fn floor_utc(dt: DateTime<Utc>) -> Self {
        Self::floor(dt.fixed_offset())
    }

    /// Floor an instant to the hour as observed in `offset`
    pub fn floor_in(dt: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self::floor(dt.with_timezone(&offset))
    }

    /// Start of the hour in the bucket's own offset
    pub fn start(&self) -> DateTime<FixedOffset> {
        self.0
    }

    pub fn to_utc(&self) -> DateTime<Utc> {
        self.0.with_timezone(&Utc)
    }

    /// The same hour re-expressed in UTC
    pub fn as_utc(&self) -> Self {
        Self::floor_utc(self.to_utc())
    }

    /// The same hour re-expressed in `offset`; re-floored for offsets that are not whole hours
    pub fn in_offset(&self, offset: FixedOffset) -> Self {
        Self::floor(self.0.with_timezone(&offset))
    }

    /// Shift by a whole number of hours (negative moves back)
    ///
    /// Leaving chrono's representable range is an `InvalidInput` error.
    pub fn shift_hours(&self, hours: i64) -> Result<Self> {
        self.checked_shift_hours(hours).ok_or_else(|| {
            Error::InvalidInput(format!("{} shifted by {} hours is out of range", self, hours))
        })
    }

    pub fn checked_shift_hours(&self, hours: i64) -> Option<Self> {
        TimeDelta::try_hours(hours)
            .and_then(|delta| self.0.checked_add_signed(delta))
            .map(Self)
    }

    /// The following hour; stays put at the last representable hour
    pub fn next(&self) -> Self {
        self.checked_shift_hours(1).unwrap_or(*self)
    }

    /// Reporting period (calendar month) in the bucket's own offset
    pub fn period(&self) -> PeriodKey {
        PeriodKey {
            year: self.0.year(),
            month: self.0.month(),
        }
    }

    /// Remote-store payload form: `2026-01-11T02:00:00.000Z`
    pub fn detected_at_utc(&self) -> String {
        self.to_utc().format(DETECTED_AT_FORMAT).to_string()
    }

    /// Dedup comparison form: `2026-01-11T02:00:00Z`
    pub fn normalized_utc(&self) -> String {
        self.to_utc().format(NORMALIZED_FORMAT).to_string()
    }
}

impl fmt::Display for HourBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl Serialize for HourBucket {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_rfc3339())
    }
}

/// Half-open interval of hour buckets `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourRange {
    pub start: HourBucket,
    pub end: HourBucket,
}

impl HourRange {
    /// An `end` at or before `start` yields an empty range
    pub fn new(start: HourBucket, end: HourBucket) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn len(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        let hours = (self.end.to_utc() - self.start.to_utc()).num_hours();
        usize::try_from(hours).unwrap_or(0)
    }

    pub fn contains(&self, hour: &HourBucket) -> bool {
        *hour >= self.start && *hour < self.end
    }

    /// Chronological hours in the range
    pub fn hours(&self) -> impl Iterator<Item = HourBucket> {
        let end = self.end;
        std::iter::successors(Some(self.start), |h| h.checked_shift_hours(1))
            .take_while(move |h| *h < end)
    }
}

/// Reporting period of the upstream source: one calendar month (`YYYYMM`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeriodKey {
    pub year: i32,
    pub month: u32,
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}{:02}", self.year, self.month)
    }
}

/// Parse an ISO-8601 timestamp as reported by the remote store
///
/// Accepts a `Z` suffix, an explicit offset, or no offset at all (taken as UTC), with any
/// number of fractional digits.
pub fn parse_iso_utc(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::InvalidInput("empty timestamp".to_string()));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc());
        }
    }

    Err(Error::InvalidInput(format!("unparsable timestamp: {:?}", s)))
}

/// Canonical UTC form of a remote timestamp, used as the dedup key
pub fn normalize_timestamp(s: &str) -> Result<String> {
    Ok(parse_iso_utc(s)?.format(NORMALIZED_FORMAT).to_string())
}

/// Parse the upstream source's local timestamp (`YYYY/MM/DD HH:MM:SS`)
pub fn parse_source_timestamp(s: &str, offset: FixedOffset) -> Result<DateTime<FixedOffset>> {
    let naive = NaiveDateTime::parse_from_str(s.trim(), SOURCE_FORMAT)
        .map_err(|e| Error::InvalidInput(format!("bad source timestamp {:?}: {}", s, e)))?;
    localize(naive, offset)
}

/// Parse a local date-time argument
///
/// Accepted: `YYYY-MM-DDTHH:MM:SS`, `YYYY-MM-DDTHH:MM`, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD HH:MM`.
pub fn parse_local_datetime(s: &str, offset: FixedOffset) -> Result<DateTime<FixedOffset>> {
    let s = s.trim();
    for fmt in [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return localize(naive, offset);
        }
    }
    Err(Error::InvalidInput(format!(
        "unsupported datetime format: {:?} (use YYYY-MM-DDTHH:MM:SS)",
        s
    )))
}

/// Parse a local hour argument (`YYYY-MM-DD HH` or `YYYY-MM-DD HH:MM`), floored to the hour
pub fn parse_local_hour(s: &str, offset: FixedOffset) -> Result<HourBucket> {
    let s = s.trim();
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(&format!("{}:00", s), "%Y-%m-%d %H:%M"))
        .map_err(|_| {
            Error::InvalidInput(format!(
                "invalid hour {:?}; use 'YYYY-MM-DD HH' e.g. '2026-01-11 05'",
                s
            ))
        })?;
    Ok(HourBucket::floor(localize(naive, offset)?))
}

fn localize(naive: NaiveDateTime, offset: FixedOffset) -> Result<DateTime<FixedOffset>> {
    offset
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| Error::InvalidInput(format!("ambiguous local time: {}", naive)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tw() -> FixedOffset {
        fixed_offset(8).unwrap()
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_floor_zeroes_minutes_seconds_and_nanos() {
        let dt = DateTime::parse_from_rfc3339("2026-01-11T10:42:17.123456+08:00").unwrap();
        let bucket = HourBucket::floor(dt);
        assert_eq!(bucket.start().to_rfc3339(), "2026-01-11T10:00:00+08:00");
        assert_eq!(bucket.start().minute(), 0);
        assert_eq!(bucket.start().second(), 0);
        assert_eq!(bucket.start().nanosecond(), 0);
    }

    #[test]
    fn test_floor_is_idempotent() {
        for s in [
            "2026-01-11T00:00:00Z",
            "2026-01-11T23:59:59.999Z",
            "2024-02-29T12:30:00+05:30",
            "2026-12-31T23:01:00-03:00",
        ] {
            let dt = DateTime::parse_from_rfc3339(s).unwrap();
            let once = HourBucket::floor(dt);
            let twice = HourBucket::floor(once.start());
            assert_eq!(once, twice, "floor not idempotent for {}", s);
        }
    }

    #[test]
    fn test_buckets_compare_by_instant_across_offsets() {
        let local = HourBucket::floor(DateTime::parse_from_rfc3339("2026-01-11T10:15:00+08:00").unwrap());
        let as_utc = HourBucket::floor_utc(utc("2026-01-11T02:59:00Z"));
        assert_eq!(local, as_utc);
        assert_eq!(local.as_utc().start().to_rfc3339(), "2026-01-11T02:00:00+00:00");
        assert_eq!(as_utc.in_offset(tw()).start().to_rfc3339(), "2026-01-11T10:00:00+08:00");
    }

    #[test]
    fn test_half_hour_offset_floors_locally() {
        let ist = FixedOffset::east_opt(5 * 3600 + 1800).unwrap();
        let bucket = HourBucket::floor_in(utc("2026-01-11T02:10:00Z"), ist);
        // 07:40 local
        assert_eq!(bucket.start().to_rfc3339(), "2026-01-11T07:00:00+05:30");
    }

    #[test]
    fn test_detected_at_and_normalized_forms() {
        let bucket = HourBucket::floor(DateTime::parse_from_rfc3339("2026-01-11T10:00:00+08:00").unwrap());
        assert_eq!(bucket.detected_at_utc(), "2026-01-11T02:00:00.000Z");
        assert_eq!(bucket.normalized_utc(), "2026-01-11T02:00:00Z");
    }

    #[test]
    fn test_period_uses_local_month() {
        // 2026-01-31T16:30Z is already February 1st in +08:00
        let bucket = HourBucket::floor_in(utc("2026-01-31T16:30:00Z"), tw());
        assert_eq!(bucket.period().to_string(), "202602");
        assert_eq!(bucket.as_utc().period().to_string(), "202601");
    }

    #[test]
    fn test_hour_range_iteration() {
        let start = HourBucket::floor_utc(utc("2026-01-11T06:00:00Z"));
        let end = HourBucket::floor_utc(utc("2026-01-11T10:00:00Z"));
        let range = HourRange::new(start, end);
        let hours: Vec<String> = range.hours().map(|h| h.normalized_utc()).collect();
        assert_eq!(
            hours,
            vec![
                "2026-01-11T06:00:00Z",
                "2026-01-11T07:00:00Z",
                "2026-01-11T08:00:00Z",
                "2026-01-11T09:00:00Z",
            ]
        );
        assert_eq!(range.len(), 4);
        assert!(range.contains(&start));
        assert!(!range.contains(&end));
    }

    #[test]
    fn test_shift_out_of_range_is_invalid_input() {
        let bucket = HourBucket::floor_utc(utc("2026-01-11T06:00:00Z"));
        assert_eq!(
            bucket.shift_hours(-3).unwrap().normalized_utc(),
            "2026-01-11T03:00:00Z"
        );

        let err = bucket.shift_hours(-i64::from(u32::MAX)).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(err.is_usage_error());
        assert!(bucket.shift_hours(i64::MAX).is_err());
        assert!(bucket.checked_shift_hours(i64::MIN).is_none());
    }

    #[test]
    fn test_inverted_range_is_empty() {
        let start = HourBucket::floor_utc(utc("2026-01-11T06:00:00Z"));
        let range = HourRange::new(start, start.shift_hours(-2).unwrap());
        assert!(range.is_empty());
        assert_eq!(range.len(), 0);
        assert_eq!(range.hours().count(), 0);
    }

    #[test]
    fn test_normalize_timestamp_variants() {
        for s in [
            "2026-01-11T02:00:00Z",
            "2026-01-11T02:00:00.000Z",
            "2026-01-11T02:00:00",
            "2026-01-11T02:00:00.1234567",
            "2026-01-11T10:00:00+08:00",
            " 2026-01-11T02:00:00Z ",
        ] {
            assert_eq!(normalize_timestamp(s).unwrap(), "2026-01-11T02:00:00Z", "input {:?}", s);
        }
        assert!(normalize_timestamp("").is_err());
        assert!(normalize_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_parse_source_timestamp() {
        let dt = parse_source_timestamp("2026/01/11 05:00:00", tw()).unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-01-11T05:00:00+08:00");
        assert!(parse_source_timestamp("2026-01-11 05:00", tw()).is_err());
    }

    #[test]
    fn test_parse_local_hour_formats() {
        let a = parse_local_hour("2026-01-11 05", tw()).unwrap();
        let b = parse_local_hour("2026-01-11 05:00", tw()).unwrap();
        let c = parse_local_hour("2026-01-11 05:45", tw()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.normalized_utc(), "2026-01-10T21:00:00Z");
        assert!(parse_local_hour("11/01/2026", tw()).is_err());
    }

    #[test]
    fn test_parse_local_datetime_formats() {
        let expected = "2026-01-11T12:00:00+08:00";
        for s in ["2026-01-11T12:00:00", "2026-01-11T12:00", "2026-01-11 12:00"] {
            assert_eq!(parse_local_datetime(s, tw()).unwrap().to_rfc3339(), expected);
        }
        assert!(parse_local_datetime("2026-01-11", tw()).is_err());
    }

    #[test]
    fn test_hour_bucket_serializes_as_rfc3339() {
        let bucket = HourBucket::floor_utc(utc("2026-01-11T08:00:00Z"));
        let json = serde_json::to_string(&bucket).unwrap();
        assert_eq!(json, "\"2026-01-11T08:00:00+00:00\"");
    }

    #[test]
    fn test_fixed_offset_bounds() {
        assert!(fixed_offset(8).is_ok());
        assert!(fixed_offset(-12).is_ok());
        assert!(fixed_offset(30).is_err());
    }
}
