//! Continuity auditor
//!
//! Compares the hours the remote store should hold over a trailing window with the hours it
//! actually holds. Read-only: the remote store is listed, never modified.
//!
//! Window: `latest = floor_utc(now - 1h)`, expected `[latest - N, latest + 1h)`, so an
//! N-hour audit always expects N+1 buckets.

use airq_common::config::AuditConfig;
use airq_common::time::{parse_iso_utc, HourRange};
use airq_common::HourBucket;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashSet;
use tracing::{debug, info};

use crate::error::SyncResult;
use crate::models::{AuditMeta, AuditResult, ListQuery, RemoteRow};
use crate::services::session::SessionManager;
use crate::types::RemoteStore;

/// Remote listing bounds for one audit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContinuityAuditor {
    page_size: u32,
    max_pages: u32,
    buffer_rows: u32,
}

impl Default for ContinuityAuditor {
    fn default() -> Self {
        Self::from_config(&AuditConfig::default())
    }
}

impl ContinuityAuditor {
    pub fn new(page_size: u32, max_pages: u32, buffer_rows: u32) -> Self {
        Self {
            page_size,
            max_pages,
            buffer_rows,
        }
    }

    pub fn from_config(config: &AuditConfig) -> Self {
        Self::new(config.page_size, config.max_pages, config.buffer_rows)
    }

    /// Expected window for an `hours`-hour audit at `now`
    pub fn expected_range(hours: u32, now: DateTime<Utc>) -> SyncResult<HourRange> {
        let latest = HourBucket::floor_utc(now).shift_hours(-1)?;
        Ok(HourRange::new(latest.shift_hours(-i64::from(hours))?, latest.next()))
    }

    /// Audit the last `hours` hours as of `now`
    pub async fn audit<S: RemoteStore>(
        &self,
        session: &mut SessionManager<'_, S>,
        hours: u32,
        now: DateTime<Utc>,
    ) -> SyncResult<AuditResult> {
        if hours == 0 {
            return Err(airq_common::Error::InvalidInput("--hours must be > 0".to_string()).into());
        }

        let range = Self::expected_range(hours, now)?;
        session.ensure_authenticated().await?;
        let (rows, pages_fetched) = self.fetch_recent_rows(session, hours).await?;
        let existing = existing_hours(&rows);

        let expected_hours: Vec<HourBucket> = range.hours().collect();
        let missing_hours: Vec<HourBucket> = expected_hours
            .iter()
            .filter(|h| !existing.contains(h))
            .copied()
            .collect();

        let meta = AuditMeta {
            hours,
            now_utc: now.to_rfc3339_opts(SecondsFormat::Secs, false),
            latest_expected_utc: range.end.shift_hours(-1)?,
            start_expected_utc: range.start,
            end_expected_utc: range.end,
            rows_fetched: rows.len(),
            pages_fetched,
            expected_count: expected_hours.len(),
            missing_count: missing_hours.len(),
        };
        info!(
            hours,
            rows_fetched = meta.rows_fetched,
            pages = meta.pages_fetched,
            expected = meta.expected_count,
            missing = meta.missing_count,
            "Audit complete"
        );

        Ok(AuditResult {
            expected_hours,
            missing_hours,
            existing_count: existing.len(),
            meta,
        })
    }

    /// Page the most-recent-first listing until `hours + buffer` rows are collected,
    /// the listing runs out, or the page bound is reached
    async fn fetch_recent_rows<S: RemoteStore>(
        &self,
        session: &mut SessionManager<'_, S>,
        hours: u32,
    ) -> SyncResult<(Vec<RemoteRow>, u32)> {
        let needed = hours.saturating_add(self.buffer_rows) as usize;
        let mut rows = Vec::new();
        let mut page = 0;

        while rows.len() < needed && page < self.max_pages {
            let batch = session.list(&ListQuery::latest(page, self.page_size)).await?.rows;
            page += 1;
            debug!(page, rows = batch.len(), "Listing page fetched");
            if batch.is_empty() {
                break;
            }
            let short = batch.len() < self.page_size as usize;
            rows.extend(batch);
            if short {
                break;
            }
        }

        Ok((rows, page))
    }
}

/// UTC hour buckets present in the listing; rows without a usable timestamp are ignored
fn existing_hours(rows: &[RemoteRow]) -> HashSet<HourBucket> {
    rows.iter()
        .filter_map(|row| row.detected_at_utc.as_deref())
        .filter_map(|s| parse_iso_utc(s).ok())
        .map(HourBucket::floor_utc)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::services::test_support::{creds, hour, utc, FakeRemote};

    #[tokio::test]
    async fn test_scenario_a_single_missing_hour() {
        let remote = FakeRemote::new();
        remote.seed_row("2026-01-11T06:00:00.000Z");
        remote.seed_row("2026-01-11T07:00:00Z");
        remote.seed_row("2026-01-11T09:00:00.000Z");
        let credentials = creds();
        let mut session = SessionManager::new(&remote, &credentials);

        let result = ContinuityAuditor::default()
            .audit(&mut session, 3, utc("2026-01-11T10:00:00Z"))
            .await
            .unwrap();

        assert_eq!(
            result.expected_hours,
            vec![
                hour("2026-01-11T06:00:00Z"),
                hour("2026-01-11T07:00:00Z"),
                hour("2026-01-11T08:00:00Z"),
                hour("2026-01-11T09:00:00Z"),
            ]
        );
        assert_eq!(result.missing_hours, vec![hour("2026-01-11T08:00:00Z")]);
        assert_eq!(result.existing_count, 3);
        assert_eq!(result.meta.latest_expected_utc, hour("2026-01-11T09:00:00Z"));
        assert_eq!(result.meta.end_expected_utc, hour("2026-01-11T10:00:00Z"));
        assert_eq!(result.meta.now_utc, "2026-01-11T10:00:00+00:00");
        assert!(!result.is_continuous());
        assert_eq!(remote.row_count(), 3);
    }

    #[tokio::test]
    async fn test_expected_hours_is_window_plus_one() {
        let remote = FakeRemote::new();
        let credentials = creds();
        for n in [1u32, 5, 24, 48] {
            let mut session = SessionManager::new(&remote, &credentials);
            let result = ContinuityAuditor::default()
                .audit(&mut session, n, utc("2026-01-11T10:37:12Z"))
                .await
                .unwrap();
            assert_eq!(result.expected_hours.len(), n as usize + 1);
            assert!(result
                .missing_hours
                .iter()
                .all(|h| result.expected_hours.contains(h)));
        }
    }

    #[tokio::test]
    async fn test_paging_stops_at_needed_rows_or_page_bound() {
        let remote = FakeRemote::new();
        for h in 0..30 {
            let ts = hour("2026-01-10T00:00:00Z").shift_hours(h).unwrap().detected_at_utc();
            remote.seed_row(&ts);
        }
        let credentials = creds();

        let mut session = SessionManager::new(&remote, &credentials);
        let result = ContinuityAuditor::new(5, 10, 2)
            .audit(&mut session, 3, utc("2026-01-11T06:00:00Z"))
            .await
            .unwrap();
        assert_eq!(result.meta.pages_fetched, 1);
        assert_eq!(result.meta.rows_fetched, 5);

        let mut session = SessionManager::new(&remote, &credentials);
        let result = ContinuityAuditor::new(5, 2, 10)
            .audit(&mut session, 24, utc("2026-01-11T06:00:00Z"))
            .await
            .unwrap();
        assert_eq!(result.meta.pages_fetched, 2);
        assert_eq!(result.meta.rows_fetched, 10);
    }

    #[tokio::test]
    async fn test_short_page_ends_listing() {
        let remote = FakeRemote::new();
        remote.seed_row("2026-01-11T05:00:00.000Z");
        let credentials = creds();
        let mut session = SessionManager::new(&remote, &credentials);

        let result = ContinuityAuditor::default()
            .audit(&mut session, 24, utc("2026-01-11T06:00:00Z"))
            .await
            .unwrap();
        assert_eq!(result.meta.pages_fetched, 1);
        assert_eq!(remote.list_calls(), 1);
        assert_eq!(result.missing_hours.len(), 24);
    }

    #[tokio::test]
    async fn test_zero_hours_rejected_as_usage_error() {
        let remote = FakeRemote::new();
        let credentials = creds();
        let mut session = SessionManager::new(&remote, &credentials);
        let err = ContinuityAuditor::default()
            .audit(&mut session, 0, utc("2026-01-11T06:00:00Z"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Common(_)));
        assert_eq!(err.exit_code(), crate::error::EXIT_USAGE);
        assert_eq!(remote.login_calls(), 0);
    }

    #[tokio::test]
    async fn test_window_beyond_calendar_is_usage_error() {
        let remote = FakeRemote::new();
        let credentials = creds();
        let mut session = SessionManager::new(&remote, &credentials);
        let err = ContinuityAuditor::default()
            .audit(&mut session, u32::MAX, utc("2026-01-11T06:00:00Z"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Common(airq_common::Error::InvalidInput(_))));
        assert_eq!(err.exit_code(), crate::error::EXIT_USAGE);
        assert_eq!(remote.login_calls(), 0);
    }

    #[tokio::test]
    async fn test_large_buffer_does_not_overflow_row_target() {
        let remote = FakeRemote::new();
        remote.seed_row("2026-01-11T05:00:00.000Z");
        let credentials = creds();
        let mut session = SessionManager::new(&remote, &credentials);
        let result = ContinuityAuditor::new(5, 2, u32::MAX)
            .audit(&mut session, 3, utc("2026-01-11T06:00:00Z"))
            .await
            .unwrap();
        assert_eq!(result.meta.rows_fetched, 1);
        assert_eq!(result.missing_hours.len(), 3);
    }

    #[test]
    fn test_rows_without_timestamps_ignored() {
        let rows: Vec<RemoteRow> = serde_json::from_value(serde_json::json!([
            {"id": 1, "detectedAtUtc": "2026-01-11T05:30:00"},
            {"id": 2, "detectedAtUtc": "not a time"},
            {"id": 3}
        ]))
        .unwrap();
        let existing = existing_hours(&rows);
        assert_eq!(existing.len(), 1);
        assert!(existing.contains(&hour("2026-01-11T05:00:00Z")));
    }
}
