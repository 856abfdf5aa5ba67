//! Backfill orchestrator
//!
//! Fetches gated records for a local range and uploads them one at a time, oldest first.
//! Uploads are never concurrent: two in-flight uploads could both pass the duplicate
//! check for the same hour.

use airq_common::HourBucket;
use chrono::{DateTime, FixedOffset, Utc};
use tracing::{error, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::models::{BackfillSummary, UploadOutcome};
use crate::services::range_fetcher::RangeFetcher;
use crate::services::uploader::Uploader;
use crate::types::{RemoteStore, SourceExtractor};

pub struct BackfillOrchestrator<'a, X: SourceExtractor, S: RemoteStore> {
    fetcher: RangeFetcher<'a, X>,
    /// `None` when built for dry runs only
    uploader: Option<Uploader<'a, S>>,
}

impl<'a, X: SourceExtractor, S: RemoteStore> BackfillOrchestrator<'a, X, S> {
    pub fn new(fetcher: RangeFetcher<'a, X>, uploader: Uploader<'a, S>) -> Self {
        Self {
            fetcher,
            uploader: Some(uploader),
        }
    }

    /// Orchestrator that never touches the remote store; every run is a dry run
    pub fn dry_run_only(fetcher: RangeFetcher<'a, X>) -> Self {
        Self {
            fetcher,
            uploader: None,
        }
    }

    /// `[floor(now) - hours, floor(now))` in the source's local offset
    pub fn trailing_range(&self, hours: u32, now: DateTime<Utc>) -> SyncResult<(HourBucket, HourBucket)> {
        let end = HourBucket::floor_in(now, self.fetcher.offset());
        Ok((end.shift_hours(-i64::from(hours))?, end))
    }

    /// Backfill local `[start, end)` as of `now`
    ///
    /// Both bounds are floored to the hour first; an empty range after flooring is an error.
    pub async fn run(
        &self,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> SyncResult<BackfillSummary> {
        let start = HourBucket::floor(start).in_offset(self.fetcher.offset());
        let end = HourBucket::floor(end).in_offset(self.fetcher.offset());
        if end <= start {
            return Err(SyncError::InvalidRange { start, end });
        }
        let uploader = self.uploader.as_ref().filter(|_| !dry_run);
        let dry_run = uploader.is_none();
        info!(start = %start, end = %end, dry_run, "Backfill range");

        let fetched = self.fetcher.fetch_range(start, end, now).await?;
        for hour in &fetched.missing_hours {
            warn!(hour = %hour, "Missing hour: no source data");
        }
        for rejected in &fetched.rejected_hours {
            warn!(hour = %rejected.hour, "Rejected hour: source row failed quality checks");
        }

        let mut summary = BackfillSummary {
            dry_run,
            records_total: fetched.records.len(),
            missing_hours: fetched.missing_hours.clone(),
            rejected_hours: fetched.rejected_hours.iter().map(|r| r.hour).collect(),
            ..Default::default()
        };

        if fetched.records.is_empty() {
            warn!("No records returned from the source. Nothing to upload.");
            return Ok(summary);
        }

        let total = fetched.records.len();
        for (i, record) in fetched.records.iter().enumerate() {
            let detected_at = record.hour.detected_at_utc();
            info!(progress = %format!("{}/{}", i + 1, total), detected_at = %detected_at, "Uploading record");

            let Some(uploader) = uploader else {
                info!(status = "ok", detected_at = %detected_at, "Dry-run: skip upload");
                continue;
            };

            match uploader.upload(record).await {
                Ok(outcome) => {
                    if let UploadOutcome::Failed { reason } = &outcome {
                        error!(detected_at = %detected_at, reason = %reason, "Upload failed");
                    }
                    summary.record(&outcome);
                }
                Err(e) => {
                    error!(detected_at = %detected_at, error = %e, "Upload failed");
                    summary.failed += 1;
                }
            }
        }

        info!(
            records_total = summary.records_total,
            success = summary.success,
            skipped_duplicate = summary.skipped_duplicate,
            failed = summary.failed,
            missing_hours = summary.missing_hours.len(),
            rejected_hours = summary.rejected_hours.len(),
            "Backfill summary"
        );
        Ok(summary)
    }
}
