//! Operation outcomes reported to the CLI

use airq_common::HourBucket;
use serde::Serialize;

use super::remote::RemoteRowRef;

/// Result of one dedup-safe upload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadOutcome {
    /// Row created; the reference is best-effort and may be missing
    Success { row: Option<RemoteRowRef> },
    /// A row for the same hour already exists (counts as success)
    SkippedDuplicate { existing: String },
    /// The remote store answered with a non-success status
    Failed { reason: String },
}

impl UploadOutcome {
    pub fn is_ok(&self) -> bool {
        !matches!(self, UploadOutcome::Failed { .. })
    }
}

/// Result of a continuity audit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditResult {
    pub expected_hours: Vec<HourBucket>,
    pub missing_hours: Vec<HourBucket>,
    pub existing_count: usize,
    pub meta: AuditMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditMeta {
    pub hours: u32,
    pub now_utc: String,
    pub latest_expected_utc: HourBucket,
    pub start_expected_utc: HourBucket,
    pub end_expected_utc: HourBucket,
    pub rows_fetched: usize,
    pub pages_fetched: u32,
    pub expected_count: usize,
    pub missing_count: usize,
}

impl AuditResult {
    pub fn is_continuous(&self) -> bool {
        self.missing_hours.is_empty()
    }
}

/// Tally of one backfill run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackfillSummary {
    pub dry_run: bool,
    pub records_total: usize,
    pub success: usize,
    pub skipped_duplicate: usize,
    pub failed: usize,
    /// Hours with no upstream row
    pub missing_hours: Vec<HourBucket>,
    /// Hours whose upstream row the quality gate rejected
    pub rejected_hours: Vec<HourBucket>,
}

impl BackfillSummary {
    /// Missing or rejected hours do not fail a run; only failed uploads do
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn record(&mut self, outcome: &UploadOutcome) {
        match outcome {
            UploadOutcome::Success { .. } => self.success += 1,
            UploadOutcome::SkippedDuplicate { .. } => self.skipped_duplicate += 1,
            UploadOutcome::Failed { .. } => self.failed += 1,
        }
    }
}
