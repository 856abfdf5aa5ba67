//! Manual point-fix for a single hour
//!
//! Re-reads one hour from the source and pushes it to the remote store again, optionally
//! deleting the existing row first. The delete is unconditional: nothing guards against
//! the row changing between the listing and the delete.

use airq_common::config::Credentials;
use airq_common::HourBucket;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

use crate::error::{SyncError, SyncResult};
use crate::models::{ListQuery, Record, RemoteRowRef, UploadOutcome};
use crate::services::range_fetcher::RangeFetcher;
use crate::services::session::SessionManager;
use crate::services::uploader::Uploader;
use crate::types::{RemoteStore, SourceExtractor};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FixMode {
    /// Delete the existing row, then upload
    #[default]
    #[value(name = "delete-reupload")]
    #[serde(rename = "delete-reupload")]
    DeleteThenReupload,
    /// Upload only; an existing row makes the upload a duplicate skip
    ReuploadOnly,
}

impl fmt::Display for FixMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixMode::DeleteThenReupload => write!(f, "delete-reupload"),
            FixMode::ReuploadOnly => write!(f, "reupload-only"),
        }
    }
}

/// What a point-fix found and did
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointFixReport {
    pub target_hour: HourBucket,
    pub detected_at: String,
    pub mode: FixMode,
    pub dry_run: bool,
    /// Row found for the hour within the listing, if any
    pub existing_row: Option<RemoteRowRef>,
    /// Identifier of the deleted row
    pub deleted: Option<String>,
    /// `None` in dry-run
    pub upload: Option<UploadOutcome>,
    /// Submit body for the record
    pub payload: serde_json::Value,
}

impl PointFixReport {
    pub fn is_success(&self) -> bool {
        self.upload.as_ref().map_or(true, UploadOutcome::is_ok)
    }
}

pub struct PointFix<'a, X: SourceExtractor, S: RemoteStore> {
    fetcher: RangeFetcher<'a, X>,
    uploader: Uploader<'a, S>,
    store: &'a S,
    credentials: &'a Credentials,
    list_page_size: u32,
}

impl<'a, X: SourceExtractor, S: RemoteStore> PointFix<'a, X, S> {
    pub fn new(
        fetcher: RangeFetcher<'a, X>,
        uploader: Uploader<'a, S>,
        store: &'a S,
        credentials: &'a Credentials,
    ) -> Self {
        Self {
            fetcher,
            uploader,
            store,
            credentials,
            list_page_size: 200,
        }
    }

    /// Recent rows searched for the existing row
    pub fn with_list_page_size(mut self, rows: u32) -> Self {
        self.list_page_size = rows;
        self
    }

    pub async fn run(
        &self,
        target: HourBucket,
        mode: FixMode,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> SyncResult<PointFixReport> {
        let target = target.in_offset(self.fetcher.offset());
        info!(target_hour = %target, mode = %mode, dry_run, "Point-fix");

        let record = self.source_record(target, now).await?;
        let detected_at = record.normalized_timestamp();
        info!(detected_at = %detected_at, "Target detectedAtUtc");

        let mut report = PointFixReport {
            target_hour: target,
            detected_at: detected_at.clone(),
            mode,
            dry_run,
            existing_row: None,
            deleted: None,
            upload: None,
            payload: serde_json::to_value(record.payload())
                .map_err(|e| SyncError::Validation(e.to_string()))?,
        };

        {
            let mut session = SessionManager::new(self.store, self.credentials);
            let page = session
                .list(&ListQuery::latest(0, self.list_page_size))
                .await?;
            report.existing_row = page.find(&detected_at).and_then(|row| row.row_ref());

            match &report.existing_row {
                Some(row) => info!(row_id = ?row.id, "Existing row found for target hour"),
                None => info!(
                    list_page_size = self.list_page_size,
                    "No existing row for target hour within the latest listing"
                ),
            }

            match (mode, report.existing_row.as_ref().and_then(|r| r.id.clone())) {
                (FixMode::DeleteThenReupload, Some(id)) => {
                    warn!(row_id = %id, detected_at = %detected_at, "Will delete existing row");
                    if !dry_run {
                        session.delete(&id).await?;
                        info!(status = "ok", row_id = %id, "Deleted row");
                        report.deleted = Some(id);
                    }
                }
                (FixMode::DeleteThenReupload, None) => {
                    if report.existing_row.is_some() {
                        warn!("Existing row has no id; delete step cannot proceed");
                    }
                    info!("Delete step skipped");
                }
                (FixMode::ReuploadOnly, _) => info!("Mode is reupload-only, skipping delete step"),
            }
        }

        if dry_run {
            info!(status = "ok", "Dry-run: skip upload");
            return Ok(report);
        }

        let outcome = self.uploader.upload(&record).await?;
        match &outcome {
            UploadOutcome::Success { row } => {
                info!(status = "ok", detected_at = %detected_at, row_id = ?row.as_ref().and_then(|r| r.id.as_deref()), "Upload success")
            }
            UploadOutcome::SkippedDuplicate { existing } => {
                warn!(detected_at = %existing, "Upload skipped due to duplicate")
            }
            UploadOutcome::Failed { reason } => warn!(reason = %reason, "Upload failed"),
        }
        report.upload = Some(outcome);
        Ok(report)
    }

    /// First accepted source record for the hour
    async fn source_record(&self, target: HourBucket, now: DateTime<Utc>) -> SyncResult<Record> {
        self.fetcher
            .fetch_hour(target, now)
            .await?
            .into_iter()
            .next()
            .ok_or(SyncError::NoSourceData(target))
    }
}
