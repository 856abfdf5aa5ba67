//! Dedup-safe uploader
//!
//! Protocol for one record:
//! 1. Authenticate
//! 2. List the most recent `lookback_rows` rows; an equal normalized timestamp means
//!    `SkippedDuplicate`
//! 3. Submit. On 401/403: re-authenticate, list again, and resubmit only if the hour is
//!    still absent (the denied submit may have been committed)
//! 4. On success, list `confirm_rows` rows to report the created row; a failed lookup
//!    never downgrades the outcome
//!
//! Duplicate protection only reaches as far back as the lookback listing. A record older
//! than the oldest row in a full lookback page can be created twice; this is logged, not
//! prevented.

use airq_common::config::{Credentials, RemoteConfig};
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::models::{ListQuery, Record, RemoteRowRef, UploadOutcome};
use crate::services::session::SessionManager;
use crate::types::{Authorized, RemoteStore};

const DEFAULT_LOOKBACK_ROWS: u32 = 24;
const DEFAULT_CONFIRM_ROWS: u32 = 5;

pub struct Uploader<'a, S: RemoteStore> {
    store: &'a S,
    credentials: &'a Credentials,
    lookback_rows: u32,
    confirm_rows: u32,
}

impl<'a, S: RemoteStore> Uploader<'a, S> {
    pub fn new(store: &'a S, credentials: &'a Credentials) -> Self {
        Self {
            store,
            credentials,
            lookback_rows: DEFAULT_LOOKBACK_ROWS,
            confirm_rows: DEFAULT_CONFIRM_ROWS,
        }
    }

    pub fn from_config(store: &'a S, credentials: &'a Credentials, config: &RemoteConfig) -> Self {
        Self::new(store, credentials).with_lookback(config.dedup_lookback_rows, config.confirm_rows)
    }

    pub fn with_lookback(mut self, lookback_rows: u32, confirm_rows: u32) -> Self {
        self.lookback_rows = lookback_rows;
        self.confirm_rows = confirm_rows;
        self
    }

    pub fn lookback_rows(&self) -> u32 {
        self.lookback_rows
    }

    /// Upload one record under its own session
    pub async fn upload(&self, record: &Record) -> SyncResult<UploadOutcome> {
        let mut session = SessionManager::new(self.store, self.credentials);
        self.upload_in(&mut session, record).await
    }

    /// Upload one record using an existing session and its re-authentication budget
    pub async fn upload_in(
        &self,
        session: &mut SessionManager<'_, S>,
        record: &Record,
    ) -> SyncResult<UploadOutcome> {
        let target = record.normalized_timestamp();
        session.ensure_authenticated().await?;

        if let Some(existing) = self.find_existing(session, &target).await? {
            info!(detected_at = %existing, lookback = self.lookback_rows, "Duplicate detectedAtUtc, skipping upload");
            return Ok(UploadOutcome::SkippedDuplicate { existing });
        }

        let first = match session.submit_once(record).await {
            Ok(reply) => reply,
            Err(e) => return failed(&target, e),
        };

        if let Authorized::Denied(status) = first {
            session.reauthenticate("POST", status).await?;

            if let Some(existing) = self.find_existing(session, &target).await? {
                info!(detected_at = %existing, "Duplicate detectedAtUtc found after re-login, skipping upload");
                return Ok(UploadOutcome::SkippedDuplicate { existing });
            }

            match session.submit_once(record).await {
                Ok(Authorized::Granted(_)) => {}
                Ok(Authorized::Denied(status)) => {
                    return Err(SyncError::Auth(format!(
                        "POST auth failed ({}) after re-login",
                        status
                    )))
                }
                Err(e) => return failed(&target, e),
            }
        }

        let row = self.confirm(session, &target).await;
        info!(status = "ok", detected_at = %target, row_id = ?row.as_ref().and_then(|r| r.id.as_deref()), "Upload success");
        Ok(UploadOutcome::Success { row })
    }

    /// Matching normalized timestamp among the latest `lookback_rows` rows
    async fn find_existing(
        &self,
        session: &mut SessionManager<'_, S>,
        target: &str,
    ) -> SyncResult<Option<String>> {
        let page = session.list(&ListQuery::latest(0, self.lookback_rows)).await?;
        if page.find(target).is_some() {
            return Ok(Some(target.to_string()));
        }

        let full = page.rows.len() >= self.lookback_rows as usize;
        if let Some(oldest) = page.timestamps().min() {
            if full && target < oldest.as_str() {
                warn!(
                    detected_at = %target,
                    oldest_checked = %oldest,
                    lookback = self.lookback_rows,
                    "Record is older than the dedup lookback window; duplicate protection does not apply"
                );
            }
        }
        Ok(None)
    }

    async fn confirm(&self, session: &mut SessionManager<'_, S>, target: &str) -> Option<RemoteRowRef> {
        match session.list(&ListQuery::latest(0, self.confirm_rows)).await {
            Ok(page) => page.find(target).and_then(|row| row.row_ref()),
            Err(e) => {
                debug!(error = %e, "Could not confirm uploaded row");
                None
            }
        }
    }
}

/// Transport and schema failures of the submit itself become a `Failed` outcome
fn failed(target: &str, err: SyncError) -> SyncResult<UploadOutcome> {
    match err {
        SyncError::Transport(_) | SyncError::Schema(_) => {
            warn!(detected_at = %target, error = %err, "Upload failed");
            Ok(UploadOutcome::Failed {
                reason: err.to_string(),
            })
        }
        other => Err(other),
    }
}
