//! Collaborator traits
//!
//! The pipeline talks to two external systems:
//! - **Upstream source**: unauthenticated, one dataset per reporting period
//! - **Remote store**: authenticated by a session cookie, list / submit / delete
//!
//! Both sit behind traits so every core component can run against in-memory fakes.
//!
//! # Example
//! ```rust,ignore
//! use airq_sync::types::{SourceExtractor, PeriodKey};
//!
//! pub struct FixtureSource(Vec<RawSourceRow>);
//!
//! #[async_trait::async_trait]
//! impl SourceExtractor for FixtureSource {
//!     async fn fetch_period(&self, _period: PeriodKey) -> SyncResult<Vec<RawSourceRow>> {
//!         Ok(self.0.clone())
//!     }
//! }
//! ```

use airq_common::config::Credentials;
use std::fmt;

use crate::error::SyncResult;
use crate::models::{Ack, ListPage, ListQuery, RawSourceRow, Record};

pub use airq_common::time::PeriodKey;

/// Upstream source of raw hourly rows
#[async_trait::async_trait]
pub trait SourceExtractor: Send + Sync {
    /// Every raw row the source publishes for one reporting period, in source order
    async fn fetch_period(&self, period: PeriodKey) -> SyncResult<Vec<RawSourceRow>>;
}

/// Opaque session credential returned by login (the session cookie value)
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

/// Reply of an authenticated call
///
/// 401/403 are reported as `Denied` so the session manager can decide whether to
/// re-authenticate. Any other non-success status is an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Authorized<T> {
    Granted(T),
    Denied(u16),
}

/// Authenticated remote store
#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
    /// Submit credentials; fails unless the response is a success and carries the session cookie
    async fn login(&self, credentials: &Credentials) -> SyncResult<SessionToken>;

    /// One page of rows in the requested order
    async fn list(&self, session: &SessionToken, query: &ListQuery) -> SyncResult<Authorized<ListPage>>;

    /// Create one row.
    ///
    /// A non-success status other than 401/403 is returned as `Err(SyncError::Transport)`.
    async fn submit(&self, session: &SessionToken, record: &Record) -> SyncResult<Authorized<Ack>>;

    /// Delete one row by identifier
    async fn delete(&self, session: &SessionToken, id: &str) -> SyncResult<Authorized<Ack>>;
}

/// Status codes that mean "the session is no longer valid"
pub fn is_auth_failure(status: u16) -> bool {
    status == 401 || status == 403
}
