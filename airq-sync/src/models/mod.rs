//! Data models for airq-sync
//!
//! - record: normalized hourly readings and raw upstream rows
//! - remote: remote-store wire types
//! - outcome: upload, audit and backfill results

pub mod outcome;
pub mod record;
pub mod remote;

pub use outcome::{AuditMeta, AuditResult, BackfillSummary, UploadOutcome};
pub use record::{Pollutant, RawSourceRow, Readings, Record};
pub use remote::{Ack, ListPage, ListQuery, RemoteRow, RemoteRowRef};
