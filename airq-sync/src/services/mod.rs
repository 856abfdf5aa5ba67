//! Pipeline services
//!
//! Leaves first: quality gate, source range fetcher, session manager, then the operations
//! built on them (continuity audit, dedup-safe upload, backfill, point-fix). The two HTTP
//! clients implement the collaborator traits in [`crate::types`].

pub mod auditor;
pub mod backfill;
pub mod point_fix;
pub mod quality_gate;
pub mod range_fetcher;
pub mod remote_client;
pub mod session;
pub mod source_client;
pub mod uploader;

#[cfg(test)]
pub mod test_support;

pub use auditor::ContinuityAuditor;
pub use backfill::BackfillOrchestrator;
pub use point_fix::{FixMode, PointFix, PointFixReport};
pub use quality_gate::{GateVerdict, QcFlag, QualityGate};
pub use range_fetcher::{RangeFetch, RangeFetcher, RangeMeta, RejectedHour};
pub use remote_client::HttpRemoteStore;
pub use session::{SessionManager, SessionState};
pub use source_client::HttpSourceClient;
pub use uploader::Uploader;
