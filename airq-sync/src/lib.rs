//! airq-sync library interface
//!
//! Exposes the pipeline for the binary and for integration testing.

pub mod error;
pub mod models;
pub mod services;
pub mod types;

pub use crate::error::{SyncError, SyncResult};
