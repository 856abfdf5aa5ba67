//! # airq common library
//!
//! Shared code for the air-quality sync tooling:
//! - Error type
//! - Configuration and credential loading
//! - Hour bucket and timestamp utilities

pub mod config;
pub mod error;
pub mod time;

pub use error::{Error, Result};
pub use time::HourBucket;
