//! Embeds build identification for `airq-sync --version`
//!
//! - `GIT_HASH`: short commit, `-dirty` when tracked files are modified. `AIRQ_GIT_HASH`
//!   overrides it for builds outside a checkout.
//! - `BUILD_TIMESTAMP`: UTC, taken from `SOURCE_DATE_EPOCH` when set so packaged builds
//!   are reproducible.
//! - `BUILD_PROFILE`: cargo profile.

use chrono::{DateTime, SecondsFormat, Utc};
use std::process::Command;

/// Trimmed stdout of a successful, non-empty git call
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn git_hash() -> String {
    if let Ok(hash) = std::env::var("AIRQ_GIT_HASH") {
        return hash;
    }
    match git(&["rev-parse", "--short=8", "HEAD"]) {
        Some(hash) if git(&["status", "--porcelain", "--untracked-files=no"]).is_some() => {
            format!("{}-dirty", hash)
        }
        Some(hash) => hash,
        None => "unknown".to_string(),
    }
}

fn build_timestamp() -> String {
    std::env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|secs| secs.trim().parse::<i64>().ok())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn main() {
    // No rerun-if directives: cargo reruns this whenever the package changes
    println!("cargo:rustc-env=GIT_HASH={}", git_hash());
    println!("cargo:rustc-env=BUILD_TIMESTAMP={}", build_timestamp());
    println!(
        "cargo:rustc-env=BUILD_PROFILE={}",
        std::env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string())
    );
}
