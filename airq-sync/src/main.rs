//! airq-sync - hourly air-quality sync
//!
//! Subcommands:
//! - `audit`: check the remote store for gaps over a trailing window, optionally backfill
//! - `backfill`: fetch a local hour range from the source and upload it
//! - `fix`: delete and/or re-upload one hour
//! - `upload`: upload the latest publishable hour, or a prepared JSON record
//!
//! Logs go to stderr; `--json` output goes to stdout.
//! Exit codes: 0 success, 1 runtime failure, 2 invalid arguments or configuration.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use airq_common::config::{Credentials, SyncConfig};
use airq_common::time::{fixed_offset, parse_local_datetime, parse_local_hour};
use airq_common::HourBucket;
use anyhow::Context;
use chrono::{DateTime, FixedOffset, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry};

use airq_sync::error::{SyncError, SyncResult, EXIT_FAILURE, EXIT_OK, EXIT_USAGE};
use airq_sync::models::Record;
use airq_sync::services::{
    BackfillOrchestrator, ContinuityAuditor, FixMode, HttpRemoteStore, HttpSourceClient, PointFix,
    QualityGate, RangeFetcher, SessionManager, Uploader,
};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_HASH"),
    " ",
    env!("BUILD_TIMESTAMP"),
    " ",
    env!("BUILD_PROFILE"),
    ")"
);

/// Command-line arguments for airq-sync
#[derive(Parser, Debug)]
#[command(name = "airq-sync")]
#[command(about = "Sync hourly air-quality readings into the remote store and repair gaps")]
#[command(version, long_version = LONG_VERSION)]
struct Cli {
    /// Config file (overrides AIRQ_CONFIG and the platform default)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Audit continuity of the last N hours in the remote store
    Audit {
        /// Audit last N hours
        #[arg(long, default_value_t = 24)]
        hours: u32,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
        /// Run a backfill when hours are missing
        #[arg(long)]
        auto_backfill: bool,
        /// Hours to backfill (default: same as --hours)
        #[arg(long)]
        backfill_hours: Option<u32>,
        /// Auto-backfill without uploading
        #[arg(long)]
        backfill_dry_run: bool,
    },
    /// Fetch a local hour range from the source and upload it
    Backfill {
        /// Local start, e.g. "2026-01-11T00:00:00"
        #[arg(long, requires = "end", conflicts_with = "hours")]
        start: Option<String>,
        /// Local end (exclusive), e.g. "2026-01-11T12:00:00"
        #[arg(long, requires = "start")]
        end: Option<String>,
        /// Backfill the last N hours instead
        #[arg(long)]
        hours: Option<u32>,
        /// Only report what would be uploaded
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        json: bool,
    },
    /// Delete and/or re-upload one specific hour
    Fix {
        /// Local hour, e.g. "2026-01-11 05"
        #[arg(long)]
        hour: String,
        #[arg(long, value_enum, default_value_t = FixMode::DeleteThenReupload)]
        mode: FixMode,
        /// Print actions without deleting or uploading
        #[arg(long)]
        dry_run: bool,
        /// Latest rows searched for the target hour (default: fix.list_page_size)
        #[arg(long)]
        list_page_size: Option<u32>,
        #[arg(long)]
        json: bool,
    },
    /// Upload the latest publishable hour, or a prepared record
    Upload {
        /// JSON record to upload instead of fetching from the source
        #[arg(long)]
        payload: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter_handle = match init_tracing() {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("airq-sync: {:#}", e);
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let config = match SyncConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return ExitCode::from(EXIT_USAGE);
        }
    };
    apply_config_level(&filter_handle, &config.logging.level);

    // The clock is read once; every component receives this instant
    let now = airq_common::time::now();

    match run(cli.command, &config, now).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %e, "Operation failed");
            ExitCode::from(e.exit_code())
        }
    }
}

type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Stderr logging; `RUST_LOG` wins over the config file's level
fn init_tracing() -> anyhow::Result<FilterHandle> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter_layer, handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("Failed to initialize tracing")?;
    Ok(handle)
}

fn apply_config_level(handle: &FilterHandle, level: &str) {
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        return;
    }
    match EnvFilter::try_new(level) {
        Ok(filter) => {
            if let Err(e) = handle.reload(filter) {
                warn!(error = %e, "Could not apply logging.level");
            }
        }
        Err(e) => warn!(level, error = %e, "Ignoring invalid logging.level"),
    }
}

async fn run(command: Command, config: &SyncConfig, now: DateTime<Utc>) -> SyncResult<u8> {
    let offset = fixed_offset(config.source.utc_offset_hours)?;

    match command {
        Command::Audit {
            hours,
            json,
            auto_backfill,
            backfill_hours,
            backfill_dry_run,
        } => {
            let audit = AuditArgs {
                hours,
                json,
                auto_backfill,
                backfill_hours,
                backfill_dry_run,
            };
            run_audit(config, offset, now, audit).await
        }
        Command::Backfill {
            start,
            end,
            hours,
            dry_run,
            json,
        } => {
            let (start, end) = match (hours, start, end) {
                (Some(0), _, _) => return Err(usage("--hours must be > 0")),
                (Some(hours), _, _) => {
                    let end = HourBucket::floor_in(now, offset);
                    (end.shift_hours(-i64::from(hours))?.start(), end.start())
                }
                (None, Some(start), Some(end)) => (
                    parse_local_datetime(&start, offset)?,
                    parse_local_datetime(&end, offset)?,
                ),
                _ => {
                    return Err(usage(
                        "Please provide either --hours N or both --start and --end",
                    ))
                }
            };
            run_backfill(config, offset, now, start, end, dry_run, json).await
        }
        Command::Fix {
            hour,
            mode,
            dry_run,
            list_page_size,
            json,
        } => {
            let target = parse_local_hour(&hour, offset)?;
            let list_page_size = list_page_size.unwrap_or(config.fix.list_page_size);
            if list_page_size == 0 {
                return Err(usage("--list-page-size must be > 0"));
            }
            run_fix(config, offset, now, target, mode, dry_run, list_page_size, json).await
        }
        Command::Upload { payload, json } => {
            run_upload(config, offset, now, payload.as_deref(), json).await
        }
    }
}

struct AuditArgs {
    hours: u32,
    json: bool,
    auto_backfill: bool,
    backfill_hours: Option<u32>,
    backfill_dry_run: bool,
}

async fn run_audit(
    config: &SyncConfig,
    offset: FixedOffset,
    now: DateTime<Utc>,
    args: AuditArgs,
) -> SyncResult<u8> {
    if args.hours == 0 {
        return Err(usage("--hours must be > 0"));
    }
    let backfill_hours = args.backfill_hours.unwrap_or(args.hours);
    if args.auto_backfill && backfill_hours == 0 {
        return Err(usage("--backfill-hours must be > 0"));
    }

    let credentials = Credentials::from_env()?;
    let remote = HttpRemoteStore::from_config(&config.remote)?;
    let result = {
        let mut session = SessionManager::new(&remote, &credentials);
        ContinuityAuditor::from_config(&config.audit)
            .audit(&mut session, args.hours, now)
            .await?
    };

    if args.json {
        print_json(&result)?;
    }

    if result.is_continuous() {
        info!(status = "ok", hours = args.hours, "Continuity OK: the audited hours are complete");
        return Ok(EXIT_OK);
    }

    warn!(missing_count = result.missing_hours.len(), "Continuity FAIL");
    for hour in &result.missing_hours {
        warn!(utc = %hour, local = %hour.in_offset(offset), "Missing hour");
    }

    if !args.auto_backfill {
        return Ok(EXIT_FAILURE);
    }

    let end = HourBucket::floor_in(now, offset);
    let start = end.shift_hours(-i64::from(backfill_hours))?;
    warn!(
        start = %start,
        end = %end,
        dry_run = args.backfill_dry_run,
        "Auto-backfill enabled"
    );
    let code = run_backfill(
        config,
        offset,
        now,
        start.start(),
        end.start(),
        args.backfill_dry_run,
        false,
    )
    .await?;
    if code == EXIT_OK {
        info!(status = "ok", "Auto-backfill finished successfully");
    } else {
        error!(code, "Auto-backfill finished with failures");
    }
    Ok(code)
}

async fn run_backfill(
    config: &SyncConfig,
    offset: FixedOffset,
    now: DateTime<Utc>,
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
    dry_run: bool,
    json: bool,
) -> SyncResult<u8> {
    let source = HttpSourceClient::from_config(&config.source)?;
    let fetcher = RangeFetcher::new(&source, QualityGate::from_config(&config.source), offset);

    // A dry run never reaches the remote store, so it needs no credentials
    let summary = if dry_run {
        BackfillOrchestrator::<_, HttpRemoteStore>::dry_run_only(fetcher)
            .run(start, end, now, true)
            .await?
    } else {
        let credentials = Credentials::from_env()?;
        let remote = HttpRemoteStore::from_config(&config.remote)?;
        BackfillOrchestrator::new(
            fetcher,
            Uploader::from_config(&remote, &credentials, &config.remote),
        )
        .run(start, end, now, false)
        .await?
    };

    if json {
        print_json(&summary)?;
    }
    Ok(if summary.is_success() { EXIT_OK } else { EXIT_FAILURE })
}

#[allow(clippy::too_many_arguments)]
async fn run_fix(
    config: &SyncConfig,
    offset: FixedOffset,
    now: DateTime<Utc>,
    target: HourBucket,
    mode: FixMode,
    dry_run: bool,
    list_page_size: u32,
    json: bool,
) -> SyncResult<u8> {
    let credentials = Credentials::from_env()?;
    let source = HttpSourceClient::from_config(&config.source)?;
    let remote = HttpRemoteStore::from_config(&config.remote)?;

    let fix = PointFix::new(
        RangeFetcher::new(&source, QualityGate::from_config(&config.source), offset),
        Uploader::from_config(&remote, &credentials, &config.remote),
        &remote,
        &credentials,
    )
    .with_list_page_size(list_page_size);
    let report = fix.run(target, mode, dry_run, now).await?;

    if json {
        print_json(&report)?;
    } else if dry_run {
        print_json(&report.payload)?;
    }
    Ok(if report.is_success() { EXIT_OK } else { EXIT_FAILURE })
}

async fn run_upload(
    config: &SyncConfig,
    offset: FixedOffset,
    now: DateTime<Utc>,
    payload: Option<&Path>,
    json: bool,
) -> SyncResult<u8> {
    let credentials = Credentials::from_env()?;
    let remote = HttpRemoteStore::from_config(&config.remote)?;

    let record = match payload {
        Some(path) => read_payload(path)?,
        None => {
            let source = HttpSourceClient::from_config(&config.source)?;
            let gate = QualityGate::from_config(&config.source);
            let target = gate.latest_publishable(now, &HourBucket::floor_in(now, offset));
            RangeFetcher::new(&source, gate, offset)
                .fetch_hour(target, now)
                .await?
                .into_iter()
                .next()
                .ok_or(SyncError::NoSourceData(target))?
        }
    };
    info!(detected_at = %record.hour.detected_at_utc(), "Prepared payload");

    let outcome = Uploader::from_config(&remote, &credentials, &config.remote)
        .upload(&record)
        .await?;
    if json {
        print_json(&outcome)?;
    }
    Ok(if outcome.is_ok() { EXIT_OK } else { EXIT_FAILURE })
}

fn read_payload(path: &Path) -> SyncResult<Record> {
    let content = std::fs::read_to_string(path).map_err(airq_common::Error::from)?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| SyncError::Validation(format!("{}: not valid JSON: {}", path.display(), e)))?;
    Record::from_json(&value)
}

fn print_json<T: Serialize>(value: &T) -> SyncResult<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| SyncError::Schema(format!("could not serialize output: {}", e)))?;
    println!("{}", text);
    Ok(())
}

fn usage(message: &str) -> SyncError {
    airq_common::Error::InvalidInput(message.to_string()).into()
}
