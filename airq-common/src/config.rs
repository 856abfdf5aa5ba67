//! Configuration loading and credential resolution
//!
//! Config file resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. `AIRQ_CONFIG` environment variable
//! 3. `<platform config dir>/airq/config.toml`
//! 4. Compiled defaults (fallback)
//!
//! A missing file is not an error: the tool logs a warning and runs on defaults.
//! Credentials never come from the file, only from the environment.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "AIRQ_CONFIG";
/// Remote-store account
pub const ACCOUNT_ENV_VAR: &str = "METEO_ACCOUNT";
/// Remote-store password
pub const PASSWORD_ENV_VAR: &str = "METEO_PASSWORD";

/// Top-level configuration (`config.toml`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub remote: RemoteConfig,
    pub source: SourceConfig,
    pub audit: AuditConfig,
    pub fix: FixConfig,
    pub logging: LoggingConfig,
}

/// Authenticated remote store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Most-recent rows checked before each upload
    pub dedup_lookback_rows: u32,
    /// Rows re-read after a successful upload to locate the created row
    pub confirm_rows: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://meteo.local2.tempestdigi.com".to_string(),
            timeout_secs: 20,
            dedup_lookback_rows: 24,
            confirm_rows: 5,
        }
    }
}

/// What the quality gate does with a negative pollutant value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NegativePolicy {
    /// Replace the value with absence and keep the record
    #[default]
    Nullify,
    /// Discard the whole record
    RejectRecord,
}

/// Unauthenticated upstream source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Offset of the source's local reporting time, hours east of UTC
    pub utc_offset_hours: i32,
    /// Hours before the source is expected to have finalized an hour
    pub publication_lag_hours: u32,
    pub negative_policy: NegativePolicy,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://tortoise-fluent-rationally.ngrok-free.app".to_string(),
            timeout_secs: 20,
            utc_offset_hours: 8,
            publication_lag_hours: 1,
            negative_policy: NegativePolicy::Nullify,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub page_size: u32,
    pub max_pages: u32,
    /// Extra rows fetched beyond the window length
    pub buffer_rows: u32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            page_size: 200,
            max_pages: 10,
            buffer_rows: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixConfig {
    /// Recent rows searched for the row to delete
    pub list_page_size: u32,
}

impl Default for FixConfig {
    fn default() -> Self {
        Self { list_page_size: 200 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl SyncConfig {
    /// Resolve and load the configuration file
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_path) {
            Some(path) if path.exists() => Self::from_file(&path),
            Some(path) => {
                // An explicitly requested file must exist
                if cli_path.is_some() || std::env::var_os(CONFIG_ENV_VAR).is_some() {
                    return Err(Error::Config(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                warn!(path = %path.display(), "No config file found, using defaults");
                Ok(Self::default())
            }
            None => {
                warn!("Could not determine config directory, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Parse a specific TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content).map_err(|e| match e {
            Error::TomlParse { message, .. } => Error::TomlParse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })?;
        debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::TomlParse {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the pipeline meaningless
    pub fn validate(&self) -> Result<()> {
        if self.remote.timeout_secs == 0 || self.source.timeout_secs == 0 {
            return Err(Error::Config("timeout_secs must be > 0".to_string()));
        }
        if self.remote.dedup_lookback_rows == 0 {
            return Err(Error::Config("remote.dedup_lookback_rows must be > 0".to_string()));
        }
        if self.audit.page_size == 0 || self.audit.max_pages == 0 {
            return Err(Error::Config("audit.page_size and audit.max_pages must be > 0".to_string()));
        }
        if self.fix.list_page_size == 0 {
            return Err(Error::Config("fix.list_page_size must be > 0".to_string()));
        }
        if !(-12..=14).contains(&self.source.utc_offset_hours) {
            return Err(Error::Config(format!(
                "source.utc_offset_hours out of range: {}",
                self.source.utc_offset_hours
            )));
        }
        Ok(())
    }
}

/// Config file path following the priority order in the module docs
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    dirs::config_dir().map(|d| d.join("airq").join("config.toml"))
}

/// Remote-store credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub account: String,
    pub password: String,
}

impl Credentials {
    pub fn new(account: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            password: password.into(),
        }
    }

    /// Read `METEO_ACCOUNT` / `METEO_PASSWORD`; blank counts as missing
    pub fn from_env() -> Result<Self> {
        let account = std::env::var(ACCOUNT_ENV_VAR).unwrap_or_default();
        let password = std::env::var(PASSWORD_ENV_VAR).unwrap_or_default();
        let creds = Self::new(account.trim(), password.trim());
        if !creds.is_complete() {
            return Err(Error::Config(format!(
                "Missing {} or {} in environment variables",
                ACCOUNT_ENV_VAR, PASSWORD_ENV_VAR
            )));
        }
        Ok(creds)
    }

    pub fn is_complete(&self) -> bool {
        !self.account.trim().is_empty() && !self.password.trim().is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account", &self.account)
            .field("password", &"<redacted>")
            .finish()
    }
}
