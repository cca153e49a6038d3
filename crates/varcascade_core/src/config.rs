//! Engine configuration.
//!
//! # Responsibility
//! - Hold tunables for cascade retry/retention, history paging and storage.
//! - Load overrides from `VARCASCADE_*` environment variables.
//!
//! # Invariants
//! - A config returned by `from_env`/`from_lookup` has passed `validate()`.
//! - Blank environment values are treated as unset.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

const ENV_PREFIX: &str = "VARCASCADE_";
const DEFAULT_DB_FILE_NAME: &str = "varcascade.sqlite3";

pub const DEFAULT_RETENTION_DAYS: u32 = 90;
pub const DEFAULT_RETRY_WINDOW_HOURS: u32 = 24;
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;
pub const HISTORY_LIMIT_MAX: u32 = 500;

/// Configuration error raised while loading or validating settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Environment value cannot be parsed into the field type.
    InvalidValue { key: String, value: String },
    /// Parsed value is outside the accepted range.
    OutOfRange { field: &'static str, reason: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { key, value } => write!(f, "invalid value `{value}` for {key}"),
            Self::OutOfRange { field, reason } => write!(f, "invalid `{field}`: {reason}"),
        }
    }
}

impl Error for ConfigError {}

/// Runtime settings of the cascade engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// SQLite file path. `None` falls back to the temp directory.
    pub db_path: Option<PathBuf>,
    pub log_level: Option<String>,
    /// Absolute directory for rolling log files; logging stays off when unset.
    pub log_dir: Option<PathBuf>,
    /// Terminal cascade entries older than this are deleted.
    pub retention_days: u32,
    /// Failed entries updated within this window are re-queued by the sweep.
    pub retry_window_hours: u32,
    pub retry_sweep_interval_secs: u64,
    pub retention_sweep_interval_secs: u64,
    pub busy_timeout_ms: u64,
    /// Drain the cascade queue inside `change_master_default`.
    pub auto_drain: bool,
    pub history_default_limit: u32,
    pub history_max_limit: u32,
    /// Surfaces listed on `external_platform` tasks.
    pub external_platforms: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            log_level: None,
            log_dir: None,
            retention_days: DEFAULT_RETENTION_DAYS,
            retry_window_hours: DEFAULT_RETRY_WINDOW_HOURS,
            retry_sweep_interval_secs: 60 * 60,
            retention_sweep_interval_secs: 24 * 60 * 60,
            busy_timeout_ms: 5_000,
            auto_drain: true,
            history_default_limit: DEFAULT_HISTORY_LIMIT,
            history_max_limit: HISTORY_LIMIT_MAX,
            external_platforms: default_external_platforms(),
        }
    }
}

impl EngineConfig {
    /// Loads defaults overridden by `VARCASCADE_*` process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads defaults overridden by `lookup`, keyed by full variable name.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |name: &str| -> Option<(String, String)> {
            let key = format!("{ENV_PREFIX}{name}");
            let raw = lookup(&key)?;
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return None;
            }
            Some((key, trimmed.to_string()))
        };

        let mut config = Self::default();
        if let Some((_, value)) = read("DB_PATH") {
            config.db_path = Some(PathBuf::from(value));
        }
        if let Some((_, value)) = read("LOG_LEVEL") {
            config.log_level = Some(value);
        }
        if let Some((_, value)) = read("LOG_DIR") {
            config.log_dir = Some(PathBuf::from(value));
        }
        if let Some(entry) = read("RETENTION_DAYS") {
            config.retention_days = parse_number(entry)?;
        }
        if let Some(entry) = read("RETRY_WINDOW_HOURS") {
            config.retry_window_hours = parse_number(entry)?;
        }
        if let Some(entry) = read("RETRY_SWEEP_INTERVAL_SECS") {
            config.retry_sweep_interval_secs = parse_number(entry)?;
        }
        if let Some(entry) = read("RETENTION_SWEEP_INTERVAL_SECS") {
            config.retention_sweep_interval_secs = parse_number(entry)?;
        }
        if let Some(entry) = read("BUSY_TIMEOUT_MS") {
            config.busy_timeout_ms = parse_number(entry)?;
        }
        if let Some(entry) = read("AUTO_DRAIN") {
            config.auto_drain = parse_flag(entry)?;
        }
        if let Some(entry) = read("HISTORY_DEFAULT_LIMIT") {
            config.history_default_limit = parse_number(entry)?;
        }
        if let Some(entry) = read("HISTORY_MAX_LIMIT") {
            config.history_max_limit = parse_number(entry)?;
        }
        if let Some((_, value)) = read("EXTERNAL_PLATFORMS") {
            config.external_platforms = value
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retention_days == 0 {
            return Err(out_of_range("retention_days", "must be at least 1 day"));
        }
        if self.retry_window_hours == 0 {
            return Err(out_of_range("retry_window_hours", "must be at least 1 hour"));
        }
        if self.retry_sweep_interval_secs == 0 {
            return Err(out_of_range("retry_sweep_interval_secs", "must be positive"));
        }
        if self.retention_sweep_interval_secs == 0 {
            return Err(out_of_range("retention_sweep_interval_secs", "must be positive"));
        }
        if self.history_max_limit == 0 {
            return Err(out_of_range("history_max_limit", "must be positive"));
        }
        if self.history_default_limit == 0 || self.history_default_limit > self.history_max_limit
        {
            return Err(out_of_range(
                "history_default_limit",
                format!("must be within 1..={}", self.history_max_limit),
            ));
        }
        if self.external_platforms.is_empty() {
            return Err(out_of_range("external_platforms", "needs at least one platform"));
        }
        if let Some(dir) = &self.log_dir {
            if !dir.is_absolute() {
                return Err(out_of_range("log_dir", "must be an absolute path"));
            }
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Resolved database path, falling back to the temp directory.
    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_DB_FILE_NAME))
    }

    /// Clamps a requested history page size.
    ///
    /// `None` and `Some(0)` fall back to the default limit.
    pub fn normalize_history_limit(&self, limit: Option<u32>) -> u32 {
        match limit {
            Some(0) | None => self.history_default_limit,
            Some(value) if value > self.history_max_limit => self.history_max_limit,
            Some(value) => value,
        }
    }
}

pub fn default_external_platforms() -> Vec<String> {
    ["client_portal", "public_website", "partner_feed"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn parse_number<T: std::str::FromStr>((key, value): (String, String)) -> Result<T, ConfigError> {
    value
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}

fn parse_flag((key, value): (String, String)) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue { key, value }),
    }
}

fn out_of_range(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::OutOfRange {
        field,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, EngineConfig};
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.retention_days, 90);
        assert_eq!(config.retry_window_hours, 24);
        assert!(config.auto_drain);
        assert_eq!(
            config.external_platforms,
            vec!["client_portal", "public_website", "partner_feed"]
        );
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("VARCASCADE_RETENTION_DAYS", "30"),
            ("VARCASCADE_AUTO_DRAIN", "off"),
            ("VARCASCADE_EXTERNAL_PLATFORMS", "portal, , feed"),
            ("VARCASCADE_DB_PATH", "  "),
        ]))
        .unwrap();
        assert_eq!(config.retention_days, 30);
        assert!(!config.auto_drain);
        assert_eq!(config.external_platforms, vec!["portal", "feed"]);
        assert_eq!(config.db_path, None);
    }

    #[test]
    fn unparsable_values_name_the_variable() {
        let err = EngineConfig::from_lookup(lookup_from(&[("VARCASCADE_BUSY_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "VARCASCADE_BUSY_TIMEOUT_MS".to_string(),
                value: "soon".to_string(),
            }
        );
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let err = EngineConfig::from_lookup(lookup_from(&[("VARCASCADE_RETENTION_DAYS", "0")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OutOfRange {
                field: "retention_days",
                ..
            }
        ));

        let err =
            EngineConfig::from_lookup(lookup_from(&[("VARCASCADE_HISTORY_DEFAULT_LIMIT", "900")]))
                .unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { .. }));
    }

    #[test]
    fn history_limit_is_clamped() {
        let config = EngineConfig::default();
        assert_eq!(config.normalize_history_limit(None), 50);
        assert_eq!(config.normalize_history_limit(Some(0)), 50);
        assert_eq!(config.normalize_history_limit(Some(20)), 20);
        assert_eq!(config.normalize_history_limit(Some(10_000)), 500);
    }
}
