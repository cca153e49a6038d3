//! Rolling file logs for the engine process.
//!
//! # Responsibility
//! - Start the `flexi_logger` backend from `EngineConfig` once per process.
//! - Route panics (including swallowed observer panics) into the log.
//!
//! # Invariants
//! - A second start with the same settings is a no-op; different settings
//!   are rejected.
//! - Events are `key=value` metadata; variable values and block content are
//!   never logged.

use crate::config::EngineConfig;
use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::{error, info};
use once_cell::sync::OnceCell;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "varcascade";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LOG_FILES: usize = 5;
const MAX_PANIC_PAYLOAD_CHARS: usize = 160;

static ACTIVE: OnceCell<ActiveLogger> = OnceCell::new();

struct ActiveLogger {
    level: &'static str,
    log_dir: PathBuf,
    _handle: LoggerHandle,
}

#[derive(Debug)]
pub enum LoggingError {
    UnsupportedLevel(String),
    CreateDir { path: PathBuf, source: std::io::Error },
    Backend(String),
    AlreadyStarted { setting: &'static str, active: String, requested: String },
}

impl Display for LoggingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedLevel(level) => write!(
                f,
                "unsupported log level `{level}`; expected trace|debug|info|warn|error"
            ),
            Self::CreateDir { path, source } => {
                write!(f, "failed to create log directory `{}`: {source}", path.display())
            }
            Self::Backend(message) => write!(f, "failed to start logger: {message}"),
            Self::AlreadyStarted {
                setting,
                active,
                requested,
            } => write!(
                f,
                "logging already started with {setting} `{active}`; refusing `{requested}`"
            ),
        }
    }
}

impl Error for LoggingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::CreateDir { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Starts file logging when `config.log_dir` is set.
///
/// Returns `Ok(false)` when no directory is configured and logging stays off.
pub fn init_logging_from_config(config: &EngineConfig) -> Result<bool, LoggingError> {
    let Some(dir) = config.log_dir.as_deref() else {
        return Ok(false);
    };
    let level = match config.log_level.as_deref() {
        Some(raw) => parse_level(raw)?,
        None => build_default_level(),
    };
    start(level, dir)?;
    Ok(true)
}

fn start(level: &'static str, dir: &Path) -> Result<(), LoggingError> {
    let active = ACTIVE.get_or_try_init(|| -> Result<ActiveLogger, LoggingError> {
        std::fs::create_dir_all(dir).map_err(|source| LoggingError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;

        let handle = Logger::try_with_str(level)
            .map_err(|err| LoggingError::Backend(err.to_string()))?
            .log_to_file(
                FileSpec::default()
                    .directory(dir)
                    .basename(LOG_FILE_BASENAME),
            )
            .rotate(
                Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
                Naming::Numbers,
                Cleanup::KeepLogFiles(MAX_LOG_FILES),
            )
            .write_mode(WriteMode::BufferAndFlush)
            .append()
            .format_for_files(flexi_logger::detailed_format)
            .start()
            .map_err(|err| LoggingError::Backend(err.to_string()))?;

        install_panic_hook();
        info!(
            "event=engine_start module=core status=ok version={} level={} log_dir={}",
            env!("CARGO_PKG_VERSION"),
            level,
            dir.display()
        );

        Ok(ActiveLogger {
            level,
            log_dir: dir.to_path_buf(),
            _handle: handle,
        })
    })?;

    if active.log_dir != dir {
        return Err(LoggingError::AlreadyStarted {
            setting: "log_dir",
            active: active.log_dir.display().to_string(),
            requested: dir.display().to_string(),
        });
    }
    if active.level != level {
        return Err(LoggingError::AlreadyStarted {
            setting: "level",
            active: active.level.to_string(),
            requested: level.to_string(),
        });
    }
    Ok(())
}

fn parse_level(raw: &str) -> Result<&'static str, LoggingError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        other => Err(LoggingError::UnsupportedLevel(other.to_string())),
    }
}

fn build_default_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = if let Some(message) = info.payload().downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = info.payload().downcast_ref::<String>() {
            message.clone()
        } else {
            "non-string panic payload".to_string()
        };
        error!(
            "event=panic_captured module=core status=error location={} payload={}",
            location,
            single_line(&payload, MAX_PANIC_PAYLOAD_CHARS)
        );
        previous(info);
    }));
}

/// Flattens newlines and caps length so one panic stays one log line.
fn single_line(value: &str, max_chars: usize) -> String {
    let flattened = value.replace(['\n', '\r'], " ");
    let mut capped: String = flattened.chars().take(max_chars).collect();
    if flattened.chars().count() > max_chars {
        capped.push_str("...");
    }
    capped
}

#[cfg(test)]
mod tests {
    use super::{init_logging_from_config, parse_level, single_line, LoggingError};
    use crate::config::EngineConfig;

    #[test]
    fn parse_level_accepts_aliases_and_rejects_unknown() {
        assert_eq!(parse_level(" WARNING ").unwrap(), "warn");
        assert_eq!(parse_level("Info").unwrap(), "info");
        assert!(matches!(
            parse_level("verbose").unwrap_err(),
            LoggingError::UnsupportedLevel(level) if level == "verbose"
        ));
    }

    #[test]
    fn single_line_flattens_and_caps() {
        let line = single_line("first\nsecond\rthird", 8);
        assert_eq!(line, "first se...");
    }

    #[test]
    fn config_without_log_dir_leaves_logging_off() {
        assert!(!init_logging_from_config(&EngineConfig::default()).unwrap());
    }

    #[test]
    fn repeated_start_is_idempotent_and_conflicts_are_rejected() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            log_dir: Some(first.path().to_path_buf()),
            log_level: Some("info".to_string()),
            ..EngineConfig::default()
        };

        assert!(init_logging_from_config(&config).unwrap());
        assert!(init_logging_from_config(&config).unwrap());

        let louder = EngineConfig {
            log_level: Some("debug".to_string()),
            ..config.clone()
        };
        assert!(matches!(
            init_logging_from_config(&louder).unwrap_err(),
            LoggingError::AlreadyStarted { setting: "level", .. }
        ));

        let moved = EngineConfig {
            log_dir: Some(second.path().to_path_buf()),
            ..config
        };
        assert!(matches!(
            init_logging_from_config(&moved).unwrap_err(),
            LoggingError::AlreadyStarted { setting: "log_dir", .. }
        ));
    }
}
