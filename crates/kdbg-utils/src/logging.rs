//! # Logging Utilities
//!
//! Logging bootstrap for the kdbg tools using `tracing`.
//!
//! Command reports go to stdout, so every log line goes somewhere else:
//! stderr for the console layer, and optionally a file.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kdbg_utils::init_logging;
//!
//! // Keep the guard alive until exit so buffered file output is flushed
//! let _guard = init_logging(None).expect("Failed to initialize logging");
//!
//! tracing::info!("snapshot loaded");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: filter directives (e.g. `RUST_LOG=debug`, `RUST_LOG=kdbg_core::heap=debug`)
//! - `KDBG_LOG_FORMAT`: console format (`json` or `pretty`, default: `pretty`)
//! - `KDBG_LOG_FILE`: also write logs to this file (rotated daily)
//!
//! ## File-only mode
//!
//! When stdout carries machine-readable output and stderr is not wanted either,
//! [`init_logging_to_file`] writes JSON logs to a dated file only:
//!
//! ```rust,no_run
//! use kdbg_utils::{LogLevel, init_logging_to_file};
//!
//! let (path, _guard) = init_logging_to_file(None, Some(LogLevel::Debug)).expect("Failed to initialize logging");
//! eprintln!("logging to {}", path.display());
//! ```

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, fs, io};

use chrono::{NaiveDate, Utc};
use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Environment variable selecting the console format
pub const FORMAT_ENV: &str = "KDBG_LOG_FORMAT";

/// Environment variable naming an additional log file
pub const FILE_ENV: &str = "KDBG_LOG_FILE";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat
{
    /// Pretty-printed, human-readable format
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(format!("{s}. Use 'pretty' or 'json'"))),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    /// Error level
    Error,
    /// Warning level (default)
    Warn,
    /// Info level
    Info,
    /// Debug level
    Debug,
    /// Trace level (most verbose)
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLevel(format!(
                "{s}. Use 'error', 'warn', 'info', 'debug', or 'trace'"
            ))),
        }
    }
}

/// Keeps the background file writer alive; dropping it flushes pending lines
#[derive(Debug)]
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard
{
    _file: Option<WorkerGuard>,
}

/// Initialize console logging on stderr, plus a file when `KDBG_LOG_FILE` is set
///
/// `explicit_level` (from a `--log-level` flag) takes precedence over
/// `RUST_LOG`; without either, only warnings and errors are shown so the
/// console stays quiet during normal use.
///
/// ## Errors
///
/// Returns an error if:
/// - Logging is already initialized
/// - `KDBG_LOG_FORMAT` holds an unknown format
/// - The log file cannot be created
pub fn init_logging(explicit_level: Option<LogLevel>) -> Result<LoggingGuard, LoggingError>
{
    let format = match env::var(FORMAT_ENV) {
        Ok(value) => value.parse()?,
        Err(_) => LogFormat::default(),
    };
    let rust_log = env::var("RUST_LOG").ok();
    let file = env::var(FILE_ENV).ok().map(PathBuf::from);

    let mut layers: Vec<BoxedLayer> = vec![console_layer(format, build_filter(explicit_level, rust_log.as_deref()))];
    let mut guard = None;
    if let Some(path) = file {
        let (writer, file_guard) = file_writer(&path, Rotation::DAILY)?;
        layers.push(file_layer(format, writer, build_filter(explicit_level, rust_log.as_deref())));
        guard = Some(file_guard);
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;
    Ok(LoggingGuard { _file: guard })
}

/// Initialize file-only JSON logging into a dated file
///
/// The file is `<dir>/YYYY-MM-DD-kdbg.log`. Without `dir`, it goes to
/// `~/.kdbg/`, or the system temp directory when `HOME` is unset.
///
/// ## Errors
///
/// Returns an error if logging is already initialized or the file cannot be
/// created.
pub fn init_logging_to_file(
    dir: Option<&Path>,
    explicit_level: Option<LogLevel>,
) -> Result<(PathBuf, LoggingGuard), LoggingError>
{
    let dir = match dir {
        Some(dir) => dir.to_path_buf(),
        None => default_log_dir(),
    };
    let path = dated_log_path(&dir, Utc::now().date_naive());

    let rust_log = env::var("RUST_LOG").ok();
    let (writer, guard) = file_writer(&path, Rotation::NEVER)?;
    let layer = file_layer(LogFormat::Json, writer, build_filter(explicit_level, rust_log.as_deref()));

    Registry::default()
        .with(layer)
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;
    Ok((path, LoggingGuard { _file: Some(guard) }))
}

/// Build the event filter
///
/// Priority:
/// 1. An explicit level from the command line
/// 2. `RUST_LOG` directives, when they parse
/// 3. `warn`
pub fn build_filter(explicit_level: Option<LogLevel>, rust_log: Option<&str>) -> EnvFilter
{
    if let Some(level) = explicit_level {
        return EnvFilter::new(Level::from(level).to_string());
    }
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(Level::WARN.to_string()))
}

/// `<dir>/YYYY-MM-DD-kdbg.log`
pub fn dated_log_path(dir: &Path, date: NaiveDate) -> PathBuf
{
    dir.join(format!("{}-kdbg.log", date.format("%Y-%m-%d")))
}

fn default_log_dir() -> PathBuf
{
    match env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".kdbg"),
        Err(_) => env::temp_dir(),
    }
}

fn file_writer(path: &Path, rotation: Rotation) -> Result<(NonBlocking, WorkerGuard), LoggingError>
{
    let dir = path.parent().filter(|dir| !dir.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| LoggingError::InitializationFailed(format!("{} has no file name", path.display())))?;
    fs::create_dir_all(dir)?;

    let appender = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(name)
        .build(dir)
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;
    Ok(tracing_appender::non_blocking(appender))
}

fn console_layer(format: LogFormat, filter: EnvFilter) -> BoxedLayer
{
    let ansi = io::stderr().is_terminal();
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(ansi)
            .with_writer(io::stderr)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(io::stderr)
            .with_filter(filter)
            .boxed(),
    }
}

fn file_layer(format: LogFormat, writer: NonBlocking, filter: EnvFilter) -> BoxedLayer
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(false) // No ANSI in files
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(filter)
            .boxed(),
    }
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Invalid log format: {0}")]
    InvalidFormat(String),

    /// Invalid log level
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    /// Failed to initialize logging
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// File logging error
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_log_format_from_str()
    {
        assert_eq!(LogFormat::from_str("pretty").unwrap(), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("JSON").unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::from_str("text").unwrap(), LogFormat::Pretty);
        assert!(matches!(LogFormat::from_str("xml"), Err(LoggingError::InvalidFormat(_))));
    }

    #[test]
    fn test_log_level_from_str()
    {
        assert_eq!(LogLevel::from_str("error").unwrap(), LogLevel::Error);
        assert_eq!(LogLevel::from_str("warning").unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::from_str("info").unwrap(), LogLevel::Info);
        assert_eq!(LogLevel::from_str("dbg").unwrap(), LogLevel::Debug);
        assert_eq!(LogLevel::from_str("trace").unwrap(), LogLevel::Trace);
        assert!(matches!(LogLevel::from_str("loud"), Err(LoggingError::InvalidLevel(_))));
    }

    #[test]
    fn test_log_level_to_tracing_level()
    {
        assert_eq!(Level::from(LogLevel::Error), Level::ERROR);
        assert_eq!(Level::from(LogLevel::Warn), Level::WARN);
        assert_eq!(Level::from(LogLevel::Info), Level::INFO);
        assert_eq!(Level::from(LogLevel::Debug), Level::DEBUG);
        assert_eq!(Level::from(LogLevel::Trace), Level::TRACE);
    }

    #[test]
    fn test_filter_priority()
    {
        let shown = |filter: EnvFilter| filter.to_string().to_lowercase();
        assert_eq!(shown(build_filter(Some(LogLevel::Debug), Some("error"))), "debug");
        assert_eq!(shown(build_filter(None, Some("kdbg_core=trace"))), "kdbg_core=trace");
        assert_eq!(shown(build_filter(None, None)), "warn");
    }

    #[test]
    fn test_dated_log_path()
    {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(
            dated_log_path(Path::new("/var/log"), date),
            PathBuf::from("/var/log/2024-03-09-kdbg.log")
        );
    }
}
