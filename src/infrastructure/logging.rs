//! Logging system configuration and initialization
//!
//! This module provides the logging setup for a sweep run:
//! - Console output and optional file output (non-blocking writer)
//! - Existing log file rotated to a timestamped name on start
//! - Old log files pruned to `max_files`
//! - Structured JSON logging (optional)
//! - Local-time timestamps

use std::io::Stdout;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use tracing::{Subscriber, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{
        self,
        format::{DefaultFields, Format, Full},
        time::FormatTime,
    },
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

pub use crate::infrastructure::config::LoggingConfig;

// Global guard to keep the log file writer alive
static LOG_GUARDS: Lazy<Mutex<Vec<WorkerGuard>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Dependency targets that are noisy below TRACE
const QUIET_TARGETS: &[(&str, &str)] = &[
    ("reqwest", "info"),
    ("hyper", "warn"),
    ("hyper_util", "warn"),
    ("h2", "warn"),
    ("html5ever", "warn"),
    ("selectors", "warn"),
    ("tokio", "info"),
];

/// Local timezone timestamps with milliseconds
struct LocalTimeFormatter;

impl FormatTime for LocalTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f %:z"))
    }
}

type ConsoleLayer<S> = fmt::Layer<S, DefaultFields, Format<Full, LocalTimeFormatter>, fn() -> Stdout>;

/// Stdout layer, built per subscriber stack it is attached to
fn console_layer<S>() -> ConsoleLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::Layer::new()
        .with_writer(std::io::stdout as fn() -> Stdout)
        .with_timer(LocalTimeFormatter)
        .with_target(false)
}

/// Log directory: configured, or `logs/` next to the executable
#[must_use]
pub fn get_log_directory(config: &LoggingConfig) -> PathBuf {
    if let Some(dir) = &config.directory {
        return dir.clone();
    }
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_default()
        .join("logs")
}

/// Initialize the logging system with default configuration
pub fn init_logging() -> Result<()> {
    init_logging_with_config(&LoggingConfig::default())
}

/// Builds the filter: `RUST_LOG` wins, otherwise the configured level with
/// dependency targets quieted unless TRACE was requested.
pub fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut filter = EnvFilter::try_new(&config.level)
        .with_context(|| format!("Invalid log level '{}'", config.level))?;

    if !config.level.to_lowercase().contains("trace") {
        for (target, level) in QUIET_TARGETS {
            filter = filter.add_directive(format!("{target}={level}").parse()?);
        }
    }
    for (target, level) in &config.module_filters {
        filter = filter.add_directive(
            format!("{target}={level}")
                .parse()
                .with_context(|| format!("Invalid module filter {target}={level}"))?,
        );
    }

    Ok(filter)
}

/// Initialize logging with custom configuration
///
/// # Environment Variable Override
/// ```bash
/// # Show detailed HTTP logs
/// RUST_LOG="debug,reqwest=debug,hyper=debug" fare-sweep ...
/// ```
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<()> {
    let env_filter = build_env_filter(config)?;
    let registry = Registry::default().with(env_filter);
    let log_dir = get_log_directory(config);

    match (config.file_output, config.console_output) {
        (true, console) => {
            std::fs::create_dir_all(&log_dir)
                .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
            rotate_existing_log_file(&log_dir, &config.file_name)?;
            if config.auto_cleanup_logs {
                cleanup_old_logs(&log_dir, config.max_files)?;
            }

            let file_appender = rolling::never(&log_dir, &config.file_name);
            let (file_writer, file_guard) = non_blocking(file_appender);

            // Store the guard globally to prevent it from being dropped
            LOG_GUARDS
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(file_guard);

            if config.json_format {
                let file_layer = fmt::Layer::new()
                    .json()
                    .with_writer(file_writer)
                    .with_timer(LocalTimeFormatter)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_ansi(false);
                registry
                    .with(file_layer)
                    .with(console.then(console_layer))
                    .try_init()?;
            } else {
                // time + level + message only
                let file_layer = fmt::Layer::new()
                    .with_writer(file_writer)
                    .with_timer(LocalTimeFormatter)
                    .with_target(false)
                    .with_ansi(false);
                registry
                    .with(file_layer)
                    .with(console.then(console_layer))
                    .try_init()?;
            }
        }
        (false, true) => registry.with(console_layer()).try_init()?,
        (false, false) => return Err(anyhow!("No logging output configured")),
    }

    info!("Logging system initialized (level: {})", config.level);
    if config.file_output {
        info!("Log file: {}", log_dir.join(&config.file_name).display());
    }
    Ok(())
}

/// Rotate existing log file by renaming it with its timestamp
fn rotate_existing_log_file(log_dir: &Path, log_file_name: &str) -> Result<()> {
    let log_file_path = log_dir.join(log_file_name);
    if !log_file_path.exists() {
        return Ok(());
    }

    let metadata = std::fs::metadata(&log_file_path)
        .with_context(|| format!("Failed to get metadata of {}", log_file_path.display()))?;
    let file_time = metadata
        .created()
        .or_else(|_| metadata.modified())
        .unwrap_or_else(|_| std::time::SystemTime::now());
    let stamp: DateTime<Local> = file_time.into();

    let file_stem = log_file_name.trim_end_matches(".log");
    let timestamped_path = log_dir.join(format!("{file_stem}.{}.log", stamp.format("%Y%m%dT%H%M%S")));

    std::fs::rename(&log_file_path, &timestamped_path).with_context(|| {
        format!(
            "Failed to rotate log file {} to {}",
            log_file_path.display(),
            timestamped_path.display()
        )
    })?;
    Ok(())
}

/// Keeps the `max_files` most recent `.log` files in `log_dir`
fn cleanup_old_logs(log_dir: &Path, max_files: u32) -> Result<usize> {
    let mut log_files = Vec::new();
    for entry in std::fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_log = path.extension().is_some_and(|ext| ext == "log");
        if path.is_file() && is_log {
            if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
                log_files.push((path, modified));
            }
        }
    }

    // newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    let mut removed = 0;
    for (path, _) in log_files.iter().skip(max_files as usize) {
        match std::fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to remove old log file {}: {}", path.display(), e),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_directory_wins() {
        let config = LoggingConfig {
            directory: Some(PathBuf::from("/tmp/fare-logs")),
            ..LoggingConfig::default()
        };
        assert_eq!(get_log_directory(&config), PathBuf::from("/tmp/fare-logs"));
        assert!(get_log_directory(&LoggingConfig::default()).ends_with("logs"));
    }

    #[test]
    fn test_rotation_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("fare-sweep.log"), "old run\n").unwrap();
        rotate_existing_log_file(dir.path(), "fare-sweep.log").unwrap();

        assert!(!dir.path().join("fare-sweep.log").exists());
        let rotated: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(rotated.len(), 1);

        for i in 0..4 {
            std::fs::write(dir.path().join(format!("extra-{i}.log")), "x").unwrap();
        }
        let removed = cleanup_old_logs(dir.path(), 2).unwrap();
        assert_eq!(removed, 3);
    }

    #[test]
    fn test_console_layer_stacks_on_both_file_formats() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, _guard) = non_blocking(rolling::never(dir.path(), "stack.log"));

        let json_stack = Registry::default()
            .with(fmt::Layer::new().json().with_writer(writer.clone()).with_ansi(false))
            .with(Some(console_layer()));
        tracing::subscriber::with_default(json_stack, || info!("json stack"));

        let plain_stack = Registry::default()
            .with(fmt::Layer::new().with_writer(writer).with_ansi(false))
            .with(None::<ConsoleLayer<_>>);
        tracing::subscriber::with_default(plain_stack, || info!("plain stack"));
    }

    #[test]
    fn test_invalid_module_filter_is_an_error() {
        let mut config = LoggingConfig::default();
        config.module_filters.insert("reqwest".into(), "loud".into());
        // RUST_LOG, when set in the environment, bypasses configured filters
        if std::env::var("RUST_LOG").is_err() {
            assert!(build_env_filter(&config).is_err());
        }
    }
}
