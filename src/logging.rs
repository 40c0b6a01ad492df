//! Structured logging built on the `tracing` crate.
//!
//! Level, format, and destination come from CLI flags first, then `APM_LOG`,
//! `APM_LOG_FORMAT`, `APM_LOG_OUTPUT`, and `APM_LOG_FILE` environment
//! variables, then defaults.

use crate::error::ApmError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Logging configuration assembled from CLI flags and environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error, off
    pub level: String,
    /// Output format: json, text
    pub format: String,
    /// Output destination: stdout, stderr, file
    pub output: String,
    /// Log file path when output is file; None means the platform default
    pub file: Option<PathBuf>,
    /// Colored output (text format on a terminal only)
    pub color: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "text".to_string(),
            output: "stderr".to_string(),
            file: None,
            color: true,
        }
    }
}

/// Resolve the log file path with precedence: CLI, APM_LOG_FILE env, default.
pub fn resolve_log_file_path(cli_file: Option<PathBuf>) -> Result<PathBuf, ApmError> {
    if let Some(p) = cli_file {
        if !p.as_os_str().is_empty() {
            return Ok(p);
        }
    }
    if let Ok(env_path) = std::env::var("APM_LOG_FILE") {
        if !env_path.is_empty() {
            return Ok(PathBuf::from(env_path));
        }
    }
    default_log_file_path()
}

fn default_log_file_path() -> Result<PathBuf, ApmError> {
    let project_dirs = directories::ProjectDirs::from("", "apm", "apm").ok_or_else(|| {
        ApmError::Config("Could not determine platform state directory for log file".to_string())
    })?;
    let state_dir = project_dirs
        .state_dir()
        .unwrap_or_else(|| project_dirs.data_dir())
        .to_path_buf();
    Ok(state_dir.join("apm.log"))
}

/// Initialize the logging system. Call once, before dispatching a command.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ApmError> {
    let filter = build_env_filter(config)?;
    let format = determine_format(config)?;
    let output = determine_output(config)?;

    let base_subscriber = Registry::default().with(filter);

    match (format.as_str(), output) {
        ("json", OutputDestination::File) => {
            let writer = open_log_file(config.file.clone())?;
            base_subscriber
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_timer(ChronoUtc::rfc_3339())
                        .with_writer(writer),
                )
                .init();
        }
        ("json", OutputDestination::Stdout) => {
            base_subscriber
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_timer(ChronoUtc::rfc_3339())
                        .with_writer(std::io::stdout),
                )
                .init();
        }
        ("json", OutputDestination::Stderr) => {
            base_subscriber
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_timer(ChronoUtc::rfc_3339())
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        (_, OutputDestination::File) => {
            let writer = open_log_file(config.file.clone())?;
            base_subscriber
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_timer(ChronoUtc::rfc_3339())
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
        }
        (_, OutputDestination::Stdout) => {
            base_subscriber
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_timer(ChronoUtc::rfc_3339())
                        .with_ansi(config.color)
                        .with_writer(std::io::stdout),
                )
                .init();
        }
        (_, OutputDestination::Stderr) => {
            base_subscriber
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_timer(ChronoUtc::rfc_3339())
                        .with_ansi(config.color)
                        .with_writer(std::io::stderr),
                )
                .init();
        }
    }

    Ok(())
}

fn open_log_file(configured: Option<PathBuf>) -> Result<std::fs::File, ApmError> {
    let log_file = resolve_log_file_path(configured)?;
    if let Some(parent) = log_file.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ApmError::io(parent, e))?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .map_err(|e| ApmError::io(&log_file, e))
}

/// Build environment filter from config or `APM_LOG`/`APM_LOG_MODULES`.
fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter, ApmError> {
    if let Ok(filter) = EnvFilter::try_from_env("APM_LOG") {
        return Ok(filter);
    }

    if config.level == "off" {
        return Ok(EnvFilter::new("off"));
    }

    let mut filter = EnvFilter::new(config.level.as_str());

    if let Ok(modules_str) = std::env::var("APM_LOG_MODULES") {
        for module_spec in modules_str.split(',') {
            let parts: Vec<&str> = module_spec.split('=').collect();
            if parts.len() == 2 {
                let directive = format!("{}={}", parts[0].trim(), parts[1].trim());
                filter = filter.add_directive(directive.parse().map_err(|e| {
                    ApmError::Config(format!("Invalid log directive from env: {}", e))
                })?);
            }
        }
    }

    Ok(filter)
}

fn determine_format(config: &LoggingConfig) -> Result<String, ApmError> {
    if let Ok(format) = std::env::var("APM_LOG_FORMAT") {
        if format == "json" || format == "text" {
            return Ok(format);
        }
    }

    if config.format != "json" && config.format != "text" {
        return Err(ApmError::Config(format!(
            "Invalid log format: {} (must be 'json' or 'text')",
            config.format
        )));
    }

    Ok(config.format.clone())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputDestination {
    Stdout,
    Stderr,
    File,
}

fn determine_output(config: &LoggingConfig) -> Result<OutputDestination, ApmError> {
    let output = std::env::var("APM_LOG_OUTPUT").unwrap_or_else(|_| config.output.clone());
    parse_output_destination(&output)
}

fn parse_output_destination(output: &str) -> Result<OutputDestination, ApmError> {
    match output {
        "stdout" => Ok(OutputDestination::Stdout),
        "stderr" => Ok(OutputDestination::Stderr),
        "file" => Ok(OutputDestination::File),
        _ => Err(ApmError::Config(format!(
            "Invalid log output: {} (must be 'stdout', 'stderr', or 'file')",
            output
        ))),
    }
}
