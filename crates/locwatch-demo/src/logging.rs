//! Logging initialization and configuration.
//!
//! Two output profiles, chosen by `LOCWATCH_PRODUCTION`:
//! - **Production**: JSON logs to a daily rolling file + compact logs to stdout
//! - **Development**: Pretty logs to stdout, with thread ids so lookups
//!   running on the blocking pool can be told apart from host callbacks

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable overriding the production log directory.
const LOG_DIR_VAR: &str = "LOCWATCH_LOG_DIR";

/// Environment variable holding the fallback log filter.
const LOG_LEVEL_VAR: &str = "LOCWATCH_LOG_LEVEL";

/// Guards for the non-blocking writers. Dropping one stops its worker and
/// loses buffered lines, so they live until the process exits.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static STDOUT_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize the logging system.
///
/// # Arguments
///
/// * `is_production` - Use the production profile
/// * `default_level` - Filter used when neither `RUST_LOG` nor
///   `LOCWATCH_LOG_LEVEL` is set
///
/// Coordinator decision events are emitted at debug level and additionally
/// need `debug_logging = true` in the coordinator configuration.
///
/// # Production Mode
///
/// - Daily rolling `locwatch.*` files in `LOCWATCH_LOG_DIR`, or the per-user
///   data directory
/// - JSON in files, with file and line of each event
/// - Compact stdout without ANSI colors, for log collectors
///
/// # Development Mode
///
/// - Pretty stdout only, ANSI colors enabled
///
/// # Errors
///
/// Returns an error if the env filter cannot be parsed.
pub fn init(is_production: bool, default_level: &str) -> anyhow::Result<()> {
    let log_level = std::env::var(LOG_LEVEL_VAR).unwrap_or_else(|_| default_level.to_string());

    // RUST_LOG wins over the locwatch-specific variable.
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    if is_production {
        init_production(env_filter);
    } else {
        init_development(env_filter);
    }

    Ok(())
}

fn init_production(env_filter: EnvFilter) {
    let log_dir = log_directory();

    // A missing directory is not fatal: the appender then fails per write
    // and stdout still carries every event.
    if !log_dir.exists() {
        std::fs::create_dir_all(&log_dir).ok();
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "locwatch");
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
    let (non_blocking_stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    // Files: one JSON object per event, fields such as `coordinates` and
    // `generation` stay machine-readable.
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking_file)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    // Stdout: single line per event, no color codes.
    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(non_blocking_stdout)
        .with_target(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);
}

fn init_development(env_filter: EnvFilter) {
    // Source locations are left out: the demo is small and the pretty
    // format already spends two lines per event.
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();
}

/// Production log directory: `LOCWATCH_LOG_DIR`, else the per-user data
/// directory, else `./logs`.
fn log_directory() -> PathBuf {
    if let Some(dir) = std::env::var_os(LOG_DIR_VAR).filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    default_log_directory()
}

fn default_log_directory() -> PathBuf {
    directories::ProjectDirs::from("", "", "locwatch")
        .map(|dirs| dirs.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("./logs"))
}
