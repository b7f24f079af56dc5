//! Logging initialization.
//!
//! Structured logging via the `tracing` crate, with optional rolling file
//! output. `log` records (the IPC crate uses the `log` facade) are bridged
//! into `tracing` as well.

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_log::LogTracer;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Log initialization options.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Log level used when `RUST_LOG` is unset (default: INFO)
    pub level: Level,

    /// Whether to log to stderr (default: true)
    pub log_to_stderr: bool,

    /// Whether to log to a rolling file (default: false)
    pub log_to_file: bool,

    /// Directory for log files (default: "./logs")
    pub log_dir: String,

    /// Base filename for log files (default: "cindervpn")
    pub log_file_name: String,

    /// Whether to emit JSON-formatted logs (default: false)
    pub json_format: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        LogOptions {
            level: Level::INFO,
            log_to_stderr: true,
            log_to_file: false,
            log_dir: "./logs".to_string(),
            log_file_name: "cindervpn".to_string(),
            json_format: false,
        }
    }
}

/// Initialize logging with the given options.
///
/// Returns a guard that must be kept alive for the duration of the program
/// when file logging is enabled, so buffered logs are flushed on exit.
pub fn init_logging(options: LogOptions) -> Option<WorkerGuard> {
    // Route `log` records through tracing; ignore re-initialization.
    let _ = LogTracer::init();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.level.to_string()));

    let stderr_layer = options.log_to_stderr.then(|| {
        if options.json_format {
            fmt::layer().json().with_writer(std::io::stderr).boxed()
        } else {
            fmt::layer().with_writer(std::io::stderr).boxed()
        }
    });

    let mut guard = None;
    let file_layer = if options.log_to_file {
        let appender =
            RollingFileAppender::new(Rotation::DAILY, &options.log_dir, &options.log_file_name);
        let (writer, worker_guard) = tracing_appender::non_blocking(appender);
        guard = Some(worker_guard);
        if options.json_format {
            Some(fmt::layer().json().with_writer(writer).with_ansi(false).boxed())
        } else {
            Some(fmt::layer().with_writer(writer).with_ansi(false).boxed())
        }
    } else {
        None
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    guard
}

/// Parse a log level string, falling back to INFO.
pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}
