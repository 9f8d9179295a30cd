//! Structured tag/level logging for brokerwatch
//!
//! - Standard log levels (Error/Warning/Info/Debug/Verbose)
//! - Per-component debug control via --debug <tag> flags
//! - Colored console output plus optional file persistence
//! - Records emitted by dependencies through the `log` crate are routed to `LogTag::External`
//!
//! ## Usage
//!
//! ```rust
//! use brokerwatch::logger::{self, LogTag};
//!
//! logger::error(LogTag::Protocol, "Channel closed by broker");
//! logger::info(LogTag::ControlPlane, "Serving stale /queues");
//! logger::debug(LogTag::Cache, "Cache hit"); // Only with --debug cache
//! logger::with_fields(
//!     logger::LogLevel::Warning,
//!     LogTag::Aggregator,
//!     "Protocol purge failed, falling back",
//!     &[("queue", "orders".to_string())],
//! );
//! ```

mod bridge;
mod config;
mod core;
mod file;
mod format;
mod levels;
mod tags;

pub use config::{get_logger_config, set_logger_config, LoggerConfig};
pub use levels::LogLevel;
pub use tags::LogTag;

/// Initialize the logger system
///
/// Applies the given configuration, opens the file sink when a path is set and
/// installs the `log` crate bridge. Safe to call more than once; later calls only
/// replace the configuration.
pub fn init(config: LoggerConfig) {
    let file_path = config.file_path.clone();
    set_logger_config(config);

    if let Some(path) = file_path {
        if let Err(e) = file::init_file_logging(&path) {
            eprintln!("Failed to open log file '{}': {}", path.display(), e);
        }
    }

    bridge::install();
}

/// Log at ERROR level (always shown)
pub fn error(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Error, message);
}

/// Log at WARNING level
pub fn warning(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Warning, message);
}

/// Log at INFO level
pub fn info(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Info, message);
}

/// Log at DEBUG level (only shown with --debug <tag> or --debug all)
pub fn debug(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Debug, message);
}

/// Log at VERBOSE level (only shown with --verbose)
pub fn verbose(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Verbose, message);
}

/// Log with structured fields appended as `key=value` pairs
///
/// Fields are only rendered when the record passes filtering.
pub fn with_fields(level: LogLevel, tag: LogTag, message: &str, fields: &[(&str, String)]) {
    if !core::should_log(&tag, level) {
        return;
    }
    core::log_internal(tag, level, &format::render_fields(message, fields));
}

/// Force flush pending file writes
pub fn flush() {
    file::flush_file_logging();
}
