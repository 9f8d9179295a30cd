//! Core logging implementation with automatic filtering
//!
//! Checks whether a record should be displayed based on level and tag, then
//! hands it to the format module.
use super::config::{is_debug_enabled_for_tag, with_logger_config};
use super::levels::LogLevel;
use super::tags::LogTag;

/// Filtering rules:
/// 1. Errors are always shown
/// 2. Anything above the minimum level threshold is dropped
/// 3. Debug level requires --debug <tag> (or --debug all)
/// 4. Verbose level requires --verbose
pub fn should_log(tag: &LogTag, level: LogLevel) -> bool {
    with_logger_config(|config| {
        if level == LogLevel::Error {
            return true;
        }

        if level > config.min_level {
            return false;
        }

        if level == LogLevel::Debug {
            return is_debug_enabled_for_tag(config, tag) || config.min_level == LogLevel::Verbose;
        }

        true
    })
}

pub fn log_internal(tag: LogTag, level: LogLevel, message: &str) {
    if !should_log(&tag, level) {
        return;
    }

    super::format::format_and_log(tag, level, message);
}
