//! Runtime logger configuration
//!
//! Held in a global so every component can log without threading a handle
//! through constructors. Replaced wholesale by `set_logger_config`.
use super::levels::LogLevel;
use super::tags::LogTag;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Records above this level are dropped (Debug/Verbose have extra gates)
    pub min_level: LogLevel,
    /// Tags with --debug <tag> enabled
    pub debug_tags: HashSet<LogTag>,
    /// --debug all
    pub debug_all: bool,
    /// Append-only log file, console only when None
    pub file_path: Option<PathBuf>,
    /// Emit ANSI colors on the console
    pub colored: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            debug_tags: HashSet::new(),
            debug_all: false,
            file_path: None,
            colored: true,
        }
    }
}

impl LoggerConfig {
    /// Build from the configured level name and the command-line debug keys
    ///
    /// Unknown debug keys are ignored. Any debug key raises the threshold to
    /// Debug so the tagged records are not cut by `min_level`.
    pub fn from_settings(level: &str, debug_keys: &[String], verbose: bool) -> Self {
        let mut config = Self {
            min_level: LogLevel::from_str(level).unwrap_or(LogLevel::Info),
            ..Self::default()
        };

        for key in debug_keys {
            if key == "all" {
                config.debug_all = true;
            } else if let Some(tag) = LogTag::from_debug_key(key) {
                config.debug_tags.insert(tag);
            }
        }

        if (config.debug_all || !config.debug_tags.is_empty()) && config.min_level < LogLevel::Debug
        {
            config.min_level = LogLevel::Debug;
        }
        if verbose {
            config.min_level = LogLevel::Verbose;
        }

        config
    }

    pub fn with_file(mut self, path: Option<PathBuf>) -> Self {
        self.file_path = path;
        self
    }
}

static LOGGER_CONFIG: Lazy<RwLock<LoggerConfig>> =
    Lazy::new(|| RwLock::new(LoggerConfig::default()));

pub fn get_logger_config() -> LoggerConfig {
    LOGGER_CONFIG.read().clone()
}

pub fn set_logger_config(config: LoggerConfig) {
    *LOGGER_CONFIG.write() = config;
}

pub(super) fn with_logger_config<R>(f: impl FnOnce(&LoggerConfig) -> R) -> R {
    f(&LOGGER_CONFIG.read())
}

pub(super) fn is_debug_enabled_for_tag(config: &LoggerConfig, tag: &LogTag) -> bool {
    config.debug_all || config.debug_tags.contains(tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_keys_raise_threshold() {
        let config =
            LoggerConfig::from_settings("warning", &["protocol".to_string(), "bogus".to_string()], false);
        assert_eq!(config.min_level, LogLevel::Debug);
        assert!(config.debug_tags.contains(&LogTag::Protocol));
        assert_eq!(config.debug_tags.len(), 1);
        assert!(!config.debug_all);
    }

    #[test]
    fn test_verbose_and_debug_all() {
        let config = LoggerConfig::from_settings("info", &["all".to_string()], true);
        assert!(config.debug_all);
        assert_eq!(config.min_level, LogLevel::Verbose);
        assert!(is_debug_enabled_for_tag(&config, &LogTag::Cache));
    }

    #[test]
    fn test_unknown_level_defaults_to_info() {
        let config = LoggerConfig::from_settings("chatty", &[], false);
        assert_eq!(config.min_level, LogLevel::Info);
    }
}
