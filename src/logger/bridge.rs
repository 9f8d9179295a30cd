//! Bridge from the `log` facade used by dependencies (lapin, reqwest) into our logger
use super::core::log_internal;
use super::levels::LogLevel;
use super::tags::LogTag;

struct ExternalBridge;

static BRIDGE: ExternalBridge = ExternalBridge;

impl log::Log for ExternalBridge {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        super::core::should_log(&LogTag::External, LogLevel::from_log_level(metadata.level()))
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        log_internal(
            LogTag::External,
            LogLevel::from_log_level(record.level()),
            &format!("{}: {}", record.target(), record.args()),
        );
    }

    fn flush(&self) {
        super::file::flush_file_logging();
    }
}

/// Install once; a second install (tests, re-init) is silently ignored
pub fn install() {
    if log::set_logger(&BRIDGE).is_ok() {
        log::set_max_level(log::LevelFilter::Trace);
    }
}
