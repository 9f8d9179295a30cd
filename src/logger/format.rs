//! Log formatting and output
//!
//! Console lines are `HH:MM:SS [TAG] [LEVEL] message` with colored tag and level;
//! file lines carry the full date and no color codes.

use super::config::with_logger_config;
use super::file::write_to_file;
use super::levels::LogLevel;
use super::tags::LogTag;
use chrono::Local;
use colored::*;
use std::io::{stdout, ErrorKind, Write};

/// Column widths for alignment
const TAG_WIDTH: usize = 9;
const LEVEL_WIDTH: usize = 7;

pub fn format_and_log(tag: LogTag, level: LogLevel, message: &str) {
    let now = Local::now();
    let colored_output = with_logger_config(|config| config.colored);

    let tag_label = format!("{:<width$}", tag.to_plain_string(), width = TAG_WIDTH);
    let level_label = format!("{:<width$}", level.as_str(), width = LEVEL_WIDTH);
    let time = now.format("%H:%M:%S").to_string();

    let console_line = if colored_output {
        format!(
            "{} [{}] [{}] {}",
            time.dimmed(),
            format_tag(&tag, &tag_label),
            format_level(level, &level_label),
            message
        )
    } else {
        format!("{} [{}] [{}] {}", time, tag_label, level_label, message)
    };
    print_stdout_safe(&console_line);

    write_to_file(&format!(
        "{} [{}] [{}] {}",
        now.format("%Y-%m-%d %H:%M:%S%.3f"),
        tag.to_plain_string(),
        level.as_str(),
        message
    ));
    if level == LogLevel::Error {
        super::file::flush_file_logging();
    }
}

/// Append structured fields as `key=value` pairs, quoting values with spaces
pub fn render_fields(message: &str, fields: &[(&str, String)]) -> String {
    if fields.is_empty() {
        return message.to_string();
    }

    let rendered: Vec<String> = fields
        .iter()
        .map(|(key, value)| {
            if value.is_empty() || value.contains(char::is_whitespace) {
                format!("{}={:?}", key, value)
            } else {
                format!("{}={}", key, value)
            }
        })
        .collect();

    format!("{} {}", message, rendered.join(" "))
}

fn format_tag(tag: &LogTag, label: &str) -> ColoredString {
    match tag {
        LogTag::System => label.bright_yellow().bold(),
        LogTag::Config => label.bright_white().bold(),
        LogTag::Protocol => label.bright_magenta().bold(),
        LogTag::ControlPlane => label.bright_blue().bold(),
        LogTag::Cache => label.bright_cyan().bold(),
        LogTag::Aggregator => label.bright_green().bold(),
        LogTag::Scheduler => label.cyan().bold(),
        LogTag::Connectivity => label.bright_red().bold(),
        LogTag::External => label.white(),
    }
}

fn format_level(level: LogLevel, label: &str) -> ColoredString {
    match level {
        LogLevel::Error => label.bright_red().bold(),
        LogLevel::Warning => label.bright_yellow().bold(),
        LogLevel::Info => label.white().bold(),
        LogLevel::Debug | LogLevel::Verbose => label.dimmed(),
    }
}

/// Print to stdout but ignore broken pipe errors
fn print_stdout_safe(message: &str) {
    if let Err(e) = writeln!(stdout(), "{}", message) {
        if e.kind() == ErrorKind::BrokenPipe {
            std::process::exit(0);
        }
        let _ = writeln!(std::io::stderr(), "Logger stdout error: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_fields() {
        assert_eq!(render_fields("purged", &[]), "purged");
        assert_eq!(
            render_fields(
                "purged",
                &[("queue", "orders".to_string()), ("reason", "channel closed".to_string())]
            ),
            "purged queue=orders reason=\"channel closed\""
        );
    }
}
