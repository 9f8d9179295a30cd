//! Command-line arguments for the brokerwatch binary
//!
//! Global flags configure the logger; each subcommand maps onto one Aggregator
//! operation (or the snapshot stream for `watch`).
use crate::logger::LoggerConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "brokerwatch")]
#[command(about = "Inspect a message broker over its wire protocol and management API")]
pub struct Cli {
    /// Configuration file (TOML); defaults apply when missing
    #[arg(long, default_value = crate::config::CONFIG_FILE_PATH)]
    pub config: PathBuf,

    /// Enable debug logs for a tag (protocol, control_plane, cache, aggregator,
    /// scheduler, connectivity, config, external) or `all`; repeatable
    #[arg(long = "debug", value_name = "TAG")]
    pub debug: Vec<String>,

    /// Enable verbose logs
    #[arg(long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Broker overview with object totals and connectivity
    Overview,
    /// All queues, with live counters when the protocol link is up
    Queues,
    /// One queue
    Queue { namespace: String, name: String },
    Exchanges,
    Bindings,
    /// Peek messages without removing them
    Messages {
        namespace: String,
        name: String,
        #[arg(long, default_value_t = 10)]
        count: u32,
    },
    /// Remove every message from a queue
    Purge { namespace: String, name: String },
    /// Publish a payload; valid JSON is sent as JSON, anything else as text
    Publish {
        namespace: String,
        exchange: String,
        routing_key: String,
        payload: String,
    },
    /// Connectivity status of both transports
    Health,
    /// Stream snapshots and connectivity changes until Ctrl-C
    Watch {
        /// Push interval; defaults to scheduler.refresh_interval_ms
        #[arg(long)]
        interval_ms: Option<u64>,
    },
}

impl Cli {
    pub fn logger_config(&self, level: &str, file_path: &str) -> LoggerConfig {
        let file = (!file_path.trim().is_empty()).then(|| PathBuf::from(file_path));
        LoggerConfig::from_settings(level, &self.debug, self.verbose).with_file(file)
    }
}
