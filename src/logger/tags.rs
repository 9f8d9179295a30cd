//! Log tags identify the component that produced a record
//!
//! Each tag has a console label, a color and a debug key used by the
//! `--debug <key>` command-line flags.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogTag {
    System,
    Config,
    Protocol,
    ControlPlane,
    Cache,
    Aggregator,
    Scheduler,
    Connectivity,
    External,
}

impl LogTag {
    pub const ALL: [LogTag; 9] = [
        LogTag::System,
        LogTag::Config,
        LogTag::Protocol,
        LogTag::ControlPlane,
        LogTag::Cache,
        LogTag::Aggregator,
        LogTag::Scheduler,
        LogTag::Connectivity,
        LogTag::External,
    ];

    /// Key used in --debug <key> flags
    pub fn to_debug_key(&self) -> &'static str {
        match self {
            LogTag::System => "system",
            LogTag::Config => "config",
            LogTag::Protocol => "protocol",
            LogTag::ControlPlane => "control-plane",
            LogTag::Cache => "cache",
            LogTag::Aggregator => "aggregator",
            LogTag::Scheduler => "scheduler",
            LogTag::Connectivity => "connectivity",
            LogTag::External => "external",
        }
    }

    pub fn from_debug_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|tag| tag.to_debug_key() == key)
    }

    /// Label used in console and file output
    pub fn to_plain_string(&self) -> &'static str {
        match self {
            LogTag::System => "SYSTEM",
            LogTag::Config => "CONFIG",
            LogTag::Protocol => "AMQP",
            LogTag::ControlPlane => "HTTP",
            LogTag::Cache => "CACHE",
            LogTag::Aggregator => "AGGREGATE",
            LogTag::Scheduler => "SCHEDULER",
            LogTag::Connectivity => "CONNECT",
            LogTag::External => "EXTERNAL",
        }
    }
}
