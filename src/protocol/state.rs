//! Link state machine values and lifecycle events

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `connect()` was never called
    NotStarted,
    /// `close()` was called; no automatic reconnect
    Closed,
    /// Connection or channel failed; a reconnect follows
    Lost(String),
    /// Retries exhausted; only `restart()` leaves this state
    MaxRetriesExceeded,
}

/// One value instead of separate connecting/connected/pending flags, so
/// combinations such as "connecting while connected" cannot be expressed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Disconnected(DisconnectReason),
    Connecting,
    Connected,
    Reconnecting {
        attempt: u32,
        delay: Duration,
        next_retry_at: DateTime<Utc>,
    },
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, LinkState::Connecting)
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(
            self,
            LinkState::Disconnected(DisconnectReason::MaxRetriesExceeded)
        )
    }

    pub fn next_retry_at(&self) -> Option<DateTime<Utc>> {
        match self {
            LinkState::Reconnecting { next_retry_at, .. } => Some(*next_retry_at),
            _ => None,
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Disconnected(DisconnectReason::NotStarted) => f.write_str("disconnected"),
            LinkState::Disconnected(DisconnectReason::Closed) => f.write_str("closed"),
            LinkState::Disconnected(DisconnectReason::Lost(reason)) => {
                write!(f, "lost ({})", reason)
            }
            LinkState::Disconnected(DisconnectReason::MaxRetriesExceeded) => {
                f.write_str("max retries exceeded")
            }
            LinkState::Connecting => f.write_str("connecting"),
            LinkState::Connected => f.write_str("connected"),
            LinkState::Reconnecting { attempt, delay, .. } => {
                write!(f, "reconnecting (attempt {} in {}ms)", attempt, delay.as_millis())
            }
        }
    }
}

/// Closed set of lifecycle events published by the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Disconnected,
    Error(String),
    Reconnecting { attempt: u32, delay: Duration },
    MaxRetriesExceeded { attempts: u32 },
}
