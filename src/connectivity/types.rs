use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tri-state health combining both transports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectivityStatus {
    /// Both transports healthy
    Up,
    /// Control plane healthy, protocol link not; operations run through fallback
    Degraded,
    /// Control plane unhealthy or protocol link exhausted its retries
    Down,
}

impl ConnectivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectivityStatus::Up => "UP",
            ConnectivityStatus::Degraded => "DEGRADED",
            ConnectivityStatus::Down => "DOWN",
        }
    }
}

impl std::fmt::Display for ConnectivityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification raised by the control-plane client on every call outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlPlaneSignal {
    /// 401/403
    Unauthorized { status: u16 },
    /// 5xx
    ServerError { status: u16 },
    /// Any other 4xx; the API answered, so it is reachable
    Rejected { status: u16 },
    /// No response at all (refused, reset, timeout, DNS)
    ConnectionError { reason: String },
    /// The request could not be built; says nothing about the broker
    RequestSetup { reason: String },
    /// A call completed successfully
    Recovered,
}

impl ControlPlaneSignal {
    /// Reachability implied by the signal, None when it carries no information
    pub fn reachability(&self) -> Option<bool> {
        match self {
            ControlPlaneSignal::Recovered | ControlPlaneSignal::Rejected { .. } => Some(true),
            ControlPlaneSignal::Unauthorized { .. }
            | ControlPlaneSignal::ServerError { .. }
            | ControlPlaneSignal::ConnectionError { .. } => Some(false),
            ControlPlaneSignal::RequestSetup { .. } => None,
        }
    }
}

/// Shared health record of both transports
///
/// Written only by the protocol link's state machine and the control-plane
/// client; read by ConnectivityState consumers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionHealth {
    pub protocol_connected: bool,
    pub control_plane_connected: bool,
    pub retry_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Link is in the terminal MaxRetriesExceeded state
    pub protocol_exhausted: bool,
    pub last_control_plane_signal: Option<ControlPlaneSignal>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ConnectionHealth {
    pub fn status(&self) -> ConnectivityStatus {
        if !self.control_plane_connected || self.protocol_exhausted {
            ConnectivityStatus::Down
        } else if self.protocol_connected {
            ConnectivityStatus::Up
        } else {
            ConnectivityStatus::Degraded
        }
    }
}

/// Protocol-side fields of ConnectionHealth, written together
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProtocolHealthUpdate {
    pub connected: bool,
    pub retry_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub exhausted: bool,
}

/// Emitted on every status transition
#[derive(Debug, Clone, Serialize)]
pub struct ConnectivityChange {
    pub previous: ConnectivityStatus,
    pub current: ConnectivityStatus,
    pub health: ConnectionHealth,
    pub at: DateTime<Utc>,
}

/// Health endpoint payload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: ConnectivityStatus,
    pub protocol_connected: bool,
    pub control_plane_connected: bool,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl From<&ConnectionHealth> for HealthReport {
    fn from(health: &ConnectionHealth) -> Self {
        Self {
            status: health.status(),
            protocol_connected: health.protocol_connected,
            control_plane_connected: health.control_plane_connected,
            retry_count: health.retry_count,
            next_retry_at: health.next_retry_at,
        }
    }
}
