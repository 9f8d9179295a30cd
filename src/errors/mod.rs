//! Error taxonomy shared by both transports and the aggregation layer
//!
//! Protocol-side failures are normally recovered inside the same logical call by
//! falling back to the control plane; only the error of the last transport that
//! was attempted reaches the caller.
use thiserror::Error;

pub type BrokerResult<T> = Result<T, BrokerError>;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("No transport available for {operation}: {reason}")]
    TransportUnavailable { operation: String, reason: String },

    #[error("Protocol channel is not open")]
    ChannelUnavailable,

    #[error("Control plane rejected request (HTTP {status}): {message}")]
    UpstreamRejected { status: u16, message: String },

    #[error("Control plane unavailable: {reason}")]
    UpstreamUnavailable { status: Option<u16>, reason: String },

    #[error("Protocol link gave up after {attempts} reconnect attempts")]
    MaxRetriesExceeded { attempts: u32 },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Request setup failed: {0}")]
    RequestSetup(String),

    #[error("Invalid control plane response: {0}")]
    InvalidResponse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BrokerError {
    /// Whether another transport (or a later attempt) may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BrokerError::TransportUnavailable { .. }
                | BrokerError::ChannelUnavailable
                | BrokerError::UpstreamUnavailable { .. }
                | BrokerError::Protocol(_)
        )
    }

    /// HTTP status carried by control-plane errors, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            BrokerError::UpstreamRejected { status, .. } => Some(*status),
            BrokerError::UpstreamUnavailable { status, .. } => *status,
            _ => None,
        }
    }

    /// True when the control plane never produced a response
    pub fn is_no_response(&self) -> bool {
        matches!(self, BrokerError::UpstreamUnavailable { status: None, .. })
    }
}

impl From<lapin::Error> for BrokerError {
    fn from(err: lapin::Error) -> Self {
        BrokerError::Protocol(err.to_string())
    }
}
