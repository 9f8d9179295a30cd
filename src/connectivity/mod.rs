pub mod service;
pub mod state;
pub mod types;

pub use service::ConnectivityService;
pub use state::ConnectivityState;
pub use types::{
    ConnectionHealth, ConnectivityChange, ConnectivityStatus, ControlPlaneSignal, HealthReport,
    ProtocolHealthUpdate,
};
