//! Configuration system
//!
//! - `macros`: `config_struct!` for single-source struct + defaults definitions
//! - `schemas`: every configuration section
//! - `credentials`: immutable broker credentials derived from the `broker` section
//! - `utils`: loading, environment overrides and global access

pub mod credentials;
pub mod macros;
pub mod schemas;
pub mod utils;

pub use credentials::BrokerCredentials;
pub use schemas::{
    AggregatorConfig, BrokerConfig, Config, ConnectivityConfig, ControlPlaneConfig,
    LoggingConfig, ProtocolConfig, SchedulerConfig,
};
pub use utils::{
    apply_env_overrides, get_config_clone, load_config_from_path, read_config_file,
    with_config, CONFIG_FILE_PATH,
};
