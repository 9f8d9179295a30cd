//! Configuration schemas - all config structures defined once with defaults
//!
//! Each struct uses the config_struct! macro, so a TOML file only needs the
//! values that differ from these defaults.
use crate::config_struct;

// ============================================================================
// BROKER CONNECTION
// ============================================================================

config_struct! {
    /// Where the broker lives and how to authenticate against it
    pub struct BrokerConfig {
        host: String = "localhost".to_string(),
        /// Binary protocol (AMQP) port
        port: u16 = 5672,
        /// Management API port
        management_port: u16 = 15672,
        /// Virtual namespace (vhost) the protocol connection is bound to
        vhost: String = "/".to_string(),
        username: String = "guest".to_string(),
        password: String = "guest".to_string(),
        tls_enabled: bool = false,
        tls_verify: bool = true,
        /// Full management API base URL, derived from host/management_port when empty
        control_plane_base_url: String = String::new(),
        /// Full amqp:// URL, derived from the fields above when empty
        protocol_url: String = String::new(),
    }
}

// ============================================================================
// PROTOCOL LINK
// ============================================================================

config_struct! {
    /// Persistent protocol connection and its reconnect policy
    pub struct ProtocolConfig {
        /// false forces HTTP-only mode
        enabled: bool = true,
        max_retries: u32 = 5,
        retry_base_timeout_ms: u64 = 1000,
        /// Ceiling applied to the exponential part of the backoff
        max_retry_delay_ms: u64 = 60_000,
        retry_jitter_ms: u64 = 1000,
        connect_timeout_secs: u64 = 10,
    }
}

// ============================================================================
// CONTROL PLANE
// ============================================================================

config_struct! {
    /// HTTP management API client
    pub struct ControlPlaneConfig {
        cache_ttl_ms: u64 = 5000,
        /// Cached responses kept at most; the oldest is evicted first
        cache_max_entries: usize = 1000,
        request_timeout_secs: u64 = 10,
        /// Payload truncation for messages peeked over HTTP
        peek_truncate_bytes: usize = 50_000,
    }
}

config_struct! {
    pub struct AggregatorConfig {
        /// Queues inspected concurrently over the protocol link per batch
        enhance_batch_size: usize = 5,
    }
}

config_struct! {
    pub struct SchedulerConfig {
        refresh_interval_ms: u64 = 5000,
    }
}

config_struct! {
    pub struct ConnectivityConfig {
        probe_interval_secs: u64 = 10,
    }
}

config_struct! {
    pub struct LoggingConfig {
        level: String = "info".to_string(),
        /// Empty means console only
        file_path: String = String::new(),
    }
}

// ============================================================================
// ROOT
// ============================================================================

config_struct! {
    /// Root configuration
    pub struct Config {
        broker: BrokerConfig = BrokerConfig::default(),
        protocol: ProtocolConfig = ProtocolConfig::default(),
        control_plane: ControlPlaneConfig = ControlPlaneConfig::default(),
        aggregator: AggregatorConfig = AggregatorConfig::default(),
        scheduler: SchedulerConfig = SchedulerConfig::default(),
        connectivity: ConnectivityConfig = ConnectivityConfig::default(),
        logging: LoggingConfig = LoggingConfig::default(),
    }
}
