//! Configuration utilities - loading, environment overrides and access helpers
//!
//! Loading order:
//! 1. TOML file (defaults when the file does not exist)
//! 2. `.env` file, if present
//! 3. Process environment (`BROKER_*` variables)

use super::schemas::Config;
use crate::errors::{BrokerError, BrokerResult};
use crate::logger::{self, LogTag};
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::RwLock;
use std::path::Path;
use std::str::FromStr;

/// Global configuration instance
pub static CONFIG: OnceCell<RwLock<Config>> = OnceCell::new();

/// Used by `with_config` before `load_config_from_path` ran (tests, tools)
static DEFAULT_CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::default()));

/// Default configuration file path
pub const CONFIG_FILE_PATH: &str = "data/brokerwatch.toml";

/// Read a configuration from disk without touching the global
///
/// A missing file yields defaults; a present but invalid file is an error.
pub fn read_config_file(path: &Path) -> BrokerResult<Config> {
    if !path.exists() {
        logger::warning(
            LogTag::Config,
            &format!("Config file '{}' not found, using default values", path.display()),
        );
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path).map_err(|e| {
        BrokerError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
    })?;

    toml::from_str::<Config>(&contents).map_err(|e| {
        BrokerError::Config(format!("Failed to parse config file '{}': {}", path.display(), e))
    })
}

/// Apply `BROKER_*` overrides from any variable source
///
/// The lookup is injected so tests do not have to mutate the process environment.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> BrokerResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("BROKER_CONTROL_PLANE_URL") {
        config.broker.control_plane_base_url = v;
    }
    if let Some(v) = lookup("BROKER_PROTOCOL_URL") {
        config.broker.protocol_url = v;
    }
    if let Some(v) = lookup("BROKER_USERNAME") {
        config.broker.username = v;
    }
    if let Some(v) = lookup("BROKER_PASSWORD") {
        config.broker.password = v;
    }
    if let Some(v) = lookup("BROKER_TLS_VERIFY") {
        config.broker.tls_verify = parse_env("BROKER_TLS_VERIFY", &v)?;
    }
    if let Some(v) = lookup("BROKER_REFRESH_INTERVAL_MS") {
        config.scheduler.refresh_interval_ms = parse_env("BROKER_REFRESH_INTERVAL_MS", &v)?;
    }
    if let Some(v) = lookup("BROKER_MAX_RETRIES") {
        config.protocol.max_retries = parse_env("BROKER_MAX_RETRIES", &v)?;
    }
    if let Some(v) = lookup("BROKER_RETRY_BASE_TIMEOUT_MS") {
        config.protocol.retry_base_timeout_ms = parse_env("BROKER_RETRY_BASE_TIMEOUT_MS", &v)?;
    }
    if let Some(v) = lookup("BROKER_CACHE_TTL_MS") {
        config.control_plane.cache_ttl_ms = parse_env("BROKER_CACHE_TTL_MS", &v)?;
    }
    Ok(())
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> BrokerResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| BrokerError::Config(format!("Invalid value for {}: '{}' ({})", name, value, e)))
}

/// Load configuration from a file plus environment and install it globally
///
/// Read it back through `with_config` or `get_config_clone`.
pub fn load_config_from_path(path: &Path) -> BrokerResult<()> {
    let mut config = read_config_file(path)?;

    // A missing .env is the normal case
    let _ = dotenv::dotenv();
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;

    CONFIG
        .set(RwLock::new(config))
        .map_err(|_| BrokerError::Config("Config already initialized".to_string()))?;

    logger::debug(
        LogTag::Config,
        &format!("Configuration loaded from '{}'", path.display()),
    );
    Ok(())
}

/// Execute a function with read access to the configuration
///
/// Falls back to defaults when nothing was loaded yet.
pub fn with_config<F, R>(f: F) -> R
where
    F: FnOnce(&Config) -> R,
{
    match CONFIG.get() {
        Some(lock) => f(&lock.read()),
        None => f(&DEFAULT_CONFIG.read()),
    }
}

/// Clone of the current configuration, for use across await points
pub fn get_config_clone() -> Config {
    with_config(|cfg| cfg.clone())
}
