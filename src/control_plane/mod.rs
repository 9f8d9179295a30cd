//! Management API client with read-through caching
//!
//! GETs that carry a cache key are served from the cache while fresh. A successful
//! call always refreshes the entry; a failed one falls back to whatever value is
//! cached, however old. Every outcome is classified and reported to
//! ConnectivityState, including failures that stale-serve hides from the caller.

pub mod cache;
pub mod transport;

pub use cache::{CacheMetrics, ResponseCache};
pub use transport::{HttpFailure, HttpTransport, ReqwestTransport};

use crate::connectivity::{ConnectivityState, ControlPlaneSignal};
use crate::errors::{BrokerError, BrokerResult};
use crate::logger::{self, LogLevel, LogTag};
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const PROBE_ENDPOINT: &str = "/overview";

pub struct ControlPlaneClient {
    transport: Arc<dyn HttpTransport>,
    cache: ResponseCache,
    default_ttl: Duration,
    connectivity: Arc<ConnectivityState>,
}

impl ControlPlaneClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        default_ttl: Duration,
        connectivity: Arc<ConnectivityState>,
    ) -> Self {
        Self {
            transport,
            cache: ResponseCache::new(),
            default_ttl,
            connectivity,
        }
    }

    /// Replace the cache with an empty one bounded to `max_entries` keys
    pub fn with_cache_capacity(mut self, max_entries: usize) -> Self {
        self.cache = ResponseCache::with_capacity(max_entries);
        self
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Read-through GET
    ///
    /// Without a cache key the call always goes to the network and is never cached.
    /// `ttl` bounds the age of a cached value served as fresh and defaults to the
    /// configured cache TTL.
    pub async fn get(
        &self,
        endpoint: &str,
        cache_key: Option<&str>,
        ttl: Option<Duration>,
    ) -> BrokerResult<Value> {
        let ttl = ttl.unwrap_or(self.default_ttl);

        if let Some(key) = cache_key {
            if let Some(value) = self.cache.get_fresh(key, ttl) {
                logger::debug(LogTag::Cache, &format!("Cache hit for '{}'", key));
                return Ok(value);
            }
        }

        match self.request(Method::GET, endpoint, None).await {
            Ok(value) => {
                if let Some(key) = cache_key {
                    self.cache.insert(key, value.clone());
                }
                Ok(value)
            }
            Err(err) => {
                if let Some(stale) = cache_key.and_then(|key| self.cache.get_stale(key)) {
                    logger::with_fields(
                        LogLevel::Info,
                        LogTag::ControlPlane,
                        "Serving stale cache entry after failed request",
                        &[("endpoint", endpoint.to_string()), ("error", err.to_string())],
                    );
                    return Ok(stale);
                }
                Err(err)
            }
        }
    }

    pub async fn post(&self, endpoint: &str, body: &Value) -> BrokerResult<Value> {
        self.request(Method::POST, endpoint, Some(body)).await
    }

    pub async fn put(&self, endpoint: &str, body: &Value) -> BrokerResult<Value> {
        self.request(Method::PUT, endpoint, Some(body)).await
    }

    pub async fn delete(&self, endpoint: &str) -> BrokerResult<Value> {
        self.request(Method::DELETE, endpoint, None).await
    }

    /// Uncached reachability check
    pub async fn probe(&self) -> BrokerResult<()> {
        self.request(Method::GET, PROBE_ENDPOINT, None).await.map(|_| ())
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        logger::debug(LogTag::Cache, "Response cache cleared");
    }

    pub fn clear_cache_entry(&self, key: &str) -> bool {
        self.cache.remove(key)
    }

    pub fn cache_metrics(&self) -> CacheMetrics {
        self.cache.metrics()
    }

    pub fn cache_capacity(&self) -> usize {
        self.cache.capacity()
    }

    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> BrokerResult<Value> {
        logger::verbose(LogTag::ControlPlane, &format!("{} {}", method, endpoint));

        let outcome = self.transport.send(method.clone(), endpoint, body).await;
        self.connectivity.record_control_plane(&classify(&outcome));

        outcome.map_err(|failure| {
            let err = into_error(failure);
            logger::debug(
                LogTag::ControlPlane,
                &format!("{} {} failed: {}", method, endpoint, err),
            );
            err
        })
    }
}

/// Signal raised for one call outcome
pub fn classify(outcome: &Result<Value, HttpFailure>) -> ControlPlaneSignal {
    match outcome {
        Ok(_) | Err(HttpFailure::Decode(_)) => ControlPlaneSignal::Recovered,
        Err(HttpFailure::Response { status, .. }) => match *status {
            401 | 403 => ControlPlaneSignal::Unauthorized { status: *status },
            500..=599 => ControlPlaneSignal::ServerError { status: *status },
            _ => ControlPlaneSignal::Rejected { status: *status },
        },
        Err(HttpFailure::NoResponse(reason)) => ControlPlaneSignal::ConnectionError {
            reason: reason.clone(),
        },
        Err(HttpFailure::Setup(reason)) => ControlPlaneSignal::RequestSetup {
            reason: reason.clone(),
        },
    }
}

fn into_error(failure: HttpFailure) -> BrokerError {
    match failure {
        HttpFailure::Response { status, body } if (400..500).contains(&status) => {
            BrokerError::UpstreamRejected {
                status,
                message: error_message(status, &body),
            }
        }
        HttpFailure::Response { status, body } => BrokerError::UpstreamUnavailable {
            status: Some(status),
            reason: error_message(status, &body),
        },
        HttpFailure::NoResponse(reason) => BrokerError::UpstreamUnavailable {
            status: None,
            reason,
        },
        HttpFailure::Setup(reason) => BrokerError::RequestSetup(reason),
        HttpFailure::Decode(reason) => BrokerError::InvalidResponse(reason),
    }
}

/// Management API errors look like `{"error": "...", "reason": "..."}`
fn error_message(status: u16, body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        for field in ["reason", "error"] {
            if let Some(text) = json.get(field).and_then(Value::as_str) {
                return text.to_string();
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status)
    } else {
        trimmed.to_string()
    }
}

/// Build an endpoint from raw path segments, percent-encoding each one
///
/// `endpoint_path(&["queues", "/", "orders"])` is `/queues/%2F/orders`.
pub fn endpoint_path(segments: &[&str]) -> BrokerResult<String> {
    let mut url = Url::parse("http://localhost/")
        .map_err(|e| BrokerError::RequestSetup(format!("Invalid path base: {}", e)))?;
    url.path_segments_mut()
        .map_err(|_| BrokerError::RequestSetup("Path cannot be segmented".to_string()))?
        .clear()
        .extend(segments);
    Ok(url.path().to_string())
}
