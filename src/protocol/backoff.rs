//! Reconnect delay policy
//!
//! delay = min(base * 2^retry_count, max_delay) + jitter(0..jitter)
//!
//! The ceiling bounds the exponential part only, so two links that hit the
//! ceiling together still spread out by the jitter.
use crate::config::ProtocolConfig;
use rand::Rng;
use std::time::Duration;

/// Beyond this the multiplication would overflow long before any sane ceiling
const MAX_EXPONENT: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl BackoffPolicy {
    pub fn from_config(cfg: &ProtocolConfig) -> Self {
        Self {
            base: Duration::from_millis(cfg.retry_base_timeout_ms),
            max_delay: Duration::from_millis(cfg.max_retry_delay_ms),
            jitter: Duration::from_millis(cfg.retry_jitter_ms),
        }
    }

    /// Deterministic part of the delay for the given retry count
    pub fn base_delay(&self, retry_count: u32) -> Duration {
        let factor = 1u64 << retry_count.min(MAX_EXPONENT);
        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
    }

    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..jitter_ms)
        };
        self.base_delay(retry_count) + Duration::from_millis(jitter)
    }
}
