//! Response cache with stale retention
//!
//! Freshness is judged by the caller's TTL at read time. Expired entries are
//! kept: they are no longer served as fresh, but remain available as the stale
//! fallback when the control plane stops answering.
//! Entries are replaced only by a newer successful response or an explicit clear,
//! except that a full cache evicts its oldest entry to make room for a new key.
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_CAPACITY: usize = 1000;

struct CacheEntry {
    value: Value,
    stored_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.stored_at.elapsed() < ttl
    }
}

/// Cache metrics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub stale_served: u64,
    pub inserts: u64,
    pub evictions: u64,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct ResponseCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    metrics: RwLock<CacheMetrics>,
    capacity: usize,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// At most `capacity` keys are kept (minimum 1)
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            metrics: RwLock::new(CacheMetrics::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Value stored under `key` if it is younger than `ttl`
    pub fn get_fresh(&self, key: &str, ttl: Duration) -> Option<Value> {
        let fresh = self
            .entries
            .read()
            .get(key)
            .filter(|entry| entry.is_fresh(ttl))
            .map(|entry| entry.value.clone());

        let mut metrics = self.metrics.write();
        if fresh.is_some() {
            metrics.hits += 1;
        } else {
            metrics.misses += 1;
        }
        fresh
    }

    /// Value stored under `key` regardless of age
    pub fn get_stale(&self, key: &str) -> Option<Value> {
        let stale = self.entries.read().get(key).map(|entry| entry.value.clone());
        if stale.is_some() {
            self.metrics.write().stale_served += 1;
        }
        stale
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        let mut entries = self.entries.write();

        let mut evicted = 0;
        if !entries.contains_key(&key) {
            while entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.stored_at)
                    .map(|(k, _)| k.clone());
                let Some(oldest) = oldest else {
                    break;
                };
                entries.remove(&oldest);
                evicted += 1;
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
        drop(entries);

        let mut metrics = self.metrics.write();
        metrics.inserts += 1;
        metrics.evictions += evicted;
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.metrics.read().clone()
    }
}
