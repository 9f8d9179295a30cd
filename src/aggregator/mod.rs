//! Facade over both transports
//!
//! Enumeration comes from the control plane. Live counters from the protocol link
//! overwrite `messages`/`consumers` when the link is healthy. Operations try the
//! protocol link first and fall back to the control plane; only the error of the
//! last transport attempted reaches the caller.

pub mod types;

pub use types::{
    BindingSnapshot, ExchangeSnapshot, ObjectTotals, Overview, PublishOutcome, PurgeOutcome,
    QueueSnapshot, QueueTotals, Snapshot, TransportKind,
};

use crate::config::Config;
use crate::connectivity::{ConnectivityState, HealthReport};
use crate::control_plane::{endpoint_path, ControlPlaneClient};
use crate::errors::{BrokerError, BrokerResult};
use crate::logger::{self, LogLevel, LogTag};
use crate::protocol::{Message, MessageProperties, ProtocolLink};
use chrono::Utc;
use futures::future::join_all;
use serde_json::{json, Value};
use std::sync::Arc;
use types::{message_from_management, parse_list, properties_to_management};

const QUEUES_KEY: &str = "queues";
const EXCHANGES_KEY: &str = "exchanges";
const BINDINGS_KEY: &str = "bindings";
const OVERVIEW_KEY: &str = "overview";
const DEFAULT_EXCHANGE: &str = "amq.default";

#[derive(Debug, Clone, Copy)]
pub struct AggregatorSettings {
    /// false forces HTTP-only mode
    pub protocol_enabled: bool,
    pub enhance_batch_size: usize,
    pub peek_truncate_bytes: usize,
}

impl AggregatorSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            protocol_enabled: cfg.protocol.enabled,
            enhance_batch_size: cfg.aggregator.enhance_batch_size,
            peek_truncate_bytes: cfg.control_plane.peek_truncate_bytes,
        }
    }
}

pub struct Aggregator {
    link: Arc<ProtocolLink>,
    control_plane: Arc<ControlPlaneClient>,
    connectivity: Arc<ConnectivityState>,
    settings: AggregatorSettings,
}

impl Aggregator {
    pub fn new(
        link: Arc<ProtocolLink>,
        control_plane: Arc<ControlPlaneClient>,
        connectivity: Arc<ConnectivityState>,
        settings: AggregatorSettings,
    ) -> Self {
        Self {
            link,
            control_plane,
            connectivity,
            settings,
        }
    }

    pub fn link(&self) -> &Arc<ProtocolLink> {
        &self.link
    }

    pub fn control_plane(&self) -> &Arc<ControlPlaneClient> {
        &self.control_plane
    }

    /// Protocol link usable: enabled, connected, channel open, retries not exhausted
    pub fn is_healthy(&self) -> bool {
        self.settings.protocol_enabled
            && self.link.is_connected()
            && self.link.is_channel_available()
            && !self.link.is_exhausted()
    }

    pub fn health(&self) -> HealthReport {
        self.connectivity.report()
    }

    pub async fn get_overview(&self) -> BrokerResult<Overview> {
        let raw = self
            .control_plane
            .get("/overview", Some(OVERVIEW_KEY), None)
            .await?;
        Ok(Overview::from_management(&raw, self.health()))
    }

    pub async fn list_queues(&self) -> BrokerResult<Vec<QueueSnapshot>> {
        let raw = self
            .control_plane
            .get("/queues", Some(QUEUES_KEY), None)
            .await?;
        let mut queues = parse_list(&raw, QueueSnapshot::from_management)?;

        if self.is_healthy() {
            self.enhance(&mut queues).await;
        }
        Ok(queues)
    }

    pub async fn get_queue(&self, namespace: &str, name: &str) -> BrokerResult<QueueSnapshot> {
        let endpoint = endpoint_path(&["queues", namespace, name])?;
        let key = format!("queue:{}/{}", namespace, name);
        let raw = self.control_plane.get(&endpoint, Some(&key), None).await?;

        let mut queue = QueueSnapshot::from_management(&raw).ok_or_else(|| {
            BrokerError::InvalidResponse(format!("queue '{}' has no name", name))
        })?;
        if self.is_healthy() {
            self.enhance(std::slice::from_mut(&mut queue)).await;
        }
        Ok(queue)
    }

    pub async fn list_exchanges(&self) -> BrokerResult<Vec<ExchangeSnapshot>> {
        let raw = self
            .control_plane
            .get("/exchanges", Some(EXCHANGES_KEY), None)
            .await?;
        parse_list(&raw, ExchangeSnapshot::from_management)
    }

    pub async fn list_bindings(&self) -> BrokerResult<Vec<BindingSnapshot>> {
        let raw = self
            .control_plane
            .get("/bindings", Some(BINDINGS_KEY), None)
            .await?;
        parse_list(&raw, BindingSnapshot::from_management)
    }

    /// Peek messages without removing them from the queue
    pub async fn get_messages(
        &self,
        namespace: &str,
        name: &str,
        count: u32,
    ) -> BrokerResult<Vec<Message>> {
        if self.protocol_serves(namespace) {
            match self.link.get(name, count).await {
                Ok(messages) => return Ok(messages),
                Err(e) => self.log_fallback("get_messages", name, &e),
            }
        }

        let endpoint = endpoint_path(&["queues", namespace, name, "get"])?;
        let body = json!({
            "count": count,
            "ackmode": "ack_requeue_true",
            "encoding": "auto",
            "truncate": self.settings.peek_truncate_bytes,
        });
        let raw = self
            .control_plane
            .post(&endpoint, &body)
            .await
            .map_err(|e| surface("get_messages", e))?;

        raw.as_array()
            .ok_or_else(|| BrokerError::InvalidResponse("expected a JSON array".to_string()))?
            .iter()
            .map(message_from_management)
            .collect()
    }

    pub async fn purge_queue(&self, namespace: &str, name: &str) -> BrokerResult<PurgeOutcome> {
        let outcome = self.purge_via_any(namespace, name).await?;
        self.invalidate_queue(namespace, name);
        Ok(outcome)
    }

    pub async fn publish_message(
        &self,
        namespace: &str,
        exchange: &str,
        routing_key: &str,
        payload: &Value,
        properties: &MessageProperties,
    ) -> BrokerResult<PublishOutcome> {
        if self.protocol_serves(namespace) {
            match self
                .link
                .publish(exchange, routing_key, payload, properties)
                .await
            {
                Ok(routed) => {
                    return Ok(PublishOutcome {
                        transport: TransportKind::Protocol,
                        routed,
                    })
                }
                Err(e) => self.log_fallback("publish_message", exchange, &e),
            }
        }

        let exchange_name = if exchange.is_empty() {
            DEFAULT_EXCHANGE
        } else {
            exchange
        };
        let endpoint = endpoint_path(&["exchanges", namespace, exchange_name, "publish"])?;
        let body = json!({
            "properties": properties_to_management(properties),
            "routing_key": routing_key,
            "payload": payload_text(payload),
            "payload_encoding": "string",
        });
        let raw = self
            .control_plane
            .post(&endpoint, &body)
            .await
            .map_err(|e| surface("publish_message", e))?;

        Ok(PublishOutcome {
            transport: TransportKind::ControlPlane,
            routed: raw.get("routed").and_then(Value::as_bool).unwrap_or(false),
        })
    }

    /// Overview, enhanced queues and health in one payload
    pub async fn snapshot(&self) -> BrokerResult<Snapshot> {
        let (overview, queues) = tokio::try_join!(self.get_overview(), self.list_queues())?;
        Ok(Snapshot {
            overview,
            queues,
            health: self.health(),
            generated_at: Utc::now(),
        })
    }

    async fn purge_via_any(&self, namespace: &str, name: &str) -> BrokerResult<PurgeOutcome> {
        if self.protocol_serves(namespace) {
            match self.link.purge(name).await {
                Ok(purged) => {
                    return Ok(PurgeOutcome {
                        transport: TransportKind::Protocol,
                        purged: Some(purged),
                    })
                }
                Err(e) => self.log_fallback("purge_queue", name, &e),
            }
        }

        let endpoint = endpoint_path(&["queues", namespace, name, "contents"])?;
        self.control_plane
            .delete(&endpoint)
            .await
            .map_err(|e| surface("purge_queue", e))?;
        Ok(PurgeOutcome {
            transport: TransportKind::ControlPlane,
            purged: None,
        })
    }

    /// The link is bound to a single namespace
    fn protocol_serves(&self, namespace: &str) -> bool {
        self.is_healthy() && namespace == self.link.namespace()
    }

    /// Overwrite counters with live protocol data, batch by batch
    ///
    /// A failed lookup leaves that queue's control-plane values untouched.
    /// Exclusive queues are skipped: declaring them from this connection is a
    /// channel error.
    async fn enhance(&self, queues: &mut [QueueSnapshot]) {
        let namespace = self.link.namespace();
        let batch_size = self.settings.enhance_batch_size.max(1);

        for chunk in queues.chunks_mut(batch_size) {
            let lookups = chunk.iter().map(|queue| async move {
                if queue.namespace != namespace || queue.exclusive {
                    return None;
                }
                match self.link.inspect(&queue.name).await {
                    Ok(counts) => Some(counts),
                    Err(e) => {
                        logger::debug(
                            LogTag::Aggregator,
                            &format!("Live stats unavailable for '{}': {}", queue.name, e),
                        );
                        None
                    }
                }
            });
            let results = join_all(lookups).await;

            for (queue, counts) in chunk.iter_mut().zip(results) {
                if let Some(counts) = counts {
                    queue.messages = counts.messages;
                    queue.consumers = counts.consumers;
                }
            }
        }
    }

    fn invalidate_queue(&self, namespace: &str, name: &str) {
        self.control_plane.clear_cache_entry(QUEUES_KEY);
        self.control_plane
            .clear_cache_entry(&format!("queue:{}/{}", namespace, name));
    }

    fn log_fallback(&self, operation: &str, target: &str, err: &BrokerError) {
        logger::with_fields(
            LogLevel::Warning,
            LogTag::Aggregator,
            "Protocol path failed, falling back to control plane",
            &[
                ("operation", operation.to_string()),
                ("target", target.to_string()),
                ("error", err.to_string()),
                ("retryable", err.is_retryable().to_string()),
            ],
        );
    }
}

/// A fallback that got no response means neither transport could serve the call
fn surface(operation: &str, err: BrokerError) -> BrokerError {
    if err.is_no_response() {
        BrokerError::TransportUnavailable {
            operation: operation.to_string(),
            reason: err.to_string(),
        }
    } else {
        err
    }
}

fn payload_text(payload: &Value) -> String {
    match payload {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
