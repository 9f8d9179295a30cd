//! Snapshot types served by the aggregator and their management API mappings
//!
//! All wire shapes are camelCase. Missing numeric fields in management responses
//! read as zero; the API omits them for idle or freshly declared objects.
use crate::connectivity::HealthReport;
use crate::errors::{BrokerError, BrokerResult};
use crate::protocol::{Message, MessagePayload, MessageProperties};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Which transport served an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Protocol,
    ControlPlane,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub name: String,
    pub namespace: String,
    pub durable: bool,
    /// Owned by another connection; never inspected over the protocol link
    pub exclusive: bool,
    pub state: String,
    /// Overwritten by live protocol counts when the link is healthy
    pub messages: u64,
    pub messages_ready: u64,
    pub messages_unacked: u64,
    /// Overwritten by live protocol counts when the link is healthy
    pub consumers: u64,
    pub publish_rate: f64,
    pub deliver_rate: f64,
}

impl QueueSnapshot {
    pub fn from_management(raw: &Value) -> Option<Self> {
        Some(Self {
            name: str_at(raw, &["name"])?,
            namespace: str_at(raw, &["vhost"]).unwrap_or_else(|| "/".to_string()),
            durable: bool_at(raw, &["durable"]),
            exclusive: bool_at(raw, &["exclusive"]),
            state: str_at(raw, &["state"]).unwrap_or_else(|| "unknown".to_string()),
            messages: u64_at(raw, &["messages"]),
            messages_ready: u64_at(raw, &["messages_ready"]),
            messages_unacked: u64_at(raw, &["messages_unacknowledged"]),
            consumers: u64_at(raw, &["consumers"]),
            publish_rate: f64_at(raw, &["message_stats", "publish_details", "rate"]),
            deliver_rate: f64_at(raw, &["message_stats", "deliver_get_details", "rate"]),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeSnapshot {
    pub name: String,
    pub namespace: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
}

impl ExchangeSnapshot {
    pub fn from_management(raw: &Value) -> Option<Self> {
        Some(Self {
            name: str_at(raw, &["name"])?,
            namespace: str_at(raw, &["vhost"]).unwrap_or_else(|| "/".to_string()),
            kind: str_at(raw, &["type"]).unwrap_or_default(),
            durable: bool_at(raw, &["durable"]),
            auto_delete: bool_at(raw, &["auto_delete"]),
            internal: bool_at(raw, &["internal"]),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingSnapshot {
    pub source: String,
    pub namespace: String,
    pub destination: String,
    pub destination_type: String,
    pub routing_key: String,
    pub arguments: Map<String, Value>,
}

impl BindingSnapshot {
    pub fn from_management(raw: &Value) -> Option<Self> {
        Some(Self {
            // The default exchange binds with an empty source name
            source: str_at(raw, &["source"]).unwrap_or_default(),
            namespace: str_at(raw, &["vhost"]).unwrap_or_else(|| "/".to_string()),
            destination: str_at(raw, &["destination"])?,
            destination_type: str_at(raw, &["destination_type"]).unwrap_or_default(),
            routing_key: str_at(raw, &["routing_key"]).unwrap_or_default(),
            arguments: raw
                .get("arguments")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectTotals {
    pub connections: u64,
    pub channels: u64,
    pub exchanges: u64,
    pub queues: u64,
    pub consumers: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueTotals {
    pub messages: u64,
    pub messages_ready: u64,
    pub messages_unacked: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub cluster_name: String,
    pub broker_version: String,
    pub management_version: String,
    pub erlang_version: String,
    pub object_totals: ObjectTotals,
    pub queue_totals: QueueTotals,
    pub health: HealthReport,
}

impl Overview {
    pub fn from_management(raw: &Value, health: HealthReport) -> Self {
        Self {
            cluster_name: str_at(raw, &["cluster_name"]).unwrap_or_default(),
            broker_version: str_at(raw, &["rabbitmq_version"]).unwrap_or_default(),
            management_version: str_at(raw, &["management_version"]).unwrap_or_default(),
            erlang_version: str_at(raw, &["erlang_version"]).unwrap_or_default(),
            object_totals: ObjectTotals {
                connections: u64_at(raw, &["object_totals", "connections"]),
                channels: u64_at(raw, &["object_totals", "channels"]),
                exchanges: u64_at(raw, &["object_totals", "exchanges"]),
                queues: u64_at(raw, &["object_totals", "queues"]),
                consumers: u64_at(raw, &["object_totals", "consumers"]),
            },
            queue_totals: QueueTotals {
                messages: u64_at(raw, &["queue_totals", "messages"]),
                messages_ready: u64_at(raw, &["queue_totals", "messages_ready"]),
                messages_unacked: u64_at(raw, &["queue_totals", "messages_unacknowledged"]),
            },
            health,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PurgeOutcome {
    pub transport: TransportKind,
    /// Only the protocol reports a count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purged: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PublishOutcome {
    pub transport: TransportKind,
    /// Protocol: accepted by the channel. Control plane: routed to at least one queue.
    pub routed: bool,
}

/// Push payload delivered to subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub overview: Overview,
    pub queues: Vec<QueueSnapshot>,
    pub health: HealthReport,
    pub generated_at: DateTime<Utc>,
}

/// Parse a management list response, skipping entries that lack required fields
pub fn parse_list<T>(raw: &Value, parse: impl Fn(&Value) -> Option<T>) -> BrokerResult<Vec<T>> {
    let items = raw
        .as_array()
        .ok_or_else(|| BrokerError::InvalidResponse("expected a JSON array".to_string()))?;
    Ok(items.iter().filter_map(parse).collect())
}

/// Message as returned by the management API's queue get endpoint
pub fn message_from_management(raw: &Value) -> BrokerResult<Message> {
    let payload = str_at(raw, &["payload"]).unwrap_or_default();
    let bytes = match str_at(raw, &["payload_encoding"]).as_deref() {
        Some("base64") => BASE64
            .decode(payload.as_bytes())
            .map_err(|e| BrokerError::InvalidResponse(format!("bad base64 payload: {}", e)))?,
        _ => payload.into_bytes(),
    };

    let properties = match raw.get("properties") {
        // The API sends [] instead of {} when a message has no properties
        Some(Value::Object(_)) => serde_json::from_value::<MessageProperties>(raw["properties"].clone())?,
        _ => MessageProperties::default(),
    };

    Ok(Message {
        payload: MessagePayload::parse(&bytes),
        properties,
        routing_key: str_at(raw, &["routing_key"]).unwrap_or_default(),
        exchange: str_at(raw, &["exchange"]).unwrap_or_default(),
        redelivered: bool_at(raw, &["redelivered"]),
    })
}

/// Properties in the management API's snake_case form
pub fn properties_to_management(props: &MessageProperties) -> Value {
    let mut map = props.extra.clone();
    if let Some(v) = &props.content_type {
        map.insert("content_type".to_string(), Value::from(v.clone()));
    }
    if let Some(v) = &props.message_id {
        map.insert("message_id".to_string(), Value::from(v.clone()));
    }
    if let Some(v) = &props.correlation_id {
        map.insert("correlation_id".to_string(), Value::from(v.clone()));
    }
    if let Some(v) = props.timestamp {
        map.insert("timestamp".to_string(), Value::from(v));
    }
    if let Some(v) = &props.headers {
        map.insert("headers".to_string(), Value::Object(v.clone()));
    }
    if let Some(v) = props.delivery_mode {
        map.insert("delivery_mode".to_string(), Value::from(v));
    }
    Value::Object(map)
}

fn at<'a>(raw: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(raw, |value, key| value.get(*key))
}

fn str_at(raw: &Value, path: &[&str]) -> Option<String> {
    at(raw, path).and_then(Value::as_str).map(str::to_string)
}

fn u64_at(raw: &Value, path: &[&str]) -> u64 {
    at(raw, path).and_then(Value::as_u64).unwrap_or(0)
}

fn f64_at(raw: &Value, path: &[&str]) -> f64 {
    at(raw, path).and_then(Value::as_f64).unwrap_or(0.0)
}

fn bool_at(raw: &Value, path: &[&str]) -> bool {
    at(raw, path).and_then(Value::as_bool).unwrap_or(false)
}
