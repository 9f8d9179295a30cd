use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Message body as delivered to callers: decoded JSON when the bytes parse,
/// the raw text otherwise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessagePayload {
    Json(Value),
    Text(String),
}

impl MessagePayload {
    /// Attempt a JSON decode, silently falling back to (lossy) text
    pub fn parse(bytes: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(value) => MessagePayload::Json(value),
            Err(_) => MessagePayload::Text(String::from_utf8_lossy(bytes).into_owned()),
        }
    }
}

/// Serialize an outgoing payload: strings pass through, anything else is JSON-encoded
pub fn encode_payload(payload: &Value) -> Vec<u8> {
    match payload {
        Value::String(text) => text.as_bytes().to_vec(),
        other => other.to_string().into_bytes(),
    }
}

/// Message properties; well-known keys are typed, the rest stay in `extra`
///
/// Accepts both camelCase and the management API's snake_case on input,
/// always emits camelCase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageProperties {
    #[serde(default, alias = "content_type", skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, alias = "message_id", skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, alias = "correlation_id", skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Map<String, Value>>,
    #[serde(default, alias = "delivery_mode", skip_serializing_if = "Option::is_none")]
    pub delivery_mode: Option<u8>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Delivery as handed over by a protocol session, before payload decoding
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDelivery {
    pub data: Vec<u8>,
    pub properties: MessageProperties,
    pub routing_key: String,
    pub exchange: String,
    pub redelivered: bool,
}

/// Delivered message wire shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub payload: MessagePayload,
    pub properties: MessageProperties,
    pub routing_key: String,
    pub exchange: String,
    pub redelivered: bool,
}

impl From<RawDelivery> for Message {
    fn from(raw: RawDelivery) -> Self {
        Self {
            payload: MessagePayload::parse(&raw.data),
            properties: raw.properties,
            routing_key: raw.routing_key,
            exchange: raw.exchange,
            redelivered: raw.redelivered,
        }
    }
}

/// Live counters for one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub messages: u64,
    pub consumers: u64,
}
