//! lapin-backed protocol driver
//!
//! One connection, one channel. Connection errors reported by lapin are
//! forwarded once through the `lost` channel handed to the link. Channel-level
//! exceptions close only the channel, which can be reopened in place.
use super::driver::{ProtocolConnection, ProtocolDriver, ProtocolSession};
use super::types::{MessageProperties, QueueCounts, RawDelivery};
use crate::config::BrokerCredentials;
use crate::errors::{BrokerError, BrokerResult};
use crate::logger::{self, LogTag};
use async_trait::async_trait;
use lapin::options::{
    BasicGetOptions, BasicNackOptions, BasicPublishOptions, QueueDeclareOptions,
    QueuePurgeOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::uri::AMQPUri;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use parking_lot::Mutex;
use serde_json::{Map, Number, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

const REPLY_SUCCESS: u16 = 200;

pub struct AmqpDriver {
    uri: AMQPUri,
    endpoint: String,
    connect_timeout: Duration,
}

impl AmqpDriver {
    /// Endpoint and namespace come from the URL that is dialed, so an explicit
    /// `protocol_url` wins over `broker.host` and `broker.vhost`
    pub fn new(credentials: &BrokerCredentials, connect_timeout: Duration) -> BrokerResult<Self> {
        let url = credentials.protocol_url().map_err(BrokerError::Config)?;
        let uri: AMQPUri = url
            .parse()
            .map_err(|e| BrokerError::Config(format!("Invalid protocol URL: {}", e)))?;

        if uri.vhost != credentials.vhost() {
            logger::warning(
                LogTag::Config,
                &format!(
                    "Protocol URL targets vhost '{}' but broker.vhost is '{}'; using '{}'",
                    uri.vhost,
                    credentials.vhost(),
                    uri.vhost
                ),
            );
        }

        Ok(Self {
            endpoint: format!("{}:{}", uri.authority.host, uri.authority.port),
            uri,
            connect_timeout,
        })
    }
}

#[async_trait]
impl ProtocolDriver for AmqpDriver {
    fn namespace(&self) -> &str {
        &self.uri.vhost
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    async fn connect(&self) -> BrokerResult<ProtocolConnection> {
        let connection = tokio::time::timeout(
            self.connect_timeout,
            Connection::connect_uri(self.uri.clone(), ConnectionProperties::default()),
        )
        .await
        .map_err(|_| {
            BrokerError::Protocol(format!(
                "Connection to {} timed out after {}s",
                self.endpoint,
                self.connect_timeout.as_secs()
            ))
        })??;

        let (lost_tx, lost_rx) = oneshot::channel();
        let lost_tx = Arc::new(Mutex::new(Some(lost_tx)));
        connection.on_error(move |err| {
            logger::debug(
                LogTag::Protocol,
                &format!("Connection error reported by client: {}", err),
            );
            if let Some(tx) = lost_tx.lock().take() {
                let _ = tx.send(err.to_string());
            }
        });

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = connection.close(REPLY_SUCCESS, "channel setup failed").await;
                return Err(e.into());
            }
        };

        Ok(ProtocolConnection {
            session: Box::new(AmqpSession {
                connection,
                channel: Mutex::new(channel),
            }),
            lost: lost_rx,
        })
    }
}

struct AmqpSession {
    connection: Connection,
    channel: Mutex<Channel>,
}

impl AmqpSession {
    fn channel(&self) -> Channel {
        self.channel.lock().clone()
    }
}

#[async_trait]
impl ProtocolSession for AmqpSession {
    fn is_open(&self) -> bool {
        self.connection.status().connected() && self.channel.lock().status().connected()
    }

    fn is_connection_open(&self) -> bool {
        self.connection.status().connected()
    }

    async fn reopen_channel(&self) -> BrokerResult<()> {
        let channel = self.connection.create_channel().await?;
        *self.channel.lock() = channel;
        Ok(())
    }

    async fn get(&self, queue: &str, count: u32) -> BrokerResult<Vec<RawDelivery>> {
        let channel = self.channel();
        let mut deliveries = Vec::new();
        let mut last_tag = None;

        for _ in 0..count {
            let fetched = channel
                .basic_get(queue, BasicGetOptions { no_ack: false })
                .await?;
            let Some(message) = fetched else {
                break;
            };

            let delivery = message.delivery;
            last_tag = Some(delivery.delivery_tag);
            deliveries.push(RawDelivery {
                data: delivery.data,
                properties: properties_from_amqp(&delivery.properties),
                routing_key: delivery.routing_key.as_str().to_string(),
                exchange: delivery.exchange.as_str().to_string(),
                redelivered: delivery.redelivered,
            });
        }

        // Peeking must not consume: hand everything back in one nack
        if let Some(tag) = last_tag {
            channel
                .basic_nack(
                    tag,
                    BasicNackOptions {
                        multiple: true,
                        requeue: true,
                    },
                )
                .await?;
        }

        Ok(deliveries)
    }

    async fn purge(&self, queue: &str) -> BrokerResult<u32> {
        Ok(self
            .channel()
            .queue_purge(queue, QueuePurgeOptions::default())
            .await?)
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: &MessageProperties,
    ) -> BrokerResult<bool> {
        // Not waiting for the publisher confirm: acceptance by the channel is the result
        self.channel()
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                properties_to_amqp(properties),
            )
            .await?;
        Ok(true)
    }

    async fn inspect(&self, queue: &str) -> BrokerResult<QueueCounts> {
        let declared = self
            .channel()
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    passive: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        Ok(QueueCounts {
            messages: u64::from(declared.message_count()),
            consumers: u64::from(declared.consumer_count()),
        })
    }

    async fn close(&self) -> BrokerResult<()> {
        let channel = self.channel();
        if channel.status().connected() {
            if let Err(e) = channel.close(REPLY_SUCCESS, "closing").await {
                logger::debug(LogTag::Protocol, &format!("Channel close failed: {}", e));
            }
        }
        if self.connection.status().connected() {
            self.connection.close(REPLY_SUCCESS, "closing").await?;
        }
        Ok(())
    }
}

fn properties_from_amqp(props: &BasicProperties) -> MessageProperties {
    MessageProperties {
        content_type: props.content_type().as_ref().map(|s| s.as_str().to_string()),
        message_id: props.message_id().as_ref().map(|s| s.as_str().to_string()),
        correlation_id: props
            .correlation_id()
            .as_ref()
            .map(|s| s.as_str().to_string()),
        timestamp: *props.timestamp(),
        headers: props.headers().as_ref().map(field_table_to_json),
        delivery_mode: *props.delivery_mode(),
        extra: Map::new(),
    }
}

fn properties_to_amqp(props: &MessageProperties) -> BasicProperties {
    let mut amqp = BasicProperties::default();
    if let Some(content_type) = &props.content_type {
        amqp = amqp.with_content_type(ShortString::from(content_type.clone()));
    }
    if let Some(message_id) = &props.message_id {
        amqp = amqp.with_message_id(ShortString::from(message_id.clone()));
    }
    if let Some(correlation_id) = &props.correlation_id {
        amqp = amqp.with_correlation_id(ShortString::from(correlation_id.clone()));
    }
    if let Some(timestamp) = props.timestamp {
        amqp = amqp.with_timestamp(timestamp);
    }
    if let Some(mode) = props.delivery_mode {
        amqp = amqp.with_delivery_mode(mode);
    }
    if let Some(headers) = &props.headers {
        amqp = amqp.with_headers(json_to_field_table(headers));
    }
    amqp
}

fn field_table_to_json(table: &FieldTable) -> Map<String, Value> {
    table
        .inner()
        .iter()
        .map(|(key, value)| (key.as_str().to_string(), amqp_value_to_json(value)))
        .collect()
}

fn amqp_value_to_json(value: &AMQPValue) -> Value {
    match value {
        AMQPValue::Boolean(b) => Value::Bool(*b),
        AMQPValue::ShortShortInt(v) => Value::from(*v),
        AMQPValue::ShortShortUInt(v) => Value::from(*v),
        AMQPValue::ShortInt(v) => Value::from(*v),
        AMQPValue::ShortUInt(v) => Value::from(*v),
        AMQPValue::LongInt(v) => Value::from(*v),
        AMQPValue::LongUInt(v) => Value::from(*v),
        AMQPValue::LongLongInt(v) => Value::from(*v),
        AMQPValue::Float(v) => Number::from_f64(f64::from(*v)).map_or(Value::Null, Value::Number),
        AMQPValue::Double(v) => Number::from_f64(*v).map_or(Value::Null, Value::Number),
        AMQPValue::Timestamp(v) => Value::from(*v),
        AMQPValue::ShortString(s) => Value::String(s.as_str().to_string()),
        AMQPValue::LongString(s) => Value::String(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        AMQPValue::FieldTable(t) => Value::Object(field_table_to_json(t)),
        AMQPValue::Void => Value::Null,
        other => Value::String(format!("{:?}", other)),
    }
}

fn json_to_field_table(headers: &Map<String, Value>) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in headers {
        table.insert(ShortString::from(key.clone()), json_to_amqp_value(value));
    }
    table
}

fn json_to_amqp_value(value: &Value) -> AMQPValue {
    match value {
        Value::Null => AMQPValue::Void,
        Value::Bool(b) => AMQPValue::Boolean(*b),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => AMQPValue::LongLongInt(i),
            (None, Some(f)) => AMQPValue::Double(f),
            (None, None) => AMQPValue::LongString(LongString::from(n.to_string())),
        },
        Value::String(s) => AMQPValue::LongString(LongString::from(s.clone())),
        Value::Object(map) => AMQPValue::FieldTable(json_to_field_table(map)),
        Value::Array(_) => AMQPValue::LongString(LongString::from(value.to_string())),
    }
}
