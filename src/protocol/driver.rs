use super::types::{MessageProperties, QueueCounts, RawDelivery};
use crate::errors::BrokerResult;
use async_trait::async_trait;
use tokio::sync::oneshot;

/// A freshly opened connection with its single channel
pub struct ProtocolConnection {
    pub session: Box<dyn ProtocolSession>,
    /// Resolves with a reason when the connection fails; dropped senders mean
    /// the connection went away without one
    pub lost: oneshot::Receiver<String>,
}

/// Opens protocol connections
///
/// The link owns reconnect policy; a driver only knows how to open one connection.
#[async_trait]
pub trait ProtocolDriver: Send + Sync {
    /// Namespace (virtual host) every connection is bound to
    fn namespace(&self) -> &str;

    /// Endpoint description for logs, without credentials
    fn endpoint(&self) -> String;

    async fn connect(&self) -> BrokerResult<ProtocolConnection>;
}

/// Primitives available on an open channel
///
/// Not safe for concurrent use; the link serializes every call.
#[async_trait]
pub trait ProtocolSession: Send + Sync {
    /// Connection and channel are both open
    fn is_open(&self) -> bool;

    /// The connection is alive, even if its channel was closed
    fn is_connection_open(&self) -> bool;

    /// Replace a channel the broker closed with a fresh one on the same connection
    async fn reopen_channel(&self) -> BrokerResult<()>;

    /// Fetch up to `count` messages and requeue them
    async fn get(&self, queue: &str, count: u32) -> BrokerResult<Vec<RawDelivery>>;

    /// Remove every ready message, returning how many were purged
    async fn purge(&self, queue: &str) -> BrokerResult<u32>;

    /// Hand a message to the channel; true means the channel accepted it
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: &MessageProperties,
    ) -> BrokerResult<bool>;

    async fn inspect(&self, queue: &str) -> BrokerResult<QueueCounts>;

    /// Close channel then connection
    async fn close(&self) -> BrokerResult<()>;
}
