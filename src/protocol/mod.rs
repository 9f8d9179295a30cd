//! Protocol transport (AMQP 0-9-1)
//!
//! - `link`: the persistent link, its state machine and channel primitives
//! - `driver`: seam between the link and a concrete client library
//! - `amqp`: lapin implementation of the driver
//! - `backoff`: reconnect delay policy
//! - `service`: lifecycle service that connects and closes the link
//! - `state`: link states and lifecycle events
//! - `types`: message and queue counter types

pub mod amqp;
pub mod backoff;
pub mod driver;
pub mod link;
pub mod service;
pub mod state;
pub mod types;

pub use amqp::AmqpDriver;
pub use backoff::BackoffPolicy;
pub use driver::{ProtocolConnection, ProtocolDriver, ProtocolSession};
pub use link::{LinkSettings, ProtocolLink};
pub use service::ProtocolService;
pub use state::{DisconnectReason, LinkEvent, LinkState};
pub use types::{encode_payload, Message, MessagePayload, MessageProperties, QueueCounts, RawDelivery};
