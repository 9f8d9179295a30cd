//! brokerwatch - dual-transport connection and aggregation layer for AMQP brokers
//!
//! A persistent protocol link (`protocol`) and a cached management API client
//! (`control_plane`) feed the `aggregator`, which prefers the protocol link and
//! falls back to the management API. The `scheduler` pushes snapshots to
//! subscribers, and `connectivity` folds the health of both transports into a
//! single UP/DEGRADED/DOWN status.

pub mod aggregator;
pub mod arguments;
pub mod config;
pub mod connectivity;
pub mod control_plane;
pub mod errors;
pub mod logger;
pub mod protocol;
pub mod runtime;
pub mod scheduler;
pub mod services;
pub mod timer;

#[cfg(test)]
mod testing;
