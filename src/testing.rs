//! Test doubles for the protocol driver and the HTTP transport
use crate::aggregator::{Aggregator, AggregatorSettings};
use crate::connectivity::ConnectivityState;
use crate::control_plane::{ControlPlaneClient, HttpFailure, HttpTransport};
use crate::errors::{BrokerError, BrokerResult};
use crate::protocol::{
    BackoffPolicy, LinkSettings, MessageProperties, ProtocolConnection, ProtocolDriver,
    ProtocolLink, ProtocolSession, QueueCounts, RawDelivery,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Method;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

// ============================================================================
// PROTOCOL
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub enum ScriptedOutcome {
    Succeed,
    SucceedAfter(Duration),
    Fail,
}

/// Driver whose connect attempts follow a script; attempts past its end fail
pub struct ScriptedDriver {
    script: Mutex<VecDeque<ScriptedOutcome>>,
    attempts: AtomicUsize,
    broker: Arc<FakeBroker>,
    lost: Mutex<Option<oneshot::Sender<String>>>,
}

impl ScriptedDriver {
    pub fn new(script: Vec<ScriptedOutcome>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            attempts: AtomicUsize::new(0),
            broker: Arc::new(FakeBroker::default()),
            lost: Mutex::new(None),
        })
    }

    pub fn always_failing() -> Arc<Self> {
        Self::new(Vec::new())
    }

    pub fn connect_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn broker(&self) -> Arc<FakeBroker> {
        self.broker.clone()
    }

    /// Simulate the broker dropping the current connection
    pub fn drop_connection(&self, reason: &str) {
        if let Some(tx) = self.lost.lock().take() {
            let _ = tx.send(reason.to_string());
        }
    }
}

#[async_trait]
impl ProtocolDriver for ScriptedDriver {
    fn namespace(&self) -> &str {
        "/"
    }

    fn endpoint(&self) -> String {
        "fake-broker:5672".to_string()
    }

    async fn connect(&self) -> BrokerResult<ProtocolConnection> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .lock()
            .pop_front()
            .unwrap_or(ScriptedOutcome::Fail);

        match outcome {
            ScriptedOutcome::Fail => {
                return Err(BrokerError::Protocol("connection refused".to_string()))
            }
            ScriptedOutcome::SucceedAfter(delay) => tokio::time::sleep(delay).await,
            ScriptedOutcome::Succeed => {}
        }

        let (tx, rx) = oneshot::channel();
        *self.lost.lock() = Some(tx);
        self.broker.open_connection();
        Ok(ProtocolConnection {
            session: Box::new(FakeSession {
                broker: self.broker.clone(),
            }),
            lost: rx,
        })
    }
}

#[derive(Default)]
struct BrokerState {
    connection_closed: bool,
    channel_closed: bool,
    queues: HashMap<String, VecDeque<Vec<u8>>>,
    consumers: HashMap<String, u64>,
    failing_queues: HashSet<String>,
    fail_publish: bool,
    published: Vec<(String, String, Vec<u8>)>,
    calls: HashMap<&'static str, usize>,
    op_delay: Option<Duration>,
    in_flight: usize,
    max_in_flight: usize,
}

/// In-memory broker behind every FakeSession of one driver
#[derive(Default)]
pub struct FakeBroker {
    state: Mutex<BrokerState>,
}

impl FakeBroker {
    /// Close or reopen the channel; the connection stays up
    pub fn set_channel_open(&self, open: bool) {
        self.state.lock().channel_closed = !open;
    }

    /// A closed connection takes its channel with it
    pub fn set_connection_open(&self, open: bool) {
        let mut state = self.state.lock();
        state.connection_closed = !open;
        state.channel_closed = !open;
    }

    pub fn push_message(&self, queue: &str, body: &[u8]) {
        self.state
            .lock()
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(body.to_vec());
    }

    pub fn set_consumers(&self, queue: &str, consumers: u64) {
        self.state.lock().consumers.insert(queue.to_string(), consumers);
    }

    /// Operations on `queue` raise a NOT_FOUND channel exception, which
    /// closes the channel the way a real broker does
    pub fn fail_queue(&self, queue: &str) {
        self.state.lock().failing_queues.insert(queue.to_string());
    }

    pub fn fail_publish(&self) {
        self.state.lock().fail_publish = true;
    }

    /// Every channel operation takes this long to complete
    pub fn set_op_delay(&self, delay: Duration) {
        self.state.lock().op_delay = Some(delay);
    }

    /// Most channel operations that were ever in progress at the same time
    pub fn max_concurrent_ops(&self) -> usize {
        self.state.lock().max_in_flight
    }

    pub fn queue_depth(&self, queue: &str) -> usize {
        self.state.lock().queues.get(queue).map_or(0, |q| q.len())
    }

    pub fn published(&self) -> Vec<(String, String, Vec<u8>)> {
        self.state.lock().published.clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.state.lock().calls.get(op).copied().unwrap_or(0)
    }

    pub fn inspect_calls(&self) -> usize {
        self.call_count("inspect")
    }

    fn open_connection(&self) {
        let mut state = self.state.lock();
        state.connection_closed = false;
        state.channel_closed = false;
    }

    fn record(&self, op: &'static str) {
        *self.state.lock().calls.entry(op).or_insert(0) += 1;
    }

    /// Shared preamble of every channel operation
    async fn enter(&self, op: &'static str, queue: Option<&str>) -> BrokerResult<InFlight<'_>> {
        let delay = {
            let mut state = self.state.lock();
            *state.calls.entry(op).or_insert(0) += 1;
            if state.channel_closed {
                return Err(BrokerError::Protocol("channel closed".to_string()));
            }
            if let Some(queue) = queue {
                if state.failing_queues.contains(queue) {
                    state.channel_closed = true;
                    return Err(BrokerError::Protocol(format!(
                        "NOT_FOUND - no queue '{}'",
                        queue
                    )));
                }
            }
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.op_delay
        };

        let in_flight = InFlight { broker: self };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(in_flight)
    }
}

struct InFlight<'a> {
    broker: &'a FakeBroker,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.broker.state.lock().in_flight -= 1;
    }
}

struct FakeSession {
    broker: Arc<FakeBroker>,
}

#[async_trait]
impl ProtocolSession for FakeSession {
    fn is_open(&self) -> bool {
        let state = self.broker.state.lock();
        !state.connection_closed && !state.channel_closed
    }

    fn is_connection_open(&self) -> bool {
        !self.broker.state.lock().connection_closed
    }

    async fn reopen_channel(&self) -> BrokerResult<()> {
        self.broker.record("reopen");
        let mut state = self.broker.state.lock();
        if state.connection_closed {
            return Err(BrokerError::Protocol("connection closed".to_string()));
        }
        state.channel_closed = false;
        Ok(())
    }

    async fn get(&self, queue: &str, count: u32) -> BrokerResult<Vec<RawDelivery>> {
        let _op = self.broker.enter("get", Some(queue)).await?;
        let state = self.broker.state.lock();
        Ok(state
            .queues
            .get(queue)
            .map(|q| {
                q.iter()
                    .take(count as usize)
                    .map(|body| RawDelivery {
                        data: body.clone(),
                        routing_key: queue.to_string(),
                        ..RawDelivery::default()
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn purge(&self, queue: &str) -> BrokerResult<u32> {
        let _op = self.broker.enter("purge", Some(queue)).await?;
        let mut state = self.broker.state.lock();
        let purged = state.queues.get_mut(queue).map_or(0, |q| {
            let n = q.len();
            q.clear();
            n
        });
        Ok(purged as u32)
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        _properties: &MessageProperties,
    ) -> BrokerResult<bool> {
        let _op = self.broker.enter("publish", None).await?;
        let mut state = self.broker.state.lock();
        if state.fail_publish {
            return Err(BrokerError::Protocol("publish rejected by channel".to_string()));
        }
        state
            .published
            .push((exchange.to_string(), routing_key.to_string(), payload.to_vec()));
        Ok(true)
    }

    async fn inspect(&self, queue: &str) -> BrokerResult<QueueCounts> {
        let _op = self.broker.enter("inspect", Some(queue)).await?;
        let state = self.broker.state.lock();
        Ok(QueueCounts {
            messages: state.queues.get(queue).map_or(0, |q| q.len() as u64),
            consumers: state.consumers.get(queue).copied().unwrap_or(0),
        })
    }

    async fn close(&self) -> BrokerResult<()> {
        self.broker.record("close");
        Ok(())
    }
}

// ============================================================================
// HTTP
// ============================================================================

type RouteKey = (Method, String);

/// Canned responses per (method, endpoint); unknown routes answer 404
#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<HashMap<RouteKey, Result<Value, HttpFailure>>>,
    once: Mutex<HashMap<RouteKey, VecDeque<Result<Value, HttpFailure>>>>,
    calls: Mutex<Vec<(Method, String, Option<Value>)>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, method: Method, endpoint: &str, result: Result<Value, HttpFailure>) {
        self.routes
            .lock()
            .insert((method, endpoint.to_string()), result);
    }

    /// Answer the next call only, then fall back to `respond`
    pub fn respond_once(&self, method: Method, endpoint: &str, result: Result<Value, HttpFailure>) {
        self.once
            .lock()
            .entry((method, endpoint.to_string()))
            .or_default()
            .push_back(result);
    }

    pub fn call_count(&self, method: Method, endpoint: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(m, e, _)| *m == method && e == endpoint)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn last_body(&self, method: Method, endpoint: &str) -> Option<Value> {
        self.calls
            .lock()
            .iter()
            .rev()
            .find(|(m, e, _)| *m == method && e == endpoint)
            .and_then(|(_, _, body)| body.clone())
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn send(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Value, HttpFailure> {
        self.calls
            .lock()
            .push((method.clone(), endpoint.to_string(), body.cloned()));

        let key = (method, endpoint.to_string());
        if let Some(result) = self.once.lock().get_mut(&key).and_then(|q| q.pop_front()) {
            return result;
        }
        self.routes
            .lock()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| {
                Err(HttpFailure::Response {
                    status: 404,
                    body: r#"{"error":"Object Not Found","reason":"Not Found"}"#.to_string(),
                })
            })
    }
}

// ============================================================================
// WIRING
// ============================================================================

/// Aggregator whose link never connected; every call goes to `transport`
pub fn offline_aggregator(transport: Arc<FakeTransport>) -> Arc<Aggregator> {
    let connectivity = ConnectivityState::new();
    let link = ProtocolLink::new(
        ScriptedDriver::always_failing(),
        LinkSettings {
            max_retries: 0,
            backoff: BackoffPolicy {
                base: Duration::from_secs(1),
                max_delay: Duration::from_secs(1),
                jitter: Duration::ZERO,
            },
        },
        connectivity.clone(),
    );
    let control_plane = Arc::new(ControlPlaneClient::new(
        transport,
        Duration::from_secs(5),
        connectivity.clone(),
    ));
    Arc::new(Aggregator::new(
        link,
        control_plane,
        connectivity,
        AggregatorSettings {
            protocol_enabled: true,
            enhance_batch_size: 5,
            peek_truncate_bytes: 50_000,
        },
    ))
}
