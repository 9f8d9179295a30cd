//! Persistent protocol link with exponential-backoff reconnection
//!
//! State lives in one `LinkState` value guarded by a sync mutex and is only
//! changed by methods on this type. A generation counter invalidates callbacks
//! (connect results, loss watchers, backoff timers) that belong to a connection
//! the link has already moved past.
//!
//! Channel operations are serialized through `op_lock`; the underlying channel
//! is not safe for concurrent use. A channel closed by a channel-level exception
//! (e.g. a passive declare of a missing queue) is reopened on the live
//! connection; only a dead connection leads to a reconnect.
use super::backoff::BackoffPolicy;
use super::driver::{ProtocolConnection, ProtocolDriver, ProtocolSession};
use super::state::{DisconnectReason, LinkEvent, LinkState};
use super::types::{encode_payload, Message, MessageProperties, QueueCounts};
use crate::config::ProtocolConfig;
use crate::connectivity::{ConnectivityState, ProtocolHealthUpdate};
use crate::errors::{BrokerError, BrokerResult};
use crate::logger::{self, LogTag};
use crate::timer::TimerHandle;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct LinkSettings {
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
}

impl LinkSettings {
    pub fn from_config(cfg: &ProtocolConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            backoff: BackoffPolicy::from_config(cfg),
        }
    }
}

struct LinkInner {
    state: LinkState,
    retry_count: u32,
    generation: u64,
    session: Option<Arc<dyn ProtocolSession>>,
    reconnect_timer: Option<TimerHandle>,
    watcher: Option<TimerHandle>,
    channel_recovery: Option<TimerHandle>,
}

pub struct ProtocolLink {
    me: Weak<ProtocolLink>,
    driver: Arc<dyn ProtocolDriver>,
    settings: LinkSettings,
    connectivity: Arc<ConnectivityState>,
    inner: Mutex<LinkInner>,
    op_lock: AsyncMutex<()>,
    events: broadcast::Sender<LinkEvent>,
}

impl ProtocolLink {
    pub fn new(
        driver: Arc<dyn ProtocolDriver>,
        settings: LinkSettings,
        connectivity: Arc<ConnectivityState>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            driver,
            settings,
            connectivity,
            inner: Mutex::new(LinkInner {
                state: LinkState::Disconnected(DisconnectReason::NotStarted),
                retry_count: 0,
                generation: 0,
                session: None,
                reconnect_timer: None,
                watcher: None,
                channel_recovery: None,
            }),
            op_lock: AsyncMutex::new(()),
            events,
        })
    }

    /// Namespace (virtual host) this link is bound to
    pub fn namespace(&self) -> &str {
        self.driver.namespace()
    }

    pub fn state(&self) -> LinkState {
        self.inner.lock().state.clone()
    }

    pub fn retry_count(&self) -> u32 {
        self.inner.lock().retry_count
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().state.is_connected()
    }

    /// Connection and channel both exist and are open
    ///
    /// A closed channel on a connected link schedules a reopen in the background.
    pub fn is_channel_available(&self) -> bool {
        let available = {
            let inner = self.inner.lock();
            inner.state.is_connected() && inner.session.as_ref().map_or(false, |s| s.is_open())
        };
        if !available {
            self.schedule_channel_recovery();
        }
        available
    }

    pub fn is_exhausted(&self) -> bool {
        self.inner.lock().state.is_exhausted()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    /// Open a connection and channel
    ///
    /// Returns false without side effects while another attempt is in flight.
    /// A failed attempt emits `Error` and schedules a reconnect.
    pub async fn connect(&self) -> bool {
        let (generation, retry_count) = {
            let mut inner = self.inner.lock();
            match inner.state {
                LinkState::Connecting => {
                    logger::debug(LogTag::Protocol, "Connect skipped: attempt already in flight");
                    return false;
                }
                LinkState::Connected => return true,
                _ => {}
            }

            // An explicit connect supersedes a pending backoff timer
            if let Some(timer) = inner.reconnect_timer.take() {
                timer.cancel();
            }
            inner.generation += 1;
            inner.state = LinkState::Connecting;
            self.sync_health(&inner);
            (inner.generation, inner.retry_count)
        };

        logger::info(
            LogTag::Protocol,
            &format!(
                "Connecting to {} (vhost '{}', retry {})",
                self.driver.endpoint(),
                self.driver.namespace(),
                retry_count
            ),
        );

        match self.driver.connect().await {
            Ok(connection) => self.on_connected(generation, connection).await,
            Err(e) => {
                self.on_connect_failed(generation, e.to_string());
                false
            }
        }
    }

    /// Schedule a reconnect attempt after the backoff delay
    ///
    /// No-op while connecting, while a timer is already pending, after `close()`
    /// and after retries ran out. Returns true when a timer was scheduled.
    pub fn reconnect(&self) -> bool {
        let event = {
            let mut inner = self.inner.lock();
            if inner.state.is_connecting() {
                logger::debug(LogTag::Protocol, "Reconnect skipped: connect in progress");
                return false;
            }
            if inner.reconnect_timer.is_some() {
                logger::debug(LogTag::Protocol, "Reconnect skipped: already scheduled");
                return false;
            }
            if matches!(
                inner.state,
                LinkState::Disconnected(DisconnectReason::Closed)
                    | LinkState::Disconnected(DisconnectReason::MaxRetriesExceeded)
            ) {
                return false;
            }

            if let Some(watcher) = inner.watcher.take() {
                watcher.cancel();
            }
            if let Some(session) = inner.session.take() {
                tokio::spawn(async move {
                    if let Err(e) = session.close().await {
                        logger::debug(LogTag::Protocol, &format!("Ignoring close error: {}", e));
                    }
                });
            }

            if inner.retry_count >= self.settings.max_retries {
                inner.state = LinkState::Disconnected(DisconnectReason::MaxRetriesExceeded);
                self.sync_health(&inner);
                LinkEvent::MaxRetriesExceeded {
                    attempts: inner.retry_count,
                }
            } else {
                let delay = self.settings.backoff.delay_for(inner.retry_count);
                let attempt = inner.retry_count + 1;
                let next_retry_at = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                inner.state = LinkState::Reconnecting {
                    attempt,
                    delay,
                    next_retry_at,
                };

                let me = self.me.clone();
                let generation = inner.generation;
                inner.reconnect_timer = Some(TimerHandle::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(link) = me.upgrade() {
                        link.fire_reconnect(generation).await;
                    }
                }));
                self.sync_health(&inner);
                LinkEvent::Reconnecting { attempt, delay }
            }
        };

        match &event {
            LinkEvent::MaxRetriesExceeded { attempts } => logger::error(
                LogTag::Protocol,
                &format!(
                    "Giving up after {} reconnect attempts; protocol link stays down until restarted",
                    attempts
                ),
            ),
            LinkEvent::Reconnecting { attempt, delay } => logger::warning(
                LogTag::Protocol,
                &format!(
                    "Reconnect attempt {}/{} in {}ms",
                    attempt,
                    self.settings.max_retries,
                    delay.as_millis()
                ),
            ),
            _ => {}
        }

        let scheduled = matches!(event, LinkEvent::Reconnecting { .. });
        self.emit(event);
        scheduled
    }

    /// Reset the retry counter and connect; the way out of MaxRetriesExceeded
    pub async fn restart(&self) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.state.is_connecting() {
                return false;
            }
            if inner.state.is_connected() {
                return true;
            }
            if let Some(timer) = inner.reconnect_timer.take() {
                timer.cancel();
            }
            inner.retry_count = 0;
        }

        logger::info(LogTag::Protocol, "Restarting protocol link");
        self.connect().await
    }

    /// Close channel and connection and cancel every pending timer
    ///
    /// Close-time errors are logged and swallowed. No reconnect follows.
    pub async fn close(&self) {
        let (session, timers) = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            inner.state = LinkState::Disconnected(DisconnectReason::Closed);
            self.sync_health(&inner);
            (
                inner.session.take(),
                [
                    inner.reconnect_timer.take(),
                    inner.watcher.take(),
                    inner.channel_recovery.take(),
                ],
            )
        };

        for timer in timers.into_iter().flatten() {
            timer.cancel();
        }
        if let Some(session) = session {
            if let Err(e) = session.close().await {
                logger::debug(LogTag::Protocol, &format!("Ignoring close error: {}", e));
            }
        }

        logger::info(LogTag::Protocol, "Protocol link closed");
        self.emit(LinkEvent::Disconnected);
    }

    /// Peek up to `count` messages; they stay in the queue
    pub async fn get(&self, queue: &str, count: u32) -> BrokerResult<Vec<Message>> {
        let deliveries = self
            .with_session(move |session| async move { session.get(queue, count).await })
            .await?;
        logger::debug(
            LogTag::Protocol,
            &format!("Peeked {} message(s) from '{}'", deliveries.len(), queue),
        );
        Ok(deliveries.into_iter().map(Message::from).collect())
    }

    pub async fn purge(&self, queue: &str) -> BrokerResult<u32> {
        let purged = self
            .with_session(move |session| async move { session.purge(queue).await })
            .await?;
        logger::info(
            LogTag::Protocol,
            &format!("Purged {} message(s) from '{}'", purged, queue),
        );
        Ok(purged)
    }

    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &Value,
        properties: &MessageProperties,
    ) -> BrokerResult<bool> {
        let body = encode_payload(payload);
        self.with_session(move |session| async move {
            session
                .publish(exchange, routing_key, &body, properties)
                .await
        })
        .await
    }

    pub async fn inspect(&self, queue: &str) -> BrokerResult<QueueCounts> {
        self.with_session(move |session| async move { session.inspect(queue).await })
            .await
    }

    /// Run one channel operation with exclusive channel access
    ///
    /// When the operation fails because the broker closed the channel, the
    /// channel is reopened before the next caller gets its turn.
    async fn with_session<T, F, Fut>(&self, op: F) -> BrokerResult<T>
    where
        F: FnOnce(Arc<dyn ProtocolSession>) -> Fut,
        Fut: Future<Output = BrokerResult<T>>,
    {
        let (_guard, session) = self.ready_session().await?;
        let result = op(session.clone()).await;

        if let Err(e) = &result {
            if !session.is_open() && session.is_connection_open() {
                logger::debug(
                    LogTag::Protocol,
                    &format!("Channel closed by broker ({})", e),
                );
                // A failed reopen is escalated by the next ready_session
                Self::reopen_channel(session.as_ref()).await;
            }
        }
        result
    }

    /// Wait for exclusive channel access and return the open session
    ///
    /// A closed channel is reopened when the connection is still alive;
    /// otherwise the link reconnects and the call fails fast.
    async fn ready_session(
        &self,
    ) -> BrokerResult<(AsyncMutexGuard<'_, ()>, Arc<dyn ProtocolSession>)> {
        let guard = self.op_lock.lock().await;

        let (session, generation) = {
            let inner = self.inner.lock();
            if inner.state.is_exhausted() {
                return Err(BrokerError::MaxRetriesExceeded {
                    attempts: inner.retry_count,
                });
            }
            if !inner.state.is_connected() {
                return Err(BrokerError::ChannelUnavailable);
            }
            match &inner.session {
                Some(session) => (session.clone(), inner.generation),
                None => return Err(BrokerError::ChannelUnavailable),
            }
        };

        if session.is_open() {
            return Ok((guard, session));
        }

        if session.is_connection_open() && Self::reopen_channel(session.as_ref()).await {
            return Ok((guard, session));
        }

        drop(guard);
        self.mark_lost(generation, "channel closed".to_string(), false);
        Err(BrokerError::ChannelUnavailable)
    }

    async fn reopen_channel(session: &dyn ProtocolSession) -> bool {
        match session.reopen_channel().await {
            Ok(()) => {
                logger::info(LogTag::Protocol, "Channel reopened on the live connection");
                true
            }
            Err(e) => {
                logger::warning(LogTag::Protocol, &format!("Channel reopen failed: {}", e));
                false
            }
        }
    }

    /// Reopen a channel that closed between operations
    ///
    /// Callers that see `is_channel_available() == false` skip the protocol
    /// entirely, so without this nothing would ever take the op path again.
    fn schedule_channel_recovery(&self) {
        let mut inner = self.inner.lock();
        if !inner.state.is_connected() {
            return;
        }
        if inner
            .channel_recovery
            .as_ref()
            .map_or(false, |task| !task.is_finished())
        {
            return;
        }
        let Some(session) = inner.session.as_ref() else {
            return;
        };
        if session.is_open() {
            return;
        }

        let me = self.me.clone();
        inner.channel_recovery = Some(TimerHandle::spawn(async move {
            if let Some(link) = me.upgrade() {
                let _ = link.ready_session().await;
            }
        }));
    }

    async fn on_connected(&self, generation: u64, connection: ProtocolConnection) -> bool {
        let ProtocolConnection { session, lost } = connection;
        let session: Arc<dyn ProtocolSession> = Arc::from(session);

        let replaced = {
            let mut inner = self.inner.lock();
            if inner.generation != generation || !inner.state.is_connecting() {
                None
            } else {
                inner.state = LinkState::Connected;
                inner.retry_count = 0;
                let previous = inner.session.replace(session.clone());

                let me = self.me.clone();
                inner.watcher = Some(TimerHandle::spawn(async move {
                    let reason = lost
                        .await
                        .unwrap_or_else(|_| "connection dropped".to_string());
                    if let Some(link) = me.upgrade() {
                        link.mark_lost(generation, reason, true);
                    }
                }));
                self.sync_health(&inner);
                Some(previous)
            }
        };

        let Some(previous) = replaced else {
            // close() or a newer connect won while we were connecting
            logger::debug(LogTag::Protocol, "Discarding connection from a superseded attempt");
            if let Err(e) = session.close().await {
                logger::debug(LogTag::Protocol, &format!("Ignoring close error: {}", e));
            }
            return false;
        };

        if let Some(old) = previous {
            if let Err(e) = old.close().await {
                logger::debug(LogTag::Protocol, &format!("Ignoring close error: {}", e));
            }
        }

        logger::info(
            LogTag::Protocol,
            &format!("Connected to {}", self.driver.endpoint()),
        );
        self.emit(LinkEvent::Connected);
        true
    }

    fn on_connect_failed(&self, generation: u64, reason: String) {
        {
            let mut inner = self.inner.lock();
            if inner.generation != generation || !inner.state.is_connecting() {
                return;
            }
            inner.state = LinkState::Disconnected(DisconnectReason::Lost(reason.clone()));
            self.sync_health(&inner);
        }

        logger::warning(
            LogTag::Protocol,
            &format!("Connection to {} failed: {}", self.driver.endpoint(), reason),
        );
        self.emit(LinkEvent::Error(reason));
        self.reconnect();
    }

    /// The connection or its channel failed underneath us
    ///
    /// `from_watcher` is set when called from the loss watcher task itself,
    /// which must release rather than abort its own handle.
    fn mark_lost(&self, generation: u64, reason: String, from_watcher: bool) {
        let stale_session = {
            let mut inner = self.inner.lock();
            if inner.generation != generation || !inner.state.is_connected() {
                return;
            }
            inner.state = LinkState::Disconnected(DisconnectReason::Lost(reason.clone()));
            if let Some(watcher) = inner.watcher.take() {
                if from_watcher {
                    watcher.detach();
                } else {
                    watcher.cancel();
                }
            }
            self.sync_health(&inner);
            inner.session.take()
        };

        if let Some(session) = stale_session {
            tokio::spawn(async move {
                let _ = session.close().await;
            });
        }

        logger::warning(
            LogTag::Protocol,
            &format!("Protocol connection lost: {}", reason),
        );
        self.emit(LinkEvent::Error(reason));
        self.reconnect();
    }

    async fn fire_reconnect(&self, generation: u64) {
        {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return;
            }
            if let Some(timer) = inner.reconnect_timer.take() {
                timer.detach();
            }
            inner.retry_count += 1;
        }
        self.connect().await;
    }

    /// Publish the protocol half of ConnectionHealth; called with the state lock held
    fn sync_health(&self, inner: &LinkInner) {
        self.connectivity.record_protocol(ProtocolHealthUpdate {
            connected: inner.state.is_connected(),
            retry_count: inner.retry_count,
            next_retry_at: inner.state.next_retry_at(),
            exhausted: inner.state.is_exhausted(),
        });
    }

    fn emit(&self, event: LinkEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::ConnectivityStatus;
    use crate::testing::{ScriptedDriver, ScriptedOutcome};
    use std::time::Duration;

    fn settings(max_retries: u32, base_ms: u64) -> LinkSettings {
        LinkSettings {
            max_retries,
            backoff: BackoffPolicy {
                base: Duration::from_millis(base_ms),
                max_delay: Duration::from_secs(60),
                jitter: Duration::from_millis(1_000),
            },
        }
    }

    fn link_with(driver: &Arc<ScriptedDriver>, s: LinkSettings) -> Arc<ProtocolLink> {
        ProtocolLink::new(driver.clone(), s, ConnectivityState::new())
    }

    async fn next_event(rx: &mut broadcast::Receiver<LinkEvent>) -> LinkEvent {
        tokio::time::timeout(Duration::from_secs(600), rx.recv())
            .await
            .expect("event within timeout")
            .expect("event channel open")
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_success_resets_state() {
        let driver = ScriptedDriver::new(vec![ScriptedOutcome::Succeed]);
        let link = link_with(&driver, settings(5, 100));
        let mut rx = link.subscribe();

        assert!(link.connect().await);
        assert_eq!(next_event(&mut rx).await, LinkEvent::Connected);
        assert!(link.is_connected());
        assert!(link.is_channel_available());
        assert_eq!(link.retry_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_connect_is_rejected() {
        let driver = ScriptedDriver::new(vec![ScriptedOutcome::SucceedAfter(Duration::from_millis(50))]);
        let link = link_with(&driver, settings(5, 100));

        let (first, second) = tokio::join!(link.connect(), link.connect());
        assert!(first);
        assert!(!second);
        assert_eq!(driver.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sequence_and_exhaustion() {
        let driver = ScriptedDriver::always_failing();
        let link = link_with(&driver, settings(5, 100));
        let mut rx = link.subscribe();

        assert!(!link.connect().await);

        let mut delays = Vec::new();
        loop {
            match next_event(&mut rx).await {
                LinkEvent::Reconnecting { attempt, delay } => {
                    assert_eq!(attempt as usize, delays.len() + 1);
                    delays.push(delay);
                }
                LinkEvent::MaxRetriesExceeded { attempts } => {
                    assert_eq!(attempts, 5);
                    break;
                }
                LinkEvent::Error(_) => {}
                other => panic!("unexpected event {:?}", other),
            }
        }

        assert_eq!(delays.len(), 5);
        assert!(delays[2] >= Duration::from_millis(400));
        assert!(delays[2] < Duration::from_millis(1_400));
        assert_eq!(driver.connect_attempts(), 6);
        assert_eq!(link.retry_count(), 5);
        assert!(link.is_exhausted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_down() {
        let driver = ScriptedDriver::always_failing();
        let connectivity = ConnectivityState::new();
        connectivity.record_control_plane(&crate::connectivity::ControlPlaneSignal::Recovered);
        let link = ProtocolLink::new(driver.clone(), settings(1, 10), connectivity.clone());
        let mut rx = link.subscribe();

        link.connect().await;
        assert_eq!(connectivity.status(), ConnectivityStatus::Degraded);

        while !matches!(next_event(&mut rx).await, LinkEvent::MaxRetriesExceeded { .. }) {}
        assert_eq!(connectivity.status(), ConnectivityStatus::Down);
        assert!(connectivity.health().protocol_exhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_is_debounced() {
        let driver = ScriptedDriver::always_failing();
        let link = link_with(&driver, settings(5, 1_000));
        let mut rx = link.subscribe();

        link.connect().await;
        assert!(matches!(next_event(&mut rx).await, LinkEvent::Error(_)));
        assert!(matches!(next_event(&mut rx).await, LinkEvent::Reconnecting { attempt: 1, .. }));

        for _ in 0..5 {
            assert!(!link.reconnect());
        }
        assert!(rx.try_recv().is_err());
        assert!(matches!(link.state(), LinkState::Reconnecting { attempt: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_counter_increments_then_resets() {
        let driver = ScriptedDriver::new(vec![
            ScriptedOutcome::Fail,
            ScriptedOutcome::Fail,
            ScriptedOutcome::Succeed,
        ]);
        let link = link_with(&driver, settings(5, 100));
        let mut rx = link.subscribe();

        link.connect().await;
        assert_eq!(link.retry_count(), 0);

        let mut seen_retries = Vec::new();
        loop {
            match next_event(&mut rx).await {
                LinkEvent::Reconnecting { attempt, .. } => seen_retries.push(attempt),
                LinkEvent::Connected => break,
                _ => {}
            }
        }

        assert_eq!(seen_retries, vec![1, 2]);
        assert_eq!(link.retry_count(), 0);
        assert_eq!(driver.connect_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_pending_reconnect() {
        let driver = ScriptedDriver::always_failing();
        let link = link_with(&driver, settings(5, 100));

        link.connect().await;
        assert!(matches!(link.state(), LinkState::Reconnecting { .. }));

        link.close().await;
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(driver.connect_attempts(), 1);
        assert_eq!(
            link.state(),
            LinkState::Disconnected(DisconnectReason::Closed)
        );
        assert!(!link.reconnect());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_connection_triggers_reconnect() {
        let driver = ScriptedDriver::new(vec![ScriptedOutcome::Succeed, ScriptedOutcome::Succeed]);
        let link = link_with(&driver, settings(5, 100));
        let mut rx = link.subscribe();

        link.connect().await;
        assert_eq!(next_event(&mut rx).await, LinkEvent::Connected);

        driver.drop_connection("heartbeat missed");
        assert_eq!(
            next_event(&mut rx).await,
            LinkEvent::Error("heartbeat missed".to_string())
        );
        assert!(matches!(next_event(&mut rx).await, LinkEvent::Reconnecting { attempt: 1, .. }));
        assert_eq!(next_event(&mut rx).await, LinkEvent::Connected);
        assert_eq!(link.retry_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_leaves_exhausted_state() {
        let driver = ScriptedDriver::new(vec![ScriptedOutcome::Fail, ScriptedOutcome::Succeed]);
        let link = link_with(&driver, settings(0, 100));

        link.connect().await;
        assert!(link.is_exhausted());
        assert!(!link.reconnect());

        assert!(link.restart().await);
        assert!(link.is_connected());
        assert_eq!(link.retry_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operations_require_open_channel() {
        let driver = ScriptedDriver::new(vec![ScriptedOutcome::Succeed, ScriptedOutcome::Succeed]);
        let link = link_with(&driver, settings(5, 100));

        assert!(matches!(
            link.purge("orders").await,
            Err(BrokerError::ChannelUnavailable)
        ));

        link.connect().await;
        driver.broker().set_connection_open(false);
        assert!(matches!(
            link.inspect("orders").await,
            Err(BrokerError::ChannelUnavailable)
        ));
        assert!(matches!(link.state(), LinkState::Reconnecting { .. }));
        assert_eq!(driver.broker().inspect_calls(), 0);
        assert_eq!(driver.broker().call_count("reopen"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_exception_reopens_channel_on_live_connection() {
        let driver = ScriptedDriver::new(vec![ScriptedOutcome::Succeed]);
        driver.broker().fail_queue("gone");
        driver.broker().push_message("orders", b"a");
        let link = link_with(&driver, settings(5, 100));
        link.connect().await;

        assert!(link.inspect("gone").await.is_err());
        assert!(link.is_channel_available());
        assert_eq!(link.inspect("orders").await.unwrap().messages, 1);

        assert!(link.is_connected());
        assert_eq!(driver.connect_attempts(), 1);
        assert_eq!(driver.broker().call_count("reopen"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_closed_between_operations_is_recovered() {
        let driver = ScriptedDriver::new(vec![ScriptedOutcome::Succeed]);
        let link = link_with(&driver, settings(5, 100));
        link.connect().await;

        driver.broker().set_channel_open(false);
        assert!(!link.is_channel_available());
        // Recovery runs in the background
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(link.is_channel_available());
        assert!(link.is_connected());
        assert_eq!(driver.connect_attempts(), 1);
        assert_eq!(driver.broker().call_count("reopen"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operations_after_exhaustion_report_max_retries() {
        let driver = ScriptedDriver::always_failing();
        let link = link_with(&driver, settings(2, 10));
        let mut rx = link.subscribe();

        link.connect().await;
        while !matches!(next_event(&mut rx).await, LinkEvent::MaxRetriesExceeded { .. }) {}

        assert!(matches!(
            link.get("orders", 1).await,
            Err(BrokerError::MaxRetriesExceeded { attempts: 2 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_reconnect_closes_live_session() {
        let driver = ScriptedDriver::new(vec![ScriptedOutcome::Succeed, ScriptedOutcome::Succeed]);
        let link = link_with(&driver, settings(5, 100));
        link.connect().await;

        assert!(link.reconnect());
        // Close runs on its own task; the backoff delay is at least 100ms
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(driver.broker().call_count("close"), 1);
        assert!(!link.is_channel_available());
    }

    #[tokio::test(start_paused = true)]
    async fn test_operations_never_overlap() {
        let driver = ScriptedDriver::new(vec![ScriptedOutcome::Succeed]);
        let broker = driver.broker();
        broker.set_op_delay(Duration::from_millis(20));
        let link = link_with(&driver, settings(5, 100));
        link.connect().await;

        let queues = ["a", "b", "c", "d"];
        let results = futures::future::join_all(queues.iter().map(|q| link.inspect(q))).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(broker.inspect_calls(), 4);
        assert_eq!(broker.max_concurrent_ops(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_decodes_payloads() {
        let driver = ScriptedDriver::new(vec![ScriptedOutcome::Succeed]);
        driver.broker().push_message("orders", br#"{"id":1}"#);
        driver.broker().push_message("orders", b"not json");
        let link = link_with(&driver, settings(5, 100));
        link.connect().await;

        let messages = link.get("orders", 10).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(
            messages[0].payload,
            crate::protocol::MessagePayload::Json(serde_json::json!({"id": 1}))
        );
        assert_eq!(
            messages[1].payload,
            crate::protocol::MessagePayload::Text("not json".to_string())
        );
        // Peek is non-destructive
        assert_eq!(driver.broker().queue_depth("orders"), 2);
    }
}
