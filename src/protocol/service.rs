use crate::config::Config;
use crate::logger::{self, LogLevel, LogTag};
use crate::protocol::{LinkEvent, LinkState, ProtocolLink};
use crate::services::{Service, ServiceHealth};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// ProtocolService - owns the lifecycle of the shared protocol link
///
/// Connects at start (a failed first attempt is not fatal: the link schedules its
/// own reconnects), follows link events until shutdown and closes the link at stop.
/// Disabled when HTTP-only mode is configured.
pub struct ProtocolService {
    link: Arc<ProtocolLink>,
}

impl ProtocolService {
    pub fn new(link: Arc<ProtocolLink>) -> Self {
        Self { link }
    }

    async fn follow_events(mut events: broadcast::Receiver<LinkEvent>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => log_event(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        logger::debug(
                            LogTag::Protocol,
                            &format!("Event follower lagged, skipped {} event(s)", skipped),
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }
}

fn log_event(event: &LinkEvent) {
    let (level, fields) = match event {
        LinkEvent::Connected => (LogLevel::Debug, vec![("event", "connected".to_string())]),
        LinkEvent::Disconnected => (LogLevel::Debug, vec![("event", "disconnected".to_string())]),
        LinkEvent::Error(reason) => (
            LogLevel::Debug,
            vec![("event", "error".to_string()), ("reason", reason.clone())],
        ),
        LinkEvent::Reconnecting { attempt, delay } => (
            LogLevel::Debug,
            vec![
                ("event", "reconnecting".to_string()),
                ("attempt", attempt.to_string()),
                ("delay_ms", delay.as_millis().to_string()),
            ],
        ),
        LinkEvent::MaxRetriesExceeded { attempts } => (
            LogLevel::Warning,
            vec![
                ("event", "max_retries_exceeded".to_string()),
                ("attempts", attempts.to_string()),
            ],
        ),
    };
    logger::with_fields(level, LogTag::Protocol, "Link event", &fields);
}

#[async_trait]
impl Service for ProtocolService {
    fn name(&self) -> &'static str {
        "protocol"
    }

    fn priority(&self) -> i32 {
        20
    }

    fn is_enabled(&self, config: &Config) -> bool {
        config.protocol.enabled
    }

    async fn start(
        &mut self,
        shutdown: CancellationToken,
    ) -> Result<Vec<JoinHandle<()>>, String> {
        // Subscribe first so the outcome of the first connect is followed too
        let events = self.link.subscribe();
        let handle = tokio::spawn(Self::follow_events(events, shutdown));

        if !self.link.connect().await {
            logger::warning(
                LogTag::Protocol,
                &format!(
                    "Initial connect did not succeed ({}); serving via control plane meanwhile",
                    self.link.state()
                ),
            );
        }
        Ok(vec![handle])
    }

    async fn stop(&mut self) -> Result<(), String> {
        self.link.close().await;
        Ok(())
    }

    async fn health(&self) -> ServiceHealth {
        match self.link.state() {
            LinkState::Connected => ServiceHealth::Healthy,
            LinkState::Connecting => ServiceHealth::Starting,
            state if state.is_exhausted() => ServiceHealth::Unhealthy(state.to_string()),
            state => ServiceHealth::Degraded(state.to_string()),
        }
    }
}
