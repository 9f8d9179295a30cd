//! Shared connectivity state and its change stream
//!
//! One instance per process. The protocol link and the control-plane client
//! each write their half of ConnectionHealth; every write re-derives the
//! tri-state status and broadcasts a ConnectivityChange when it moved.
use super::types::{
    ConnectionHealth, ConnectivityChange, ConnectivityStatus, ControlPlaneSignal, HealthReport,
    ProtocolHealthUpdate,
};
use crate::logger::{self, LogTag};
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;

const CHANGE_BUFFER: usize = 64;

pub struct ConnectivityState {
    health: RwLock<ConnectionHealth>,
    changes: broadcast::Sender<ConnectivityChange>,
}

impl ConnectivityState {
    pub fn new() -> Arc<Self> {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Arc::new(Self {
            health: RwLock::new(ConnectionHealth::default()),
            changes,
        })
    }

    pub fn status(&self) -> ConnectivityStatus {
        self.health.read().status()
    }

    pub fn health(&self) -> ConnectionHealth {
        self.health.read().clone()
    }

    pub fn report(&self) -> HealthReport {
        HealthReport::from(&*self.health.read())
    }

    /// Stream of status transitions; lagging receivers skip to the newest change
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityChange> {
        self.changes.subscribe()
    }

    pub(crate) fn record_protocol(&self, update: ProtocolHealthUpdate) {
        self.update(|health| {
            health.protocol_connected = update.connected;
            health.retry_count = update.retry_count;
            health.next_retry_at = update.next_retry_at;
            health.protocol_exhausted = update.exhausted;
        });
    }

    pub(crate) fn record_control_plane(&self, signal: &ControlPlaneSignal) {
        self.update(|health| {
            if let Some(reachable) = signal.reachability() {
                health.control_plane_connected = reachable;
            }
            health.last_control_plane_signal = Some(signal.clone());
        });
    }

    fn update(&self, apply: impl FnOnce(&mut ConnectionHealth)) {
        let change = {
            let mut health = self.health.write();
            let previous = health.status();
            apply(&mut health);
            health.updated_at = Some(Utc::now());
            let current = health.status();

            (previous != current).then(|| ConnectivityChange {
                previous,
                current,
                health: health.clone(),
                at: Utc::now(),
            })
        };

        if let Some(change) = change {
            log_transition(&change);
            // No receivers is fine
            let _ = self.changes.send(change);
        }
    }
}

fn log_transition(change: &ConnectivityChange) {
    let message = format!(
        "Connectivity {} -> {} (protocol={}, control_plane={}, retries={})",
        change.previous,
        change.current,
        change.health.protocol_connected,
        change.health.control_plane_connected,
        change.health.retry_count
    );

    match change.current {
        ConnectivityStatus::Down => logger::error(LogTag::Connectivity, &message),
        ConnectivityStatus::Degraded => logger::warning(LogTag::Connectivity, &message),
        ConnectivityStatus::Up => logger::info(LogTag::Connectivity, &message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected_protocol() -> ProtocolHealthUpdate {
        ProtocolHealthUpdate {
            connected: true,
            ..ProtocolHealthUpdate::default()
        }
    }

    #[tokio::test]
    async fn test_transitions_are_broadcast_once() {
        let state = ConnectivityState::new();
        let mut rx = state.subscribe();

        assert_eq!(state.status(), ConnectivityStatus::Down);

        state.record_control_plane(&ControlPlaneSignal::Recovered);
        let change = rx.recv().await.unwrap();
        assert_eq!(change.previous, ConnectivityStatus::Down);
        assert_eq!(change.current, ConnectivityStatus::Degraded);

        // Same status again: nothing broadcast
        state.record_control_plane(&ControlPlaneSignal::Recovered);

        state.record_protocol(connected_protocol());
        let change = rx.recv().await.unwrap();
        assert_eq!(change.current, ConnectivityStatus::Up);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_request_setup_does_not_change_reachability() {
        let state = ConnectivityState::new();
        state.record_control_plane(&ControlPlaneSignal::Recovered);
        state.record_control_plane(&ControlPlaneSignal::RequestSetup {
            reason: "invalid header".to_string(),
        });

        let health = state.health();
        assert!(health.control_plane_connected);
        assert!(matches!(
            health.last_control_plane_signal,
            Some(ControlPlaneSignal::RequestSetup { .. })
        ));
    }

    #[tokio::test]
    async fn test_exhausted_protocol_reports_down() {
        let state = ConnectivityState::new();
        state.record_control_plane(&ControlPlaneSignal::Recovered);
        state.record_protocol(ProtocolHealthUpdate {
            connected: false,
            retry_count: 5,
            next_retry_at: None,
            exhausted: true,
        });

        let report = state.report();
        assert_eq!(report.status, ConnectivityStatus::Down);
        assert_eq!(report.retry_count, 5);
        assert!(report.control_plane_connected);
    }
}
