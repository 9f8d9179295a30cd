use crate::config::Config;
use crate::connectivity::{ConnectivityState, ConnectivityStatus};
use crate::control_plane::ControlPlaneClient;
use crate::logger::{self, LogTag};
use crate::services::{Service, ServiceHealth};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// ConnectivityService - keeps the control-plane half of ConnectionHealth current
///
/// Regular traffic already reports into ConnectivityState, but an idle process
/// makes no calls. The probe is an uncached `GET /overview` on a fixed interval,
/// so a broker outage is noticed (and recovery reported) without any subscriber.
pub struct ConnectivityService {
    client: Arc<ControlPlaneClient>,
    connectivity: Arc<ConnectivityState>,
    interval: Duration,
}

impl ConnectivityService {
    pub fn new(
        client: Arc<ControlPlaneClient>,
        connectivity: Arc<ConnectivityState>,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            connectivity,
            interval,
        }
    }

    async fn probe_loop(
        client: Arc<ControlPlaneClient>,
        period: Duration,
        shutdown: CancellationToken,
    ) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        logger::info(
            LogTag::Connectivity,
            &format!(
                "Starting control plane probe (interval={}s)",
                period.as_secs()
            ),
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    logger::info(LogTag::Connectivity, "Control plane probe stopping");
                    break;
                }
                _ = ticker.tick() => {
                    // Outcome is recorded by the client itself
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        result = client.probe() => {
                            if let Err(e) = result {
                                logger::debug(LogTag::Connectivity, &format!("Probe failed: {}", e));
                            }
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Service for ConnectivityService {
    fn name(&self) -> &'static str {
        "connectivity"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn is_enabled(&self, config: &Config) -> bool {
        config.connectivity.probe_interval_secs > 0
    }

    async fn start(
        &mut self,
        shutdown: CancellationToken,
    ) -> Result<Vec<JoinHandle<()>>, String> {
        let handle = tokio::spawn(Self::probe_loop(
            self.client.clone(),
            self.interval,
            shutdown,
        ));
        Ok(vec![handle])
    }

    async fn health(&self) -> ServiceHealth {
        match self.connectivity.status() {
            ConnectivityStatus::Up => ServiceHealth::Healthy,
            ConnectivityStatus::Degraded => {
                ServiceHealth::Degraded("protocol link unavailable".to_string())
            }
            ConnectivityStatus::Down => {
                ServiceHealth::Unhealthy("control plane unreachable".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTransport;
    use reqwest::Method;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_probe_tracks_control_plane_until_shutdown() {
        let transport = FakeTransport::new();
        transport.respond(Method::GET, "/overview", Ok(json!({"cluster_name": "rabbit@mq1"})));
        let connectivity = ConnectivityState::new();
        let client = Arc::new(ControlPlaneClient::new(
            transport.clone(),
            Duration::from_secs(5),
            connectivity.clone(),
        ));
        let mut service =
            ConnectivityService::new(client, connectivity.clone(), Duration::from_secs(10));
        let shutdown = CancellationToken::new();

        let handles = service.start(shutdown.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(25)).await;

        assert_eq!(transport.call_count(Method::GET, "/overview"), 3);
        assert!(connectivity.health().control_plane_connected);
        // Protocol never connected
        assert!(matches!(service.health().await, ServiceHealth::Degraded(_)));

        shutdown.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.call_count(Method::GET, "/overview"), 3);
    }
}
