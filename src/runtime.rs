//! Process wiring
//!
//! Builds the single ProtocolLink and the single ControlPlaneClient a process
//! uses, the Aggregator and UpdateScheduler on top of them, and the services
//! that drive their lifecycles.
use crate::aggregator::{Aggregator, AggregatorSettings};
use crate::config::{BrokerCredentials, Config};
use crate::connectivity::{ConnectivityService, ConnectivityState};
use crate::control_plane::{ControlPlaneClient, HttpTransport, ReqwestTransport};
use crate::errors::BrokerResult;
use crate::logger::{self, LogLevel, LogTag};
use crate::protocol::{AmqpDriver, LinkSettings, ProtocolDriver, ProtocolLink, ProtocolService};
use crate::scheduler::UpdateScheduler;
use crate::services::ServiceManager;
use std::sync::Arc;
use std::time::Duration;

pub struct Runtime {
    connectivity: Arc<ConnectivityState>,
    link: Arc<ProtocolLink>,
    control_plane: Arc<ControlPlaneClient>,
    aggregator: Arc<Aggregator>,
    scheduler: Arc<UpdateScheduler>,
    services: ServiceManager,
}

impl Runtime {
    /// Wire the lapin driver and the reqwest transport from configuration
    pub fn build(config: Config) -> BrokerResult<Self> {
        let credentials = BrokerCredentials::from_config(&config.broker);
        let driver = AmqpDriver::new(
            &credentials,
            Duration::from_secs(config.protocol.connect_timeout_secs),
        )?;
        let transport = ReqwestTransport::new(
            &credentials,
            Duration::from_secs(config.control_plane.request_timeout_secs),
        )?;

        logger::info(
            LogTag::System,
            &format!(
                "Broker {} (namespace '{}'), management API {}",
                driver.endpoint(),
                driver.namespace(),
                transport.base_url()
            ),
        );
        if !config.protocol.enabled {
            logger::info(LogTag::System, "Protocol transport disabled, HTTP-only mode");
        }

        Ok(Self::with_transports(config, Arc::new(driver), Arc::new(transport)))
    }

    pub fn with_transports(
        config: Config,
        driver: Arc<dyn ProtocolDriver>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let connectivity = ConnectivityState::new();
        let link = ProtocolLink::new(
            driver,
            LinkSettings::from_config(&config.protocol),
            connectivity.clone(),
        );
        let control_plane = Arc::new(
            ControlPlaneClient::new(
                transport,
                Duration::from_millis(config.control_plane.cache_ttl_ms),
                connectivity.clone(),
            )
            .with_cache_capacity(config.control_plane.cache_max_entries),
        );
        let aggregator = Arc::new(Aggregator::new(
            link.clone(),
            control_plane.clone(),
            connectivity.clone(),
            AggregatorSettings::from_config(&config),
        ));
        let scheduler = Arc::new(UpdateScheduler::new(aggregator.clone(), &config.scheduler));

        let probe_interval = Duration::from_secs(config.connectivity.probe_interval_secs);
        let mut services = ServiceManager::new(config);
        services.register(Box::new(ConnectivityService::new(
            control_plane.clone(),
            connectivity.clone(),
            probe_interval,
        )));
        services.register(Box::new(ProtocolService::new(link.clone())));

        Self {
            connectivity,
            link,
            control_plane,
            aggregator,
            scheduler,
            services,
        }
    }

    pub async fn start(&mut self) -> Result<(), String> {
        self.services.start_all().await
    }

    /// Cancel subscriber timers, then stop services in reverse order
    pub async fn shutdown(&mut self) {
        self.scheduler.shutdown();
        self.services.stop_all().await;

        let metrics = self.control_plane.cache_metrics();
        logger::with_fields(
            LogLevel::Debug,
            LogTag::Cache,
            "Response cache totals",
            &[
                ("hits", metrics.hits.to_string()),
                ("misses", metrics.misses.to_string()),
                ("hit_rate", format!("{:.2}", metrics.hit_rate())),
                ("stale_served", metrics.stale_served.to_string()),
                ("evictions", metrics.evictions.to_string()),
            ],
        );
        logger::flush();
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityState> {
        &self.connectivity
    }

    pub fn link(&self) -> &Arc<ProtocolLink> {
        &self.link
    }

    pub fn control_plane(&self) -> &Arc<ControlPlaneClient> {
        &self.control_plane
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    pub fn scheduler(&self) -> &Arc<UpdateScheduler> {
        &self.scheduler
    }

    pub fn services(&self) -> &ServiceManager {
        &self.services
    }
}
