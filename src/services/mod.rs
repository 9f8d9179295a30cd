//! Long-running background services and their lifecycle
//!
//! Services start in dependency then priority order and stop in reverse.
//! Every task a service spawns receives the shared shutdown token.
use crate::config::Config;
use crate::logger::{self, LogTag};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long a stopping service's tasks get before they are aborted
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Service health status
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceHealth {
    Healthy,
    /// Running, but relying on a fallback
    Degraded(String),
    Unhealthy(String),
    Starting,
    Stopped,
}

impl ServiceHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ServiceHealth::Healthy)
    }
}

impl fmt::Display for ServiceHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceHealth::Healthy => f.write_str("healthy"),
            ServiceHealth::Degraded(reason) => write!(f, "degraded: {}", reason),
            ServiceHealth::Unhealthy(reason) => write!(f, "unhealthy: {}", reason),
            ServiceHealth::Starting => f.write_str("starting"),
            ServiceHealth::Stopped => f.write_str("stopped"),
        }
    }
}

/// Core service trait that all services implement
#[async_trait]
pub trait Service: Send + Sync {
    /// Unique service identifier
    fn name(&self) -> &'static str;

    /// Lower starts earlier and stops later
    fn priority(&self) -> i32 {
        100
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec![]
    }

    fn is_enabled(&self, _config: &Config) -> bool {
        true
    }

    /// Spawned tasks must exit once `shutdown` is cancelled
    async fn start(&mut self, shutdown: CancellationToken)
        -> Result<Vec<JoinHandle<()>>, String>;

    async fn stop(&mut self) -> Result<(), String> {
        Ok(())
    }

    async fn health(&self) -> ServiceHealth {
        ServiceHealth::Healthy
    }
}

pub struct ServiceManager {
    services: HashMap<&'static str, Box<dyn Service>>,
    handles: HashMap<&'static str, Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
    config: Config,
}

impl ServiceManager {
    pub fn new(config: Config) -> Self {
        Self {
            services: HashMap::new(),
            handles: HashMap::new(),
            shutdown: CancellationToken::new(),
            config,
        }
    }

    pub fn register(&mut self, service: Box<dyn Service>) {
        let name = service.name();
        self.services.insert(name, service);
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.handles.contains_key(name)
    }

    /// Start all enabled services in dependency and priority order
    pub async fn start_all(&mut self) -> Result<(), String> {
        if self.shutdown.is_cancelled() {
            self.shutdown = CancellationToken::new();
        }

        let enabled: Vec<&'static str> = self
            .services
            .iter()
            .filter(|(_, service)| service.is_enabled(&self.config))
            .map(|(name, _)| *name)
            .collect();

        let ordered = self.resolve_startup_order(&enabled)?;
        logger::debug(
            LogTag::System,
            &format!("Service startup order: {:?}", ordered),
        );

        for name in ordered {
            if let Some(service) = self.services.get_mut(name) {
                let handles = service
                    .start(self.shutdown.clone())
                    .await
                    .map_err(|e| format!("Failed to start service '{}': {}", name, e))?;
                self.handles.insert(name, handles);
                logger::info(LogTag::System, &format!("Service started: {}", name));
            }
        }

        Ok(())
    }

    /// Stop running services in reverse startup order
    ///
    /// Stop errors are logged and do not prevent the remaining services from stopping.
    pub async fn stop_all(&mut self) {
        self.shutdown.cancel();

        let running: Vec<&'static str> = self.handles.keys().copied().collect();
        let mut ordered = match self.resolve_startup_order(&running) {
            Ok(ordered) => ordered,
            Err(_) => running,
        };
        ordered.reverse();

        for name in ordered {
            if let Some(service) = self.services.get_mut(name) {
                if let Err(e) = service.stop().await {
                    logger::warning(
                        LogTag::System,
                        &format!("Service stop error for {}: {}", name, e),
                    );
                }
            }

            if let Some(handles) = self.handles.remove(name) {
                for handle in handles {
                    let abort = handle.abort_handle();
                    if tokio::time::timeout(STOP_GRACE, handle).await.is_err() {
                        logger::warning(
                            LogTag::System,
                            &format!("Service '{}' task did not stop in time, aborting", name),
                        );
                        abort.abort();
                    }
                }
            }

            logger::info(LogTag::System, &format!("Service stopped: {}", name));
        }
    }

    fn resolve_startup_order(&self, services: &[&'static str]) -> Result<Vec<&'static str>, String> {
        fn visit(
            name: &'static str,
            services: &HashMap<&'static str, Box<dyn Service>>,
            ordered: &mut Vec<&'static str>,
            visited: &mut HashSet<&'static str>,
            visiting: &mut HashSet<&'static str>,
        ) -> Result<(), String> {
            if visited.contains(name) {
                return Ok(());
            }
            if !visiting.insert(name) {
                return Err(format!("Circular dependency detected for service: {}", name));
            }

            if let Some(service) = services.get(name) {
                for dep in service.dependencies() {
                    visit(dep, services, ordered, visited, visiting)?;
                }
            }

            visiting.remove(name);
            visited.insert(name);
            ordered.push(name);
            Ok(())
        }

        let mut ordered = Vec::new();
        let mut visited = HashSet::new();
        let mut visiting = HashSet::new();
        for &name in services {
            visit(name, &self.services, &mut ordered, &mut visited, &mut visiting)?;
        }

        // Stable sort keeps dependency order among equal priorities
        ordered.sort_by_key(|name| self.services.get(name).map(|s| s.priority()).unwrap_or(100));
        Ok(ordered)
    }

    pub async fn get_health(&self) -> HashMap<&'static str, ServiceHealth> {
        let mut health = HashMap::new();
        for (name, service) in &self.services {
            let status = if self.is_running(name) {
                service.health().await
            } else {
                ServiceHealth::Stopped
            };
            health.insert(*name, status);
        }
        health
    }
}
