//! Application state shared across request handlers.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use legion_tools::{BridgeConfig, SimulatedOutputGenerator, ToolBridge, ToolRegistry};

use crate::auth::AuthService;
use crate::config::ServerConfig;
use crate::diagnostics::ProcessSampler;
use crate::error::AppResult;
use crate::health::HealthMonitor;
use crate::legion::LegionManager;
use crate::metrics::Metrics;

/// Per-worker application state. Nothing here is shared between workers.
pub struct AppState {
    /// Server configuration.
    pub config: ServerConfig,
    pub auth: AuthService,
    pub legions: LegionManager,
    pub tools: ToolBridge,
    pub metrics: Arc<Metrics>,
    pub sampler: ProcessSampler,
    /// Supervisor slot this worker runs in, if any.
    pub worker_id: Option<usize>,
    start_time: Instant,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("worker_id", &self.worker_id)
            .field("start_time", &self.start_time)
            .finish()
    }
}

impl AppState {
    /// Build the full state for one worker.
    pub async fn new(config: ServerConfig, worker_id: Option<usize>) -> AppResult<Self> {
        let metrics = Arc::new(Metrics::new());
        let auth = AuthService::new(&config.auth)?;

        let legions = LegionManager::new(
            &config.legions,
            HealthMonitor::new(config.health.failure_threshold),
            Arc::clone(&metrics),
            bind_host(&config.listen_addr),
        );
        legions.publish_gauges().await;

        let generator = match config.tools.seed {
            Some(seed) => SimulatedOutputGenerator::seeded(seed),
            None => SimulatedOutputGenerator::from_entropy(),
        };
        let tools = ToolBridge::new(
            Arc::new(ToolRegistry::with_builtin_tools()),
            generator,
            BridgeConfig {
                tools_root: config.tools.root.clone(),
                timeout: config.tools.timeout(),
                simulation_delay: config.tools.simulation_delay(),
            },
        );

        Ok(Self {
            config,
            auth,
            legions,
            tools,
            metrics,
            sampler: ProcessSampler::new(),
            worker_id,
            start_time: Instant::now(),
        })
    }

    /// Get server uptime.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Legions listen on the same interface as the control plane.
fn bind_host(listen_addr: &str) -> IpAddr {
    listen_addr
        .parse::<SocketAddr>()
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}
