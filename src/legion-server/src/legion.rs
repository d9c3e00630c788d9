//! Legion lifecycle management.
//!
//! Every configured port owns exactly one [`Legion`] record for the lifetime
//! of the worker. All mutations go through [`LegionManager`], which holds a
//! single write lock for the whole of each activate or deactivate.

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::LegionConfig;
use crate::data_plane::{self, ListenerFailure};
use crate::health::{HealthMonitor, HealthVerdict};
use crate::metrics::Metrics;
use crate::net;

/// Errors from lifecycle operations.
#[derive(Debug, Error)]
pub enum LegionError {
    /// The port has no legion configured.
    #[error("No legion configured on port {0}")]
    Unconfigured(u16),

    /// The operation was attempted and failed; counted against the legion's health.
    #[error("Legion {port} operation failed: {reason}")]
    Operation { port: u16, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LegionStatus {
    Dormant,
    Active,
}

/// Whether a lifecycle call changed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Changed,
    AlreadyInState,
}

#[derive(Debug)]
struct ListenerHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
    local_addr: SocketAddr,
}

#[derive(Debug)]
struct Legion {
    port: u16,
    role: String,
    status: LegionStatus,
    last_activation: Option<DateTime<Utc>>,
    failure_count: u32,
    listener: Option<ListenerHandle>,
}

impl Legion {
    fn snapshot(&self) -> LegionSnapshot {
        LegionSnapshot {
            port: self.port,
            role: self.role.clone(),
            status: self.status,
            last_activation: self.last_activation,
            failure_count: self.failure_count,
            operational_capacity: match self.status {
                LegionStatus::Active => "100%",
                LegionStatus::Dormant => "0%",
            },
            local_addr: self.listener.as_ref().map(|l| l.local_addr),
        }
    }
}

/// Read-only view of a legion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegionSnapshot {
    #[serde(skip)]
    pub port: u16,
    pub role: String,
    pub status: LegionStatus,
    pub last_activation: Option<DateTime<Utc>>,
    pub failure_count: u32,
    pub operational_capacity: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_addr: Option<SocketAddr>,
}

/// Owns every legion in this worker.
#[derive(Debug)]
pub struct LegionManager {
    ports: BTreeSet<u16>,
    legions: RwLock<BTreeMap<u16, Legion>>,
    health: HealthMonitor,
    metrics: Arc<Metrics>,
    bind_host: IpAddr,
    failures_tx: mpsc::UnboundedSender<ListenerFailure>,
    failures_rx: Mutex<Option<mpsc::UnboundedReceiver<ListenerFailure>>>,
}

impl LegionManager {
    pub fn new(
        configs: &[LegionConfig],
        health: HealthMonitor,
        metrics: Arc<Metrics>,
        bind_host: IpAddr,
    ) -> Self {
        let legions = configs
            .iter()
            .map(|c| {
                (
                    c.port,
                    Legion {
                        port: c.port,
                        role: c.role.clone(),
                        status: LegionStatus::Dormant,
                        last_activation: None,
                        failure_count: 0,
                        listener: None,
                    },
                )
            })
            .collect();

        let (failures_tx, failures_rx) = mpsc::unbounded_channel();

        Self {
            ports: configs.iter().map(|c| c.port).collect(),
            legions: RwLock::new(legions),
            health,
            metrics,
            bind_host,
            failures_tx,
            failures_rx: Mutex::new(Some(failures_rx)),
        }
    }

    /// Publish the initial dormant gauges.
    pub async fn publish_gauges(&self) {
        for port in &self.ports {
            self.metrics.set_legion_health(*port, false).await;
        }
    }

    /// Whether `port` has a legion. The port set is fixed at construction.
    pub fn is_configured(&self, port: u16) -> bool {
        self.ports.contains(&port)
    }

    /// Bind the listener for `port` and mark it active.
    pub async fn activate(&self, port: u16) -> Result<Transition, LegionError> {
        let mut legions = self.legions.write().await;
        let legion = legions
            .get_mut(&port)
            .ok_or(LegionError::Unconfigured(port))?;

        if legion.status == LegionStatus::Active {
            return Ok(Transition::AlreadyInState);
        }

        let addr = SocketAddr::new(self.bind_host, port);
        let listener = match net::bind_shared(addr) {
            Ok(listener) => listener,
            Err(e) => {
                let reason = format!("bind {addr}: {e}");
                self.apply_failure(legion, &reason).await;
                return Err(LegionError::Operation { port, reason });
            }
        };
        let local_addr = listener.local_addr().unwrap_or(addr);

        let token = CancellationToken::new();
        let task = data_plane::spawn(
            listener,
            port,
            &legion.role,
            token.clone(),
            self.failures_tx.clone(),
        );

        legion.listener = Some(ListenerHandle {
            token,
            task,
            local_addr,
        });
        legion.status = LegionStatus::Active;
        legion.last_activation = Some(Utc::now());
        self.metrics.set_legion_health(port, true).await;

        info!(port, role = %legion.role, %local_addr, "Legion mobilized");
        Ok(Transition::Changed)
    }

    /// Close the listener for `port` without waiting for connections to drain.
    pub async fn deactivate(&self, port: u16) -> Result<Transition, LegionError> {
        let mut legions = self.legions.write().await;
        let legion = legions
            .get_mut(&port)
            .ok_or(LegionError::Unconfigured(port))?;

        if legion.status == LegionStatus::Dormant {
            return Ok(Transition::AlreadyInState);
        }

        self.stand_down(legion).await;
        info!(port, role = %legion.role, "Legion stood down");
        Ok(Transition::Changed)
    }

    /// Count an operational failure against `port`.
    pub async fn record_failure(
        &self,
        port: u16,
        reason: &str,
    ) -> Result<HealthVerdict, LegionError> {
        let mut legions = self.legions.write().await;
        let legion = legions
            .get_mut(&port)
            .ok_or(LegionError::Unconfigured(port))?;
        Ok(self.apply_failure(legion, reason).await)
    }

    /// Count listener failures against their legion until `shutdown` is cancelled.
    ///
    /// Only the first caller receives failures.
    pub async fn watch_listener_failures(&self, shutdown: CancellationToken) {
        let Some(mut failures) = self.failures_rx.lock().await.take() else {
            warn!("Listener failure watch is already running");
            return;
        };

        loop {
            tokio::select! {
                failure = failures.recv() => {
                    let Some(failure) = failure else { return };
                    if let Err(e) = self.record_failure(failure.port, &failure.reason).await {
                        warn!(port = failure.port, error = %e, "Dropped listener failure");
                    }
                }
                _ = shutdown.cancelled() => return,
            }
        }
    }

    async fn apply_failure(&self, legion: &mut Legion, reason: &str) -> HealthVerdict {
        let verdict = self.health.observe(&mut legion.failure_count);
        self.metrics.record_legion_failure(legion.port).await;

        match verdict {
            HealthVerdict::Degraded { failures } => {
                error!(
                    port = legion.port,
                    role = %legion.role,
                    failures,
                    threshold = self.health.threshold(),
                    error = reason,
                    "Legion operation failed"
                );
            }
            HealthVerdict::Tripped => {
                error!(
                    port = legion.port,
                    role = %legion.role,
                    threshold = self.health.threshold(),
                    error = reason,
                    "Legion failure threshold reached, forcing stand down"
                );
                if legion.status == LegionStatus::Active {
                    self.stand_down(legion).await;
                }
            }
        }
        verdict
    }

    async fn stand_down(&self, legion: &mut Legion) {
        if let Some(handle) = legion.listener.take() {
            // The serve task finishes on its own once cancelled.
            handle.token.cancel();
            drop(handle.task);
        }
        legion.status = LegionStatus::Dormant;
        self.metrics.set_legion_health(legion.port, false).await;
    }

    pub async fn status(&self, port: u16) -> Result<LegionSnapshot, LegionError> {
        self.legions
            .read()
            .await
            .get(&port)
            .map(Legion::snapshot)
            .ok_or(LegionError::Unconfigured(port))
    }

    pub async fn status_all(&self) -> Vec<LegionSnapshot> {
        self.legions.read().await.values().map(Legion::snapshot).collect()
    }

    /// Close every active listener, waiting up to `grace` for each to stop.
    ///
    /// Returns the number of listeners that were closed.
    pub async fn shutdown_all(&self, grace: Duration) -> usize {
        let mut tasks = Vec::new();
        {
            let mut legions = self.legions.write().await;
            for legion in legions.values_mut() {
                if let Some(handle) = legion.listener.take() {
                    handle.token.cancel();
                    tasks.push((legion.port, handle.task));
                }
                legion.status = LegionStatus::Dormant;
                self.metrics.set_legion_health(legion.port, false).await;
            }
        }

        let closed = tasks.len();
        for (port, task) in tasks {
            if tokio::time::timeout(grace, task).await.is_err() {
                warn!(port, "Legion listener did not stop in time");
            }
        }
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn manager(ports: &[u16]) -> LegionManager {
        let configs: Vec<_> = ports
            .iter()
            .map(|p| LegionConfig::new(*p, format!("Role{p}")))
            .collect();
        LegionManager::new(
            &configs,
            HealthMonitor::new(3),
            Arc::new(Metrics::new()),
            IpAddr::V4(Ipv4Addr::LOCALHOST),
        )
    }

    #[tokio::test]
    async fn test_activate_is_idempotent() {
        let port = free_port();
        let manager = manager(&[port]);

        assert_eq!(manager.activate(port).await.unwrap(), Transition::Changed);
        let first = manager.status(port).await.unwrap();
        assert_eq!(first.status, LegionStatus::Active);
        assert_eq!(first.operational_capacity, "100%");

        assert_eq!(
            manager.activate(port).await.unwrap(),
            Transition::AlreadyInState
        );
        let second = manager.status(port).await.unwrap();
        assert_eq!(first.last_activation, second.last_activation);

        manager.shutdown_all(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_deactivate_dormant_keeps_failure_count() {
        let port = free_port();
        let manager = manager(&[port]);
        manager.record_failure(port, "boom").await.unwrap();

        assert_eq!(
            manager.deactivate(port).await.unwrap(),
            Transition::AlreadyInState
        );
        assert_eq!(manager.status(port).await.unwrap().failure_count, 1);
    }

    #[tokio::test]
    async fn test_threshold_forces_stand_down() {
        let port = free_port();
        let manager = manager(&[port]);
        manager.activate(port).await.unwrap();

        for expected in 1..=2 {
            let verdict = manager.record_failure(port, "health check failed").await.unwrap();
            assert_eq!(verdict, HealthVerdict::Degraded { failures: expected });
            assert_eq!(
                manager.status(port).await.unwrap().status,
                LegionStatus::Active
            );
        }

        let verdict = manager.record_failure(port, "health check failed").await.unwrap();
        assert_eq!(verdict, HealthVerdict::Tripped);
        let snapshot = manager.status(port).await.unwrap();
        assert_eq!(snapshot.status, LegionStatus::Dormant);
        assert_eq!(snapshot.failure_count, 0);

        manager.record_failure(port, "again").await.unwrap();
        assert_eq!(manager.status(port).await.unwrap().failure_count, 1);
    }

    #[tokio::test]
    async fn test_listener_failures_reach_the_threshold() {
        let port = free_port();
        let manager = Arc::new(LegionManager::new(
            &[LegionConfig::new(port, "Signals")],
            HealthMonitor::new(1),
            Arc::new(Metrics::new()),
            IpAddr::V4(Ipv4Addr::LOCALHOST),
        ));
        manager.activate(port).await.unwrap();

        let shutdown = CancellationToken::new();
        let watch = tokio::spawn({
            let manager = Arc::clone(&manager);
            let shutdown = shutdown.clone();
            async move { manager.watch_listener_failures(shutdown).await }
        });

        manager
            .failures_tx
            .send(ListenerFailure {
                port,
                reason: "listener: accept failed".to_string(),
            })
            .unwrap();

        let stood_down = tokio::time::timeout(Duration::from_secs(2), async {
            while manager.status(port).await.unwrap().status == LegionStatus::Active {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(stood_down.is_ok(), "legion stayed active");

        shutdown.cancel();
        watch.await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_counts_and_stays_dormant() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = occupied.local_addr().unwrap().port();
        let manager = manager(&[port]);

        let err = manager.activate(port).await.unwrap_err();
        assert!(matches!(err, LegionError::Operation { port: p, .. } if p == port));
        let snapshot = manager.status(port).await.unwrap();
        assert_eq!(snapshot.status, LegionStatus::Dormant);
        assert_eq!(snapshot.failure_count, 1);
        assert!(snapshot.last_activation.is_none());
    }

    #[tokio::test]
    async fn test_unconfigured_port() {
        let manager = manager(&[free_port()]);
        assert!(matches!(
            manager.activate(1).await,
            Err(LegionError::Unconfigured(1))
        ));
        assert!(matches!(
            manager.deactivate(1).await,
            Err(LegionError::Unconfigured(1))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_all_closes_active_listeners() {
        let (a, b) = (free_port(), free_port());
        let manager = manager(&[a, b]);
        manager.activate(a).await.unwrap();

        assert_eq!(manager.shutdown_all(Duration::from_secs(1)).await, 1);
        assert!(
            manager
                .status_all()
                .await
                .iter()
                .all(|s| s.status == LegionStatus::Dormant)
        );
    }
}
