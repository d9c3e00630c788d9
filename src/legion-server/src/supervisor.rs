//! Multi-worker process supervision.
//!
//! The supervisor re-executes the current binary once per slot with the
//! `worker` subcommand and the serialized config in [`WORKER_CONFIG_ENV`].
//! Crashed workers are restarted with exponential backoff. A slot that
//! restarts more than `max_restarts` times within the restart window is
//! left down.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use tokio::process::{Child, Command};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{ServerConfig, SupervisorConfig, WORKER_CONFIG_ENV};

/// Restart timing and circuit-breaker limits.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    pub max_restarts: u32,
    pub window: Duration,
    pub stable_after: Duration,
}

impl RestartPolicy {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.backoff_multiplier.max(1.0),
            max_restarts: config.max_restarts,
            window: Duration::from_secs(config.restart_window_secs),
            stable_after: Duration::from_secs(config.stable_after_secs),
        }
    }

    /// Delay before restart number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt as i32);
        if secs.is_finite() {
            Duration::from_secs_f64(secs).min(self.max_backoff)
        } else {
            self.max_backoff
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    Restart { delay: Duration },
    GiveUp,
}

/// Restart bookkeeping for one slot.
#[derive(Debug)]
pub struct RestartTracker {
    policy: RestartPolicy,
    restarts: VecDeque<Instant>,
    consecutive: u32,
}

impl RestartTracker {
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            policy,
            restarts: VecDeque::new(),
            consecutive: 0,
        }
    }

    /// Decide what to do after a worker that ran for `uptime` exited at `now`.
    pub fn record_exit(&mut self, now: Instant, uptime: Duration) -> RestartDecision {
        if uptime >= self.policy.stable_after {
            self.consecutive = 0;
        }

        while self
            .restarts
            .front()
            .is_some_and(|t| now.duration_since(*t) > self.policy.window)
        {
            self.restarts.pop_front();
        }

        if self.restarts.len() >= self.policy.max_restarts as usize {
            return RestartDecision::GiveUp;
        }

        let delay = self.policy.backoff(self.consecutive);
        self.consecutive = self.consecutive.saturating_add(1);
        self.restarts.push_back(now);
        RestartDecision::Restart { delay }
    }
}

/// How a slot task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotExit {
    Stopped,
    GaveUp,
}

#[derive(Debug, Clone)]
struct WorkerLaunch {
    exe: PathBuf,
    config_json: String,
    shutdown_timeout: Duration,
}

/// Run `config.worker_count()` workers until `shutdown` is cancelled.
///
/// Fails when every slot has tripped its restart breaker.
pub async fn run(config: ServerConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let workers = config.worker_count();
    let launch = WorkerLaunch {
        exe: std::env::current_exe().context("locating current executable")?,
        config_json: serde_json::to_string(&config).context("serializing worker config")?,
        shutdown_timeout: Duration::from_secs(config.shutdown_timeout),
    };
    let policy = RestartPolicy::from_config(&config.supervisor);

    info!(workers, listen = %config.listen_addr, "Starting supervisor");

    let mut slots = JoinSet::new();
    for slot in 0..workers {
        slots.spawn(run_slot(
            slot,
            launch.clone(),
            RestartTracker::new(policy.clone()),
            shutdown.clone(),
        ));
    }

    let mut gave_up = 0;
    while let Some(result) = slots.join_next().await {
        match result {
            Ok(SlotExit::GaveUp) => gave_up += 1,
            Ok(SlotExit::Stopped) => {}
            Err(e) => {
                error!(error = %e, "Worker slot task failed");
                gave_up += 1;
            }
        }
    }

    if gave_up == workers && !shutdown.is_cancelled() {
        bail!("all {workers} worker slots exceeded their restart limit");
    }

    info!("Supervisor stopped");
    Ok(())
}

async fn run_slot(
    slot: usize,
    launch: WorkerLaunch,
    mut tracker: RestartTracker,
    shutdown: CancellationToken,
) -> SlotExit {
    loop {
        if shutdown.is_cancelled() {
            return SlotExit::Stopped;
        }

        let started = Instant::now();
        match spawn_worker(slot, &launch) {
            Ok(mut child) => {
                info!(worker_id = slot, pid = ?child.id(), "Worker started");
                tokio::select! {
                    status = child.wait() => match status {
                        Ok(status) => warn!(worker_id = slot, %status, "Worker exited"),
                        Err(e) => warn!(worker_id = slot, error = %e, "Failed to wait for worker"),
                    },
                    _ = shutdown.cancelled() => {
                        terminate(slot, &mut child, launch.shutdown_timeout).await;
                        return SlotExit::Stopped;
                    }
                }
            }
            Err(e) => error!(worker_id = slot, error = %e, "Failed to spawn worker"),
        }

        match tracker.record_exit(Instant::now(), started.elapsed()) {
            RestartDecision::Restart { delay } => {
                info!(worker_id = slot, delay_ms = delay.as_millis() as u64, "Restarting worker");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.cancelled() => return SlotExit::Stopped,
                }
            }
            RestartDecision::GiveUp => {
                error!(
                    worker_id = slot,
                    max_restarts = tracker.policy.max_restarts,
                    window_secs = tracker.policy.window.as_secs(),
                    "Worker restart limit reached, leaving slot down"
                );
                return SlotExit::GaveUp;
            }
        }
    }
}

fn spawn_worker(slot: usize, launch: &WorkerLaunch) -> std::io::Result<Child> {
    Command::new(&launch.exe)
        .arg("worker")
        .arg("--id")
        .arg(slot.to_string())
        .env(WORKER_CONFIG_ENV, &launch.config_json)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
}

/// Ask the worker to stop, then kill it after `grace`.
async fn terminate(slot: usize, child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: kill(2) has no memory-safety preconditions.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            warn!(worker_id = slot, pid, "Failed to send SIGTERM");
        }
    }
    #[cfg(not(unix))]
    let _ = child.start_kill();

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => info!(worker_id = slot, %status, "Worker stopped"),
        Ok(Err(e)) => warn!(worker_id = slot, error = %e, "Failed to wait for worker"),
        Err(_) => {
            warn!(worker_id = slot, grace_secs = grace.as_secs(), "Worker ignored SIGTERM, killing");
            if let Err(e) = child.kill().await {
                warn!(worker_id = slot, error = %e, "Failed to kill worker");
            }
        }
    }
}
