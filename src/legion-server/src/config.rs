//! Server configuration.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

/// Environment variable carrying the serialized config from supervisor to worker.
pub const WORKER_CONFIG_ENV: &str = "LEGION_WORKER_CONFIG";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Control-plane listen address (e.g., "0.0.0.0:8443").
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Configured legions, one per port.
    #[serde(default = "default_legions")]
    pub legions: Vec<LegionConfig>,

    /// Health policy.
    #[serde(default)]
    pub health: HealthConfig,

    /// External tool bridge configuration.
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Worker supervision.
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Enable the metrics endpoint.
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// CORS origins (empty = allow all).
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8443".to_string()
}

fn default_legions() -> Vec<LegionConfig> {
    vec![
        LegionConfig::new(5001, "Reconnaissance"),
        LegionConfig::new(5002, "Surveillance"),
        LegionConfig::new(5003, "Signals"),
    ]
}

fn default_max_body_size() -> usize {
    1024 * 1024 // 1MB
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            auth: AuthConfig::default(),
            legions: default_legions(),
            health: HealthConfig::default(),
            tools: ToolsConfig::default(),
            supervisor: SupervisorConfig::default(),
            logging: LoggingConfig::default(),
            metrics_enabled: true,
            max_body_size: default_max_body_size(),
            cors_origins: vec![],
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from file.
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Load from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("LEGION_LISTEN_ADDR") {
            config.listen_addr = addr;
        }

        if let Ok(secret) = std::env::var("LEGION_ADMIN_SECRET") {
            config.auth.admin_secret = Some(secret);
        }

        if let Ok(secret) = std::env::var("LEGION_JWT_SECRET") {
            config.auth.jwt_secret = Some(secret);
        }

        if let Ok(root) = std::env::var("LEGION_TOOLS_ROOT") {
            config.tools.root = PathBuf::from(root);
        }

        if let Ok(workers) = std::env::var("LEGION_WORKERS") {
            let workers = workers
                .parse()
                .with_context(|| format!("LEGION_WORKERS must be a number, got {workers:?}"))?;
            config.supervisor.workers = Some(workers);
        }

        if let Ok(legions) = std::env::var("LEGION_LEGIONS") {
            config.legions = parse_legion_list(&legions)?;
        }

        Ok(config)
    }

    /// Config handed to a worker by its supervisor, if any.
    pub fn from_worker_env() -> anyhow::Result<Option<Self>> {
        match std::env::var(WORKER_CONFIG_ENV) {
            Ok(json) => {
                let config = serde_json::from_str(&json).context("parsing worker config")?;
                Ok(Some(config))
            }
            Err(_) => Ok(None),
        }
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self
            .auth
            .admin_secret
            .as_deref()
            .is_none_or(|s| s.trim().is_empty())
        {
            bail!("auth.admin_secret is required (set LEGION_ADMIN_SECRET)");
        }

        let control_port = self
            .listen_addr
            .parse::<std::net::SocketAddr>()
            .with_context(|| format!("invalid listen_addr {:?}", self.listen_addr))?
            .port();

        let mut seen = HashSet::new();
        for legion in &self.legions {
            if legion.port == 0 {
                bail!("legion port 0 is not allowed");
            }
            if legion.port == control_port {
                bail!("legion port {} collides with the control plane", legion.port);
            }
            if !seen.insert(legion.port) {
                bail!("legion port {} is configured twice", legion.port);
            }
        }

        if self.health.failure_threshold == 0 {
            bail!("health.failure_threshold must be at least 1");
        }

        Ok(())
    }

    /// Number of worker processes to run.
    pub fn worker_count(&self) -> usize {
        self.supervisor.workers.unwrap_or_else(num_cpus::get).max(1)
    }
}

/// `5001=Reconnaissance,5002=Surveillance`
fn parse_legion_list(value: &str) -> anyhow::Result<Vec<LegionConfig>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (port, role) = entry
                .split_once('=')
                .with_context(|| format!("legion entry {entry:?} must be PORT=ROLE"))?;
            let port = port
                .trim()
                .parse()
                .with_context(|| format!("invalid legion port in {entry:?}"))?;
            Ok(LegionConfig::new(port, role.trim()))
        })
        .collect()
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Shared administrative secret exchanged for a bearer token.
    #[serde(default)]
    pub admin_secret: Option<String>,

    /// Token signing secret. Derived from the admin secret when unset.
    #[serde(default)]
    pub jwt_secret: Option<String>,

    /// Token validity in seconds.
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
}

fn default_token_ttl() -> u64 {
    86400 // 24 hours
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_secret: None,
            jwt_secret: None,
            token_ttl_secs: default_token_ttl(),
        }
    }
}

/// One configured legion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LegionConfig {
    pub port: u16,
    pub role: String,
    /// Mobilize when the worker starts.
    #[serde(default)]
    pub autostart: bool,
}

impl LegionConfig {
    pub fn new(port: u16, role: impl Into<String>) -> Self {
        Self {
            port,
            role: role.into(),
            autostart: false,
        }
    }
}

/// Health policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Consecutive failures that force a legion back to dormant.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

fn default_failure_threshold() -> u32 {
    3
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
        }
    }
}

/// External tool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Directory holding one subdirectory per installed tool.
    #[serde(default = "default_tools_root")]
    pub root: PathBuf,

    /// Kill tools that run longer than this. Unset means no limit.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Delay before simulation-only tools resolve.
    #[serde(default = "default_simulation_delay")]
    pub simulation_delay_ms: u64,

    /// Seed for the simulated output generator.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_tools_root() -> PathBuf {
    PathBuf::from("tools")
}

fn default_simulation_delay() -> u64 {
    1500
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            root: default_tools_root(),
            timeout_secs: None,
            simulation_delay_ms: default_simulation_delay(),
            seed: None,
        }
    }
}

impl ToolsConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn simulation_delay(&self) -> Duration {
        Duration::from_millis(self.simulation_delay_ms)
    }
}

/// Worker supervision configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Worker processes. Defaults to the number of CPU cores; 1 runs in-process.
    #[serde(default)]
    pub workers: Option<usize>,

    /// Delay before the first restart of a crashed worker.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Upper bound on the restart delay.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Restarts allowed per slot within `restart_window_secs`.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    #[serde(default = "default_restart_window")]
    pub restart_window_secs: u64,

    /// Uptime after which a worker counts as healthy and its backoff resets.
    #[serde(default = "default_stable_after")]
    pub stable_after_secs: u64,
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_restarts() -> u32 {
    5
}

fn default_restart_window() -> u64 {
    60
}

fn default_stable_after() -> u64 {
    30
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            workers: None,
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            max_restarts: default_max_restarts(),
            restart_window_secs: default_restart_window(),
            stable_after_secs: default_stable_after(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format ("pretty" or "json").
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoggingConfig {
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn valid() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.auth.admin_secret = Some("s3cret".to_string());
        config
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.auth.token_ttl_secs, 86400);
        assert_eq!(config.health.failure_threshold, 3);
        assert_eq!(
            config.legions.iter().map(|l| l.port).collect::<Vec<_>>(),
            vec![5001, 5002, 5003]
        );
        assert!(config.legions.iter().all(|l| !l.autostart));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ServerConfig = serde_json::from_str(
            r#"{"auth":{"admin_secret":"x"},"legions":[{"port":7001,"role":"Edge","autostart":true}]}"#,
        )
        .unwrap();
        assert_eq!(config.auth.admin_secret.as_deref(), Some("x"));
        assert_eq!(config.auth.token_ttl_secs, 86400);
        assert_eq!(config.legions.len(), 1);
        assert!(config.legions[0].autostart);
        assert_eq!(config.tools.simulation_delay_ms, 1500);
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());
        assert!(ServerConfig::default().validate().is_err());

        let mut duplicate = valid();
        duplicate.legions.push(LegionConfig::new(5001, "Again"));
        assert!(duplicate.validate().is_err());

        let mut collision = valid();
        collision.legions.push(LegionConfig::new(8443, "Control"));
        assert!(collision.validate().is_err());
    }

    #[test]
    fn test_parse_legion_list() {
        let legions = parse_legion_list("6001=Alpha, 6002=Beta").unwrap();
        assert_eq!(
            legions,
            vec![LegionConfig::new(6001, "Alpha"), LegionConfig::new(6002, "Beta")]
        );
        assert!(parse_legion_list("6001").is_err());
        assert!(parse_legion_list("x=Alpha").is_err());
    }
}
