//! Execution of registered tools with simulated fallback.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{ToolError, ToolResult};
use crate::registry::{ExternalTool, ToolRegistry};
use crate::simulate::SimulatedOutputGenerator;
use crate::types::{
    ExecutionMode, Invocation, SimulationReason, ToolContext, ToolDescriptor, ToolOutcome,
};

/// Bridge settings.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Directory containing one subdirectory per installed tool.
    pub tools_root: PathBuf,
    /// Kill the child and simulate once this elapses. `None` waits forever.
    pub timeout: Option<Duration>,
    /// Delay before a simulation-only tool resolves.
    pub simulation_delay: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            tools_root: PathBuf::from("tools"),
            timeout: None,
            simulation_delay: Duration::from_millis(1500),
        }
    }
}

/// Runs tools from a [`ToolRegistry`].
#[derive(Debug)]
pub struct ToolBridge {
    registry: Arc<ToolRegistry>,
    generator: SimulatedOutputGenerator,
    config: BridgeConfig,
}

/// Result of running the child process.
enum RunResult {
    Completed(String),
    Fallback(SimulationReason),
}

impl ToolBridge {
    pub fn new(
        registry: Arc<ToolRegistry>,
        generator: SimulatedOutputGenerator,
        config: BridgeConfig,
    ) -> Self {
        Self {
            registry,
            generator,
            config,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    fn install_dir(&self, tool: &dyn ExternalTool) -> PathBuf {
        self.config.tools_root.join(tool.install_dir_name())
    }

    /// Describe every registered tool.
    pub fn catalogue(&self) -> Vec<ToolDescriptor> {
        self.registry
            .iter()
            .map(|tool| {
                let install_dir = self.install_dir(tool.as_ref());
                ToolDescriptor {
                    id: tool.id().to_string(),
                    description: tool.description().to_string(),
                    mode: tool.mode(),
                    installed: install_dir.is_dir(),
                    install_dir,
                }
            })
            .collect()
    }

    /// Run `id` with `params`.
    ///
    /// Only an unknown id, rejected parameters, or unparseable output of a
    /// successful run produce an error. Every other failure yields a
    /// simulated outcome.
    pub async fn run_tool(&self, id: &str, params: Value) -> ToolResult<ToolOutcome> {
        let tool = self
            .registry
            .get(id)
            .ok_or_else(|| ToolError::UnknownTool(id.to_string()))?;
        let install_dir = self.install_dir(tool.as_ref());

        if tool.mode() == ExecutionMode::SimulationOnly {
            self.prepare_companion(tool.as_ref(), &install_dir).await;
            tokio::time::sleep(self.config.simulation_delay).await;
            return Ok(self.simulated(tool.as_ref(), &params, SimulationReason::SimulationOnly));
        }

        if !is_installed(&install_dir).await {
            debug!(tool = id, dir = %install_dir.display(), "Tool not installed");
            return Ok(self.simulated(tool.as_ref(), &params, SimulationReason::NotInstalled));
        }

        // Dropped on every return path below, removing the directory.
        let work_dir = if tool.needs_work_dir() {
            match tempfile::Builder::new()
                .prefix(&format!("legion-{id}-"))
                .tempdir()
            {
                Ok(dir) => Some(dir),
                Err(e) => {
                    warn!(tool = id, error = %e, "Failed to create work directory");
                    return Ok(self.simulated(
                        tool.as_ref(),
                        &params,
                        SimulationReason::WorkDirUnavailable,
                    ));
                }
            }
        } else {
            None
        };

        let mut ctx = ToolContext::new(&install_dir);
        if let Some(dir) = &work_dir {
            ctx = ctx.with_work_dir(dir.path());
        }

        let invocation = tool.build_args(&params, &ctx)?;

        let started = Instant::now();
        let stdout = match self.spawn(id, &invocation).await {
            RunResult::Completed(stdout) => stdout,
            RunResult::Fallback(reason) => {
                return Ok(self.simulated(tool.as_ref(), &params, reason));
            }
        };
        let elapsed = started.elapsed();

        let result = tool.parse_output(&stdout, &params, &ctx)?;
        info!(tool = id, elapsed_ms = elapsed.as_millis() as u64, "Tool run completed");

        Ok(ToolOutcome::Real {
            tool: id.to_string(),
            result,
            elapsed,
        })
    }

    async fn spawn(&self, id: &str, invocation: &Invocation) -> RunResult {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &invocation.current_dir {
            cmd.current_dir(dir);
        }

        // Only pass through a minimal environment
        cmd.env_clear();
        cmd.env(
            "PATH",
            std::env::var("PATH").unwrap_or_else(|_| "/usr/bin:/bin".to_string()),
        );
        cmd.env(
            "HOME",
            std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()),
        );
        cmd.env(
            "USER",
            std::env::var("USER").unwrap_or_else(|_| "nobody".to_string()),
        );
        cmd.env("LANG", "C.UTF-8");

        debug!(tool = id, program = %invocation.program.display(), args = ?invocation.args, "Spawning tool");

        let output = match self.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, cmd.output()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(tool = id, timeout_secs = limit.as_secs(), "Tool timed out");
                    return RunResult::Fallback(SimulationReason::TimedOut);
                }
            },
            None => cmd.output().await,
        };

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                warn!(tool = id, error = %e, "Failed to spawn tool");
                return RunResult::Fallback(SimulationReason::SpawnFailed);
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                tool = id,
                exit_code = ?output.status.code(),
                stderr = %stderr.trim(),
                "Tool exited with failure"
            );
            return RunResult::Fallback(SimulationReason::NonZeroExit);
        }

        RunResult::Completed(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn prepare_companion(&self, tool: &dyn ExternalTool, install_dir: &Path) {
        let Some(script) = tool.companion_script() else {
            return;
        };
        let path = install_dir.join(script.file_name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return;
        }

        let written = async {
            tokio::fs::create_dir_all(install_dir).await?;
            tokio::fs::write(&path, script.contents).await
        }
        .await;

        match written {
            Ok(()) => info!(tool = tool.id(), path = %path.display(), "Wrote companion script"),
            Err(e) => warn!(tool = tool.id(), error = %e, "Failed to write companion script"),
        }
    }

    fn simulated(&self, tool: &dyn ExternalTool, params: &Value, reason: SimulationReason) -> ToolOutcome {
        ToolOutcome::Simulated {
            tool: tool.id().to_string(),
            result: self.generator.generate(tool, params, reason),
            reason,
        }
    }
}

/// A tool counts as installed only when its install path is a directory.
async fn is_installed(install_dir: &Path) -> bool {
    tokio::fs::metadata(install_dir)
        .await
        .is_ok_and(|meta| meta.is_dir())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bridge(root: &Path) -> ToolBridge {
        ToolBridge::new(
            Arc::new(ToolRegistry::with_builtin_tools()),
            SimulatedOutputGenerator::seeded(1),
            BridgeConfig {
                tools_root: root.to_path_buf(),
                timeout: None,
                simulation_delay: Duration::from_millis(10),
            },
        )
    }

    #[tokio::test]
    async fn test_missing_install_dir_simulates_even_with_bad_params() {
        let root = tempfile::tempdir().unwrap();
        let outcome = bridge(root.path())
            .run_tool("nmap", json!({ "target": "--evil" }))
            .await
            .unwrap();
        assert!(outcome.is_simulated());
        let value = outcome.into_value();
        assert_eq!(value["simulated"], json!(true));
        assert_eq!(value["simulationReason"], json!("not_installed"));
    }

    #[tokio::test]
    async fn test_catalogue_reports_installation() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("sherlock")).unwrap();
        let catalogue = bridge(root.path()).catalogue();
        assert_eq!(catalogue.len(), 5);
        let sherlock = catalogue.iter().find(|d| d.id == "sherlock").unwrap();
        assert!(sherlock.installed);
        let nmap = catalogue.iter().find(|d| d.id == "nmap").unwrap();
        assert!(!nmap.installed);
    }

    #[tokio::test]
    async fn test_plain_file_is_not_an_install() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("sherlock"), "not a directory").unwrap();
        let bridge = bridge(root.path());

        let sherlock = bridge
            .catalogue()
            .into_iter()
            .find(|d| d.id == "sherlock")
            .unwrap();
        assert!(!sherlock.installed);

        let outcome = bridge
            .run_tool("sherlock", json!({ "username": "alice" }))
            .await
            .unwrap();
        assert_eq!(outcome.into_value()["simulationReason"], json!("not_installed"));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let root = tempfile::tempdir().unwrap();
        let err = bridge(root.path())
            .run_tool("metasploit", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(_)));
    }
}
