//! Integration tests for the tool bridge.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use legion_tools::{
    BridgeConfig, ExternalTool, Invocation, SimulatedOutputGenerator, SimulationReason,
    ToolBridge, ToolContext, ToolError, ToolOutcome, ToolRegistry, ToolResult,
};
use pretty_assertions::assert_eq;
use rand::RngCore;
use serde_json::{Value, json};

/// Test tool that runs a shell snippet and echoes stdout back as `output`.
struct ShellTool {
    id: &'static str,
    script: &'static str,
    work_dir: bool,
    fail_parse: bool,
    seen_work_dir: Arc<Mutex<Option<PathBuf>>>,
}

impl ShellTool {
    fn new(id: &'static str, script: &'static str) -> Self {
        Self {
            id,
            script,
            work_dir: false,
            fail_parse: false,
            seen_work_dir: Arc::new(Mutex::new(None)),
        }
    }

    fn with_work_dir(mut self) -> Self {
        self.work_dir = true;
        self
    }

    fn failing_parse(mut self) -> Self {
        self.fail_parse = true;
        self
    }
}

impl ExternalTool for ShellTool {
    fn id(&self) -> &'static str {
        self.id
    }

    fn description(&self) -> &'static str {
        "shell test tool"
    }

    fn needs_work_dir(&self) -> bool {
        self.work_dir
    }

    fn build_args(&self, params: &Value, ctx: &ToolContext<'_>) -> ToolResult<Invocation> {
        if params.get("reject").is_some() {
            return Err(ToolError::invalid(self.id, "rejected"));
        }
        *self.seen_work_dir.lock().unwrap() = ctx.work_dir.map(Path::to_path_buf);

        let mut invocation = Invocation::new("sh").args(["-c", self.script, "sh"]);
        if let Some(dir) = ctx.work_dir {
            invocation = invocation.arg(dir.to_string_lossy());
        }
        Ok(invocation)
    }

    fn parse_output(
        &self,
        stdout: &str,
        _params: &Value,
        _ctx: &ToolContext<'_>,
    ) -> ToolResult<Value> {
        if self.fail_parse {
            return Err(ToolError::parse(self.id, "unexpected output"));
        }
        Ok(json!({ "output": stdout.trim() }))
    }

    fn simulate(&self, _params: &Value, _rng: &mut dyn RngCore) -> Value {
        json!({ "output": "synthetic" })
    }
}

struct Harness {
    root: tempfile::TempDir,
    registry: ToolRegistry,
    timeout: Option<Duration>,
}

impl Harness {
    fn new() -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
            registry: ToolRegistry::with_builtin_tools(),
            timeout: None,
        }
    }

    /// Register `tool` and create its install directory.
    fn install(mut self, tool: ShellTool) -> Self {
        std::fs::create_dir_all(self.root.path().join(tool.id())).unwrap();
        self.registry.register(Arc::new(tool));
        self
    }

    fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn bridge(&self) -> ToolBridge {
        ToolBridge::new(
            Arc::new(self.registry.clone()),
            SimulatedOutputGenerator::seeded(99),
            BridgeConfig {
                tools_root: self.root.path().to_path_buf(),
                timeout: self.timeout,
                simulation_delay: Duration::from_millis(20),
            },
        )
    }
}

fn reason(outcome: &ToolOutcome) -> Option<SimulationReason> {
    match outcome {
        ToolOutcome::Simulated { reason, .. } => Some(*reason),
        ToolOutcome::Real { .. } => None,
    }
}

#[tokio::test]
async fn test_sherlock_without_install_is_simulated() {
    let harness = Harness::new();
    let outcome = harness
        .bridge()
        .run_tool("sherlock", json!({ "username": "testuser" }))
        .await
        .unwrap();

    assert_eq!(reason(&outcome), Some(SimulationReason::NotInstalled));
    let value = outcome.into_value();
    assert_eq!(value["simulated"], json!(true));
    assert_eq!(value["username"], json!("testuser"));
    for entry in value["results"].as_array().unwrap() {
        assert!(entry["platform"].is_string());
        assert!(entry["url"].as_str().unwrap().contains("testuser"));
        assert!(entry["exists"].is_boolean());
    }
}

#[tokio::test]
async fn test_successful_run_is_parsed() {
    let harness = Harness::new().install(ShellTool::new("echoer", "echo hello"));
    let outcome = harness.bridge().run_tool("echoer", json!({})).await.unwrap();

    assert!(!outcome.is_simulated());
    let value = outcome.into_value();
    assert_eq!(value["output"], json!("hello"));
    assert_eq!(value["simulated"], json!(false));
    assert_eq!(value["tool"], json!("echoer"));
}

#[tokio::test]
async fn test_non_zero_exit_falls_back_to_simulation() {
    let harness = Harness::new().install(ShellTool::new("failing", "echo broken >&2; exit 3"));
    let outcome = harness.bridge().run_tool("failing", json!({})).await.unwrap();

    assert_eq!(reason(&outcome), Some(SimulationReason::NonZeroExit));
    assert_eq!(outcome.into_value()["output"], json!("synthetic"));
}

#[tokio::test]
async fn test_spawn_failure_falls_back_to_simulation() {
    let harness = Harness::new();
    // Installed, but python3 with sherlock is not runnable from an empty dir.
    std::fs::create_dir_all(harness.root.path().join("sherlock")).unwrap();
    let outcome = harness
        .bridge()
        .run_tool("sherlock", json!({ "username": "alice" }))
        .await
        .unwrap();
    assert!(outcome.is_simulated());
}

#[tokio::test]
async fn test_timeout_falls_back_to_simulation() {
    let harness = Harness::new()
        .install(ShellTool::new("slow", "sleep 5"))
        .timeout(Duration::from_millis(100));
    let outcome = harness.bridge().run_tool("slow", json!({})).await.unwrap();
    assert_eq!(reason(&outcome), Some(SimulationReason::TimedOut));
}

#[tokio::test]
async fn test_rejected_input_when_installed() {
    let harness = Harness::new().install(ShellTool::new("echoer", "echo hello"));
    let err = harness
        .bridge()
        .run_tool("echoer", json!({ "reject": true }))
        .await
        .unwrap_err();
    assert!(err.is_caller_error());
}

#[tokio::test]
async fn test_unknown_tool_is_rejected() {
    let harness = Harness::new();
    let err = harness
        .bridge()
        .run_tool("does-not-exist", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::UnknownTool(id) if id == "does-not-exist"));
}

#[tokio::test]
async fn test_work_dir_removed_on_every_outcome() {
    let cases = [
        (ShellTool::new("wd-ok", "echo done > \"$1/out\"; cat \"$1/out\"").with_work_dir(), "ok"),
        (ShellTool::new("wd-exit", "exit 1").with_work_dir(), "fallback"),
        (ShellTool::new("wd-parse", "echo garbage").with_work_dir().failing_parse(), "parse"),
    ];

    for (tool, expected) in cases {
        let id = tool.id();
        let seen = Arc::clone(&tool.seen_work_dir);
        let harness = Harness::new().install(tool);

        let result = harness.bridge().run_tool(id, json!({})).await;
        match expected {
            "ok" => assert_eq!(result.unwrap().into_value()["output"], json!("done")),
            "fallback" => assert!(result.unwrap().is_simulated()),
            _ => assert!(matches!(result, Err(ToolError::Parse { .. }))),
        }

        let path = seen.lock().unwrap().clone().expect("work dir was provided");
        assert!(
            path.file_name().unwrap().to_string_lossy().starts_with(&format!("legion-{id}-")),
            "unexpected work dir name {path:?}"
        );
        assert!(!path.exists(), "work dir {path:?} left behind for {id}");
    }
}

#[tokio::test]
async fn test_simulation_only_tool_writes_companion_script() {
    let harness = Harness::new();
    let bridge = harness.bridge();
    let script = harness.root.path().join("camscan").join("camscan.py");
    assert!(!script.exists());

    let outcome = bridge
        .run_tool("camscan", json!({ "network": "10.0.0.0/24" }))
        .await
        .unwrap();

    assert!(script.exists());
    assert_eq!(reason(&outcome), Some(SimulationReason::SimulationOnly));
    let value = outcome.into_value();
    assert_eq!(value["simulated"], json!(true));
    assert_eq!(value["mode"], json!("simulation-only"));
    assert_eq!(value["network"], json!("10.0.0.0/24"));

    // Existing scripts are left untouched.
    std::fs::write(&script, "# edited").unwrap();
    bridge.run_tool("camscan", json!({})).await.unwrap();
    assert_eq!(std::fs::read_to_string(&script).unwrap(), "# edited");
}
