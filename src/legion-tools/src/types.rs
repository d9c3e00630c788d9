//! Core types for tool execution.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};

/// How the bridge treats a registered tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// Run the external process when installed, simulate otherwise.
    Native,
    /// Never run the process. The companion script is materialized on first
    /// use and the result always comes from the simulator after a delay.
    /// Real execution for these tools is an unresolved product decision.
    SimulationOnly,
}

/// A file a simulation-only tool writes into its install directory.
#[derive(Debug, Clone, Copy)]
pub struct CompanionScript {
    pub file_name: &'static str,
    pub contents: &'static str,
}

/// Paths available to a tool while building arguments and parsing output.
#[derive(Debug, Clone, Copy)]
pub struct ToolContext<'a> {
    /// Directory the tool is installed in.
    pub install_dir: &'a Path,
    /// Per-invocation scratch directory, present only for tools that ask for one.
    pub work_dir: Option<&'a Path>,
}

impl<'a> ToolContext<'a> {
    pub fn new(install_dir: &'a Path) -> Self {
        Self {
            install_dir,
            work_dir: None,
        }
    }

    pub fn with_work_dir(mut self, work_dir: &'a Path) -> Self {
        self.work_dir = Some(work_dir);
        self
    }
}

/// A fully resolved process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

/// Why a simulated result was returned instead of real output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationReason {
    NotInstalled,
    SpawnFailed,
    NonZeroExit,
    TimedOut,
    WorkDirUnavailable,
    SimulationOnly,
}

impl SimulationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotInstalled => "not_installed",
            Self::SpawnFailed => "spawn_failed",
            Self::NonZeroExit => "non_zero_exit",
            Self::TimedOut => "timed_out",
            Self::WorkDirUnavailable => "work_dir_unavailable",
            Self::SimulationOnly => "simulation_only",
        }
    }
}

/// Outcome of a settled invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    /// Parsed output of a real process run.
    Real { tool: String, result: Value, elapsed: Duration },
    /// Synthetic output, already tagged with `simulated: true`.
    Simulated {
        tool: String,
        result: Value,
        reason: SimulationReason,
    },
}

impl ToolOutcome {
    pub fn is_simulated(&self) -> bool {
        matches!(self, Self::Simulated { .. })
    }

    pub fn tool(&self) -> &str {
        match self {
            Self::Real { tool, .. } | Self::Simulated { tool, .. } => tool,
        }
    }

    /// Label used for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Real { .. } => "real",
            Self::Simulated { .. } => "simulated",
        }
    }

    /// Normalized JSON body returned to HTTP callers.
    pub fn into_value(self) -> Value {
        match self {
            Self::Real {
                tool,
                result,
                elapsed,
            } => {
                let mut object = into_object(result);
                object.insert("tool".to_string(), Value::String(tool));
                object.insert("simulated".to_string(), Value::Bool(false));
                object.insert(
                    "elapsedMs".to_string(),
                    Value::from(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)),
                );
                Value::Object(object)
            }
            Self::Simulated { result, .. } => result,
        }
    }
}

/// Wrap non-object values so callers always receive a JSON object.
pub(crate) fn into_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("data".to_string(), other);
            map
        }
    }
}

/// Catalogue entry describing a registered tool.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub id: String,
    pub description: String,
    pub mode: ExecutionMode,
    pub installed: bool,
    pub install_dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_real_outcome_is_tagged() {
        let outcome = ToolOutcome::Real {
            tool: "nmap".to_string(),
            result: json!({ "hosts": [] }),
            elapsed: Duration::from_millis(42),
        };
        let value = outcome.into_value();
        assert_eq!(value["simulated"], json!(false));
        assert_eq!(value["tool"], json!("nmap"));
        assert_eq!(value["elapsedMs"], json!(42));
    }

    #[test]
    fn test_non_object_result_is_wrapped() {
        let object = into_object(json!([1, 2, 3]));
        assert_eq!(object["data"], json!([1, 2, 3]));
    }

    #[test]
    fn test_invocation_builder() {
        let invocation = Invocation::new("nmap")
            .arg("-oG")
            .args(["-", "10.0.0.1"])
            .current_dir("/opt/nmap");
        assert_eq!(invocation.args, vec!["-oG", "-", "10.0.0.1"]);
        assert_eq!(invocation.current_dir, Some(PathBuf::from("/opt/nmap")));
    }
}
