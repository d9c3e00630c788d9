//! Tool strategy interface and the registry that maps tool ids to it.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::RngCore;
use serde_json::Value;

use crate::adapters;
use crate::error::ToolResult;
use crate::types::{CompanionScript, ExecutionMode, Invocation, ToolContext};

/// One integrated external tool.
///
/// Adding a tool means implementing this trait and registering it; the
/// bridge never matches on tool ids.
pub trait ExternalTool: Send + Sync {
    /// Stable identifier used in `/osint/{toolId}`.
    fn id(&self) -> &'static str;

    /// Short human-readable description.
    fn description(&self) -> &'static str;

    /// Directory name under the tools root. Its presence means "installed".
    fn install_dir_name(&self) -> &'static str {
        self.id()
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Native
    }

    /// Whether the invocation needs a private scratch directory.
    fn needs_work_dir(&self) -> bool {
        false
    }

    /// Script written into the install directory by simulation-only tools.
    fn companion_script(&self) -> Option<CompanionScript> {
        None
    }

    /// Validate parameters and build the process invocation.
    fn build_args(&self, params: &Value, ctx: &ToolContext<'_>) -> ToolResult<Invocation>;

    /// Turn the output of a successful run into a result object.
    ///
    /// `params` are the ones `build_args` accepted for this run.
    fn parse_output(&self, stdout: &str, params: &Value, ctx: &ToolContext<'_>)
    -> ToolResult<Value>;

    /// Produce a synthetic result with the same top-level keys as
    /// `parse_output`.
    ///
    /// Must tolerate missing or malformed parameters.
    fn simulate(&self, params: &Value, rng: &mut dyn RngCore) -> Value;
}

/// Lookup table of registered tools.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Arc<dyn ExternalTool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with every built-in tool.
    pub fn with_builtin_tools() -> Self {
        let mut registry = Self::new();
        for tool in adapters::builtin_tools() {
            registry.register(tool);
        }
        registry
    }

    /// Register a tool, returning the one it replaced if the id was taken.
    pub fn register(&mut self, tool: Arc<dyn ExternalTool>) -> Option<Arc<dyn ExternalTool>> {
        self.tools.insert(tool.id(), tool)
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ExternalTool>> {
        self.tools.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tools.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.tools.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ExternalTool>> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_tools_registered() {
        let registry = ToolRegistry::with_builtin_tools();
        let ids: Vec<_> = registry.ids().collect();
        assert_eq!(
            ids,
            vec!["camscan", "holehe", "nmap", "sherlock", "theharvester"]
        );
        assert!(registry.get("sherlock").is_some());
        assert!(registry.get("metasploit").is_none());
    }

    #[test]
    fn test_register_replaces_existing() {
        let mut registry = ToolRegistry::with_builtin_tools();
        let before = registry.len();
        let replaced = registry.register(Arc::new(adapters::Sherlock));
        assert!(replaced.is_some());
        assert_eq!(registry.len(), before);
    }
}
