//! Built-in tool integrations.

mod camscan;
mod harvester;
mod holehe;
mod nmap;
mod sherlock;

use std::sync::Arc;

pub use camscan::CamScan;
pub use harvester::TheHarvester;
pub use holehe::Holehe;
pub use nmap::Nmap;
pub use sherlock::Sherlock;

use crate::registry::ExternalTool;

/// Every tool the registry ships with.
pub fn builtin_tools() -> Vec<Arc<dyn ExternalTool>> {
    vec![
        Arc::new(Sherlock),
        Arc::new(Holehe),
        Arc::new(Nmap),
        Arc::new(TheHarvester),
        Arc::new(CamScan),
    ]
}

/// Interpreter used for the Python-based tools.
pub(crate) const PYTHON: &str = "python3";

#[cfg(test)]
pub(crate) fn top_level_keys(value: &serde_json::Value) -> std::collections::BTreeSet<String> {
    value
        .as_object()
        .map(|object| object.keys().cloned().collect())
        .unwrap_or_default()
}
