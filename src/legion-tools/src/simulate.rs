//! Synthetic tool output.
//!
//! Results are fixed in shape (same fields, bounded cardinality) and random
//! in content. The random source is owned by the generator and can be seeded
//! for reproducible tests.

use std::sync::Mutex;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::Value;
use tracing::debug;

use crate::registry::ExternalTool;
use crate::types::{SimulationReason, into_object};

/// Produces simulated results for any registered tool.
pub struct SimulatedOutputGenerator {
    rng: Mutex<StdRng>,
}

impl std::fmt::Debug for SimulatedOutputGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedOutputGenerator").finish_non_exhaustive()
    }
}

impl SimulatedOutputGenerator {
    /// Generator seeded from operating-system entropy.
    pub fn from_entropy() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Generator with a fixed seed; the same seed yields the same sequence.
    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    pub fn from_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
        }
    }

    /// Build a simulated result for `tool`, tagged with `simulated: true`.
    pub fn generate(&self, tool: &dyn ExternalTool, params: &Value, reason: SimulationReason) -> Value {
        let raw = {
            // A poisoned lock only means another generation panicked mid-way;
            // the rng state itself is still usable.
            let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            tool.simulate(params, &mut *rng)
        };

        let mut object = into_object(raw);
        object.insert("tool".to_string(), Value::String(tool.id().to_string()));
        object.insert("simulated".to_string(), Value::Bool(true));
        object.insert(
            "simulationReason".to_string(),
            Value::String(reason.as_str().to_string()),
        );
        object.insert(
            "generatedAt".to_string(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );

        debug!(tool = tool.id(), reason = reason.as_str(), "Generated simulated result");
        Value::Object(object)
    }
}

impl Default for SimulatedOutputGenerator {
    fn default() -> Self {
        Self::from_entropy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{Nmap, Sherlock};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn strip_timestamp(mut value: Value) -> Value {
        if let Some(object) = value.as_object_mut() {
            object.remove("generatedAt");
        }
        value
    }

    #[test]
    fn test_marker_fields() {
        let generator = SimulatedOutputGenerator::seeded(7);
        let value = generator.generate(&Sherlock, &json!({}), SimulationReason::NotInstalled);
        assert_eq!(value["simulated"], json!(true));
        assert_eq!(value["tool"], json!("sherlock"));
        assert_eq!(value["simulationReason"], json!("not_installed"));
    }

    #[test]
    fn test_same_seed_same_content() {
        let params = json!({ "target": "192.168.1.0/24" });
        let a = SimulatedOutputGenerator::seeded(42).generate(&Nmap, &params, SimulationReason::NonZeroExit);
        let b = SimulatedOutputGenerator::seeded(42).generate(&Nmap, &params, SimulationReason::NonZeroExit);
        assert_eq!(strip_timestamp(a), strip_timestamp(b));
    }

    #[test]
    fn test_shape_is_stable_across_seeds() {
        let params = json!({ "username": "alice" });
        for seed in 0..16 {
            let value = SimulatedOutputGenerator::seeded(seed).generate(
                &Sherlock,
                &params,
                SimulationReason::NotInstalled,
            );
            let results = value["results"].as_array().expect("results array");
            assert!(!results.is_empty());
            for entry in results {
                let keys: Vec<_> = entry.as_object().unwrap().keys().cloned().collect();
                assert_eq!(keys, vec!["exists", "platform", "url", "username"]);
            }
        }
    }
}
