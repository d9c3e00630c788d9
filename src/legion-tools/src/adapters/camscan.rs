//! Exposed IP-camera discovery.
//!
//! Runs in [`ExecutionMode::SimulationOnly`]: the bridge writes the companion
//! script on first use but never executes it.

use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use serde_json::{Value, json};

use super::PYTHON;
use crate::error::{ToolError, ToolResult};
use crate::registry::ExternalTool;
use crate::types::{CompanionScript, ExecutionMode, Invocation, ToolContext};
use crate::validate;

const ID: &str = "camscan";
const DEFAULT_NETWORK: &str = "192.168.1.0/24";

const SCRIPT: CompanionScript = CompanionScript {
    file_name: "camscan.py",
    contents: r#"#!/usr/bin/env python3
"""Scan a network range for exposed RTSP and HTTP camera endpoints."""
import argparse
import json
import sys


def main():
    parser = argparse.ArgumentParser(description=__doc__)
    parser.add_argument("--network", default="192.168.1.0/24")
    args = parser.parse_args()
    json.dump({"network": args.network, "scannedHosts": 0, "cameras": []}, sys.stdout)


if __name__ == "__main__":
    main()
"#,
};

/// (vendor, models, rtsp path, http port)
const VENDORS: &[(&str, &[&str], &str, u16)] = &[
    ("Hikvision", &["DS-2CD2143G0-I", "DS-2CD2385G1"], "/Streaming/Channels/101", 80),
    ("Dahua", &["IPC-HDW2431T", "IPC-HFW1230S"], "/cam/realmonitor?channel=1&subtype=0", 80),
    ("Axis", &["M3045-V", "P1448-LE"], "/axis-media/media.amp", 80),
    ("Reolink", &["RLC-510A", "RLC-820A"], "/h264Preview_01_main", 8000),
    ("Amcrest", &["IP8M-2496E"], "/cam/realmonitor?channel=1&subtype=1", 37777),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct CamScan;

impl ExternalTool for CamScan {
    fn id(&self) -> &'static str {
        ID
    }

    fn description(&self) -> &'static str {
        "Discover exposed IP cameras on a network range (simulation only)"
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::SimulationOnly
    }

    fn companion_script(&self) -> Option<CompanionScript> {
        Some(SCRIPT)
    }

    fn build_args(&self, params: &Value, ctx: &ToolContext<'_>) -> ToolResult<Invocation> {
        let network = validate::optional_str(ID, params, "network")?.unwrap_or(DEFAULT_NETWORK);
        validate::host(ID, network)?;

        Ok(Invocation::new(PYTHON)
            .arg(ctx.install_dir.join(SCRIPT.file_name).to_string_lossy())
            .args(["--network", network])
            .current_dir(ctx.install_dir))
    }

    fn parse_output(
        &self,
        stdout: &str,
        _params: &Value,
        _ctx: &ToolContext<'_>,
    ) -> ToolResult<Value> {
        let value: Value = serde_json::from_str(stdout.trim())
            .map_err(|e| ToolError::parse(ID, format!("invalid JSON output: {e}")))?;
        if !value.get("cameras").is_some_and(Value::is_array) {
            return Err(ToolError::parse(ID, "output has no cameras array"));
        }
        Ok(value)
    }

    fn simulate(&self, params: &Value, rng: &mut dyn RngCore) -> Value {
        let network = validate::lenient_str(params, "network", DEFAULT_NETWORK);
        let count = rng.gen_range(1..=6);

        let cameras: Vec<Value> = (0..count)
            .filter_map(|_| {
                let (vendor, models, path, http_port) = VENDORS.choose(&mut *rng)?;
                let model = models.choose(&mut *rng)?;
                let ip = format!("192.168.1.{}", rng.gen_range(2..=254));
                let auth_required = rng.gen_bool(0.7);
                Some(json!({
                    "ip": ip,
                    "port": http_port,
                    "vendor": vendor,
                    "model": model,
                    "rtspUrl": format!("rtsp://{ip}:554{path}"),
                    "authRequired": auth_required,
                    "firmware": format!(
                        "V{}.{}.{}",
                        rng.gen_range(1..=5),
                        rng.gen_range(0..=9),
                        rng.gen_range(0..=20)
                    ),
                }))
            })
            .collect();

        json!({
            "network": network,
            "scannedHosts": 254,
            "cameras": cameras,
            "mode": ExecutionMode::SimulationOnly,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::path::Path;

    #[test]
    fn test_simulated_cameras_shape() {
        let mut rng = StdRng::seed_from_u64(3);
        let value = CamScan.simulate(&json!({}), &mut rng);
        assert_eq!(value["network"], json!(DEFAULT_NETWORK));
        assert_eq!(value["mode"], json!("simulation-only"));
        let cameras = value["cameras"].as_array().unwrap();
        assert!((1..=6).contains(&cameras.len()));
        for camera in cameras {
            assert!(camera["rtspUrl"].as_str().unwrap().starts_with("rtsp://192.168.1."));
        }
    }

    #[test]
    fn test_companion_script_and_invocation() {
        assert_eq!(CamScan.mode(), ExecutionMode::SimulationOnly);
        let script = CamScan.companion_script().unwrap();
        assert_eq!(script.file_name, "camscan.py");

        let ctx = ToolContext::new(Path::new("/opt/tools/camscan"));
        let invocation = CamScan.build_args(&json!({}), &ctx).unwrap();
        assert_eq!(
            invocation.args,
            vec!["/opt/tools/camscan/camscan.py", "--network", DEFAULT_NETWORK]
        );
    }

    #[test]
    fn test_parse_script_output() {
        let ctx = ToolContext::new(Path::new("/opt/tools/camscan"));
        let stdout = r#"{"network":"10.0.0.0/24","scannedHosts":0,"cameras":[]}"#;
        assert!(CamScan.parse_output(stdout, &json!({}), &ctx).is_ok());
        assert!(CamScan.parse_output("{}", &json!({}), &ctx).is_err());
    }
}
