//! Host and port scanning via nmap's grepable output.

use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use serde_json::{Value, json};

use crate::error::{ToolError, ToolResult};
use crate::registry::ExternalTool;
use crate::types::{Invocation, ToolContext};
use crate::validate;

const ID: &str = "nmap";

const COMMON_PORTS: &[(u16, &str)] = &[
    (22, "ssh"),
    (80, "http"),
    (443, "https"),
    (554, "rtsp"),
    (8000, "http-alt"),
    (8080, "http-proxy"),
    (37777, "dahua-dvr"),
    (5000, "upnp"),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct Nmap;

#[derive(Debug)]
struct Host {
    address: String,
    hostname: Option<String>,
    ports: Vec<Value>,
}

impl ExternalTool for Nmap {
    fn id(&self) -> &'static str {
        ID
    }

    fn description(&self) -> &'static str {
        "Scan a host or network range for open ports"
    }

    fn build_args(&self, params: &Value, ctx: &ToolContext<'_>) -> ToolResult<Invocation> {
        let target = validate::required_str(ID, params, "target")?;
        validate::host(ID, target)?;

        let mut invocation = Invocation::new(ctx.install_dir.join("nmap")).args(["-oG", "-"]);

        match validate::optional_str(ID, params, "ports")? {
            Some(ports) => {
                validate::ports(ID, ports)?;
                invocation = invocation.args(["-p", ports]);
            }
            None if params.get("fast").and_then(Value::as_bool).unwrap_or(true) => {
                invocation = invocation.args(["-T4", "-F"]);
            }
            None => {}
        }

        Ok(invocation.arg(target))
    }

    fn parse_output(
        &self,
        stdout: &str,
        params: &Value,
        _ctx: &ToolContext<'_>,
    ) -> ToolResult<Value> {
        let mut hosts: Vec<Host> = Vec::new();

        for line in stdout.lines() {
            let Some(rest) = line.strip_prefix("Host: ") else {
                continue;
            };
            let mut fields = rest.split('\t');
            let (address, hostname) = parse_host_field(fields.next().unwrap_or_default());
            if address.is_empty() {
                return Err(ToolError::parse(ID, format!("host line without address: {line:?}")));
            }

            let index = match hosts.iter().position(|h| h.address == address) {
                Some(index) => index,
                None => {
                    hosts.push(Host {
                        address: address.to_string(),
                        hostname: hostname.map(str::to_string),
                        ports: Vec::new(),
                    });
                    hosts.len() - 1
                }
            };

            for field in fields {
                if let Some(ports) = field.strip_prefix("Ports: ") {
                    for entry in ports.split(',').map(str::trim).filter(|e| !e.is_empty()) {
                        hosts[index].ports.push(parse_port_entry(entry)?);
                    }
                }
            }
        }

        let hosts: Vec<Value> = hosts
            .into_iter()
            .map(|h| {
                json!({
                    "address": h.address,
                    "hostname": h.hostname,
                    "ports": h.ports,
                })
            })
            .collect();

        Ok(json!({
            "target": params.get("target").and_then(Value::as_str),
            "hostsUp": hosts.len(),
            "hosts": hosts,
        }))
    }

    fn simulate(&self, params: &Value, rng: &mut dyn RngCore) -> Value {
        let target = validate::lenient_str(params, "target", "192.168.1.0/24");
        let host_count = rng.gen_range(1..=3);

        let hosts: Vec<Value> = (0..host_count)
            .map(|_| {
                let port_count = rng.gen_range(1..=4);
                let mut ports: Vec<(u16, &str)> = COMMON_PORTS
                    .choose_multiple(&mut *rng, port_count)
                    .copied()
                    .collect();
                ports.sort_unstable_by_key(|(port, _)| *port);

                json!({
                    "address": format!("192.168.1.{}", rng.gen_range(2..=254)),
                    "hostname": Value::Null,
                    "ports": ports
                        .into_iter()
                        .map(|(port, service)| json!({
                            "port": port,
                            "state": "open",
                            "protocol": "tcp",
                            "service": service,
                        }))
                        .collect::<Vec<_>>(),
                })
            })
            .collect();

        json!({
            "target": target,
            "hostsUp": hosts.len(),
            "hosts": hosts,
        })
    }
}

/// `192.168.1.10 (cam.local)` or `192.168.1.10 ()`.
fn parse_host_field(field: &str) -> (&str, Option<&str>) {
    let mut parts = field.splitn(2, ' ');
    let address = parts.next().unwrap_or_default().trim();
    let hostname = parts
        .next()
        .map(|name| name.trim().trim_start_matches('(').trim_end_matches(')'))
        .filter(|name| !name.is_empty());
    (address, hostname)
}

/// `22/open/tcp//ssh///`
fn parse_port_entry(entry: &str) -> ToolResult<Value> {
    let parts: Vec<&str> = entry.split('/').collect();
    if parts.len() < 3 {
        return Err(ToolError::parse(ID, format!("malformed port entry: {entry:?}")));
    }
    let port: u16 = parts[0]
        .parse()
        .map_err(|_| ToolError::parse(ID, format!("invalid port number: {:?}", parts[0])))?;
    let service = parts.get(4).copied().filter(|s| !s.is_empty());

    Ok(json!({
        "port": port,
        "state": parts[1],
        "protocol": parts[2],
        "service": service,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::top_level_keys;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    const OUTPUT: &str = "\
# Nmap 7.94 scan initiated as: nmap -oG - -T4 -F 192.168.1.0/24
Host: 192.168.1.10 (cam.local)\tStatus: Up
Host: 192.168.1.10 (cam.local)\tPorts: 80/open/tcp//http///, 554/open/tcp//rtsp///\tIgnored State: closed (98)
Host: 192.168.1.20 ()\tStatus: Up
Host: 192.168.1.20 ()\tPorts: 22/filtered/tcp//ssh///
# Nmap done -- 256 IP addresses (2 hosts up) scanned in 2.31 seconds
";

    #[test]
    fn test_build_args() {
        let ctx = ToolContext::new(Path::new("/opt/tools/nmap"));
        let fast = Nmap
            .build_args(&json!({ "target": "192.168.1.0/24" }), &ctx)
            .unwrap();
        assert_eq!(fast.program, Path::new("/opt/tools/nmap/nmap"));
        assert_eq!(fast.args, vec!["-oG", "-", "-T4", "-F", "192.168.1.0/24"]);

        let ports = Nmap
            .build_args(&json!({ "target": "10.0.0.5", "ports": "80,554" }), &ctx)
            .unwrap();
        assert_eq!(ports.args, vec!["-oG", "-", "-p", "80,554", "10.0.0.5"]);
    }

    #[test]
    fn test_build_args_rejects_bad_input() {
        let ctx = ToolContext::new(Path::new("/opt/tools/nmap"));
        assert!(Nmap.build_args(&json!({}), &ctx).is_err());
        assert!(Nmap.build_args(&json!({ "target": "--script=evil" }), &ctx).is_err());
        assert!(
            Nmap.build_args(&json!({ "target": "10.0.0.5", "ports": "1-99999" }), &ctx)
                .is_err()
        );
    }

    #[test]
    fn test_parse_grepable_output() {
        let ctx = ToolContext::new(Path::new("/opt/tools/nmap"));
        let params = json!({ "target": "192.168.1.0/24" });
        let value = Nmap.parse_output(OUTPUT, &params, &ctx).unwrap();
        assert_eq!(value["target"], json!("192.168.1.0/24"));
        assert_eq!(value["hostsUp"], json!(2));
        assert_eq!(value["hosts"][0]["hostname"], json!("cam.local"));
        assert_eq!(
            value["hosts"][0]["ports"][1],
            json!({ "port": 554, "state": "open", "protocol": "tcp", "service": "rtsp" })
        );
        assert_eq!(value["hosts"][1]["hostname"], Value::Null);
        assert_eq!(value["hosts"][1]["ports"][0]["state"], json!("filtered"));
    }

    #[test]
    fn test_simulated_keys_match_parsed() {
        let ctx = ToolContext::new(Path::new("/opt/tools/nmap"));
        let params = json!({ "target": "10.0.0.0/24" });
        let parsed = Nmap.parse_output(OUTPUT, &params, &ctx).unwrap();
        let simulated = Nmap.simulate(&params, &mut StdRng::seed_from_u64(5));
        assert_eq!(top_level_keys(&parsed), top_level_keys(&simulated));
    }

    #[test]
    fn test_parse_rejects_bad_port() {
        let ctx = ToolContext::new(Path::new("/opt/tools/nmap"));
        let err = Nmap
            .parse_output("Host: 10.0.0.1 ()\tPorts: abc/open/tcp//x///\n", &json!({}), &ctx)
            .unwrap_err();
        assert!(matches!(err, ToolError::Parse { .. }));
    }
}
