//! Domain email and host harvesting.
//!
//! theHarvester writes its findings to a report file rather than stdout, so
//! this tool asks the bridge for a private work directory and reads
//! `report.json` back out of it.

use std::path::Path;

use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use serde::Deserialize;
use serde_json::{Value, json};

use super::PYTHON;
use crate::error::{ToolError, ToolResult};
use crate::registry::ExternalTool;
use crate::types::{Invocation, ToolContext};
use crate::validate;

const ID: &str = "theharvester";
const REPORT_STEM: &str = "report";
const SOURCES: &[&str] = &["bing", "duckduckgo", "crtsh", "all"];
const DEFAULT_SOURCE: &str = "crtsh";
const DEFAULT_LIMIT: u64 = 100;
const MAX_LIMIT: u64 = 500;

const MAILBOXES: &[&str] = &["admin", "info", "security", "support", "noc", "sales"];
const SUBDOMAINS: &[&str] = &["www", "mail", "vpn", "cam", "nvr", "portal", "api", "dev"];

#[derive(Debug, Clone, Copy, Default)]
pub struct TheHarvester;

#[derive(Debug, Default, Deserialize)]
struct Report {
    #[serde(default)]
    emails: Vec<String>,
    #[serde(default)]
    hosts: Vec<String>,
    #[serde(default)]
    ips: Vec<String>,
}

impl ExternalTool for TheHarvester {
    fn id(&self) -> &'static str {
        ID
    }

    fn description(&self) -> &'static str {
        "Gather emails and hostnames for a domain from public sources"
    }

    fn install_dir_name(&self) -> &'static str {
        "theHarvester"
    }

    fn needs_work_dir(&self) -> bool {
        true
    }

    fn build_args(&self, params: &Value, ctx: &ToolContext<'_>) -> ToolResult<Invocation> {
        let domain = validate::required_str(ID, params, "domain")?;
        validate::domain(ID, domain)?;

        let source = validate::optional_str(ID, params, "source")?.unwrap_or(DEFAULT_SOURCE);
        if !SOURCES.contains(&source) {
            return Err(ToolError::invalid(
                ID,
                format!("unsupported source {source:?}, expected one of {SOURCES:?}"),
            ));
        }

        let limit = match params.get("limit") {
            None | Some(Value::Null) => DEFAULT_LIMIT,
            Some(value) => value
                .as_u64()
                .filter(|l| (1..=MAX_LIMIT).contains(l))
                .ok_or_else(|| {
                    ToolError::invalid(ID, format!("limit must be between 1 and {MAX_LIMIT}"))
                })?,
        };

        let work_dir = ctx
            .work_dir
            .ok_or_else(|| ToolError::invalid(ID, "work directory is required"))?;

        Ok(Invocation::new(PYTHON)
            .arg(ctx.install_dir.join("theHarvester.py").to_string_lossy())
            .args(["-d", domain, "-b", source, "-l"])
            .arg(limit.to_string())
            .arg("-f")
            .arg(work_dir.join(REPORT_STEM).to_string_lossy())
            .current_dir(ctx.install_dir))
    }

    fn parse_output(
        &self,
        _stdout: &str,
        params: &Value,
        ctx: &ToolContext<'_>,
    ) -> ToolResult<Value> {
        let work_dir = ctx
            .work_dir
            .ok_or_else(|| ToolError::parse(ID, "no work directory to read the report from"))?;
        let report = read_report(work_dir)?;

        Ok(json!({
            "domain": params.get("domain").and_then(Value::as_str),
            "emails": report.emails,
            "hosts": report.hosts,
            "ips": report.ips,
        }))
    }

    fn simulate(&self, params: &Value, rng: &mut dyn RngCore) -> Value {
        let domain = validate::lenient_str(params, "domain", "example.com");

        let email_count = rng.gen_range(1..=4);
        let emails: Vec<String> = MAILBOXES
            .choose_multiple(&mut *rng, email_count)
            .map(|mailbox| format!("{mailbox}@{domain}"))
            .collect();

        let host_count = rng.gen_range(2..=6);
        let hosts: Vec<String> = SUBDOMAINS
            .choose_multiple(&mut *rng, host_count)
            .map(|sub| format!("{sub}.{domain}"))
            .collect();

        let ips: Vec<String> = (0..hosts.len())
            .map(|_| format!("203.0.113.{}", rng.gen_range(1..=254)))
            .collect();

        json!({
            "domain": domain,
            "emails": emails,
            "hosts": hosts,
            "ips": ips,
        })
    }
}

fn read_report(work_dir: &Path) -> ToolResult<Report> {
    let path = work_dir.join(format!("{REPORT_STEM}.json"));
    let contents = std::fs::read_to_string(&path)
        .map_err(|e| ToolError::parse(ID, format!("cannot read {}: {e}", path.display())))?;
    serde_json::from_str(&contents)
        .map_err(|e| ToolError::parse(ID, format!("invalid report JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::top_level_keys;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_build_args_writes_report_into_work_dir() {
        let install = Path::new("/opt/tools/theHarvester");
        let work = Path::new("/tmp/legion-theharvester-abc");
        let ctx = ToolContext::new(install).with_work_dir(work);

        let invocation = TheHarvester
            .build_args(&json!({ "domain": "example.com", "limit": 50 }), &ctx)
            .unwrap();
        assert_eq!(
            invocation.args,
            vec![
                "/opt/tools/theHarvester/theHarvester.py",
                "-d",
                "example.com",
                "-b",
                "crtsh",
                "-l",
                "50",
                "-f",
                "/tmp/legion-theharvester-abc/report",
            ]
        );
    }

    #[test]
    fn test_build_args_rejects_bad_source_and_limit() {
        let install = Path::new("/opt/tools/theHarvester");
        let work = Path::new("/tmp/w");
        let ctx = ToolContext::new(install).with_work_dir(work);

        let bad_source = json!({ "domain": "example.com", "source": "shodan; ls" });
        assert!(TheHarvester.build_args(&bad_source, &ctx).is_err());
        let bad_limit = json!({ "domain": "example.com", "limit": 10_000 });
        assert!(TheHarvester.build_args(&bad_limit, &ctx).is_err());
    }

    #[test]
    fn test_parse_reads_report_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("report.json"),
            r#"{"emails":["info@example.com"],"hosts":["www.example.com"],"asns":[]}"#,
        )
        .unwrap();
        let ctx = ToolContext::new(Path::new("/opt/tools/theHarvester")).with_work_dir(dir.path());

        let value = TheHarvester
            .parse_output("", &json!({ "domain": "example.com" }), &ctx)
            .unwrap();
        assert_eq!(
            value,
            json!({
                "domain": "example.com",
                "emails": ["info@example.com"],
                "hosts": ["www.example.com"],
                "ips": [],
            })
        );
    }

    #[test]
    fn test_simulated_keys_match_parsed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("report.json"), r#"{"emails":[]}"#).unwrap();
        let ctx = ToolContext::new(Path::new("/opt/tools/theHarvester")).with_work_dir(dir.path());
        let params = json!({ "domain": "example.org" });

        let parsed = TheHarvester.parse_output("", &params, &ctx).unwrap();
        let simulated = TheHarvester.simulate(&params, &mut StdRng::seed_from_u64(5));
        assert_eq!(top_level_keys(&parsed), top_level_keys(&simulated));
    }

    #[test]
    fn test_parse_missing_report_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(Path::new("/opt/tools/theHarvester")).with_work_dir(dir.path());
        let err = TheHarvester.parse_output("", &json!({}), &ctx).unwrap_err();
        assert!(matches!(err, ToolError::Parse { .. }));
    }
}
