//! Email registration checks across online services.

use rand::{Rng, RngCore};
use serde_json::{Value, json};

use super::PYTHON;
use crate::error::ToolResult;
use crate::registry::ExternalTool;
use crate::types::{Invocation, ToolContext};
use crate::validate;

const ID: &str = "holehe";

const SERVICES: &[&str] = &[
    "twitter.com",
    "instagram.com",
    "spotify.com",
    "github.com",
    "adobe.com",
    "discord.com",
    "amazon.com",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct Holehe;

impl ExternalTool for Holehe {
    fn id(&self) -> &'static str {
        ID
    }

    fn description(&self) -> &'static str {
        "Check which services an email address is registered with"
    }

    fn build_args(&self, params: &Value, ctx: &ToolContext<'_>) -> ToolResult<Invocation> {
        let email = validate::required_str(ID, params, "email")?;
        validate::email(ID, email)?;

        Ok(Invocation::new(PYTHON)
            .args(["-m", "holehe", email, "--no-color", "--no-clear"])
            .current_dir(ctx.install_dir))
    }

    fn parse_output(
        &self,
        stdout: &str,
        params: &Value,
        _ctx: &ToolContext<'_>,
    ) -> ToolResult<Value> {
        let mut services = Vec::new();

        for line in stdout.lines().map(str::trim) {
            let (registered, rate_limited, rest) = if let Some(rest) = line.strip_prefix("[+]") {
                (true, false, rest)
            } else if let Some(rest) = line.strip_prefix("[-]") {
                (false, false, rest)
            } else if let Some(rest) = line.strip_prefix("[x]") {
                (false, true, rest)
            } else {
                continue;
            };

            // The legend line ("[+] Email used, [-] Email not used, ...") has no domain.
            let Some(service) = rest.split_whitespace().next() else {
                continue;
            };
            if !service.contains('.') || service.contains(',') {
                continue;
            }

            services.push(json!({
                "service": service,
                "registered": registered,
                "rateLimited": rate_limited,
            }));
        }

        let registered = services
            .iter()
            .filter(|s| s["registered"] == json!(true))
            .count();

        Ok(json!({
            "email": params.get("email").and_then(Value::as_str),
            "registered": registered,
            "checked": services.len(),
            "services": services,
        }))
    }

    fn simulate(&self, params: &Value, rng: &mut dyn RngCore) -> Value {
        let email = validate::lenient_str(params, "email", "unknown@example.com");
        let services: Vec<Value> = SERVICES
            .iter()
            .map(|service| {
                let rate_limited = rng.gen_bool(0.1);
                json!({
                    "service": service,
                    "registered": !rate_limited && rng.gen_bool(0.35),
                    "rateLimited": rate_limited,
                })
            })
            .collect();
        let registered = services
            .iter()
            .filter(|s| s["registered"] == json!(true))
            .count();

        json!({
            "email": email,
            "registered": registered,
            "checked": services.len(),
            "services": services,
        })
    }
}
