//! Username presence across social platforms.

use rand::{Rng, RngCore};
use serde_json::{Value, json};

use super::PYTHON;
use crate::error::ToolResult;
use crate::registry::ExternalTool;
use crate::types::{Invocation, ToolContext};
use crate::validate;

const ID: &str = "sherlock";

const PLATFORMS: &[(&str, &str)] = &[
    ("GitHub", "https://github.com/{}"),
    ("Twitter", "https://twitter.com/{}"),
    ("Instagram", "https://www.instagram.com/{}"),
    ("Reddit", "https://www.reddit.com/user/{}"),
    ("GitLab", "https://gitlab.com/{}"),
    ("Keybase", "https://keybase.io/{}"),
    ("HackerNews", "https://news.ycombinator.com/user?id={}"),
    ("Medium", "https://medium.com/@{}"),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct Sherlock;

impl ExternalTool for Sherlock {
    fn id(&self) -> &'static str {
        ID
    }

    fn description(&self) -> &'static str {
        "Hunt down a username across social platforms"
    }

    fn build_args(&self, params: &Value, ctx: &ToolContext<'_>) -> ToolResult<Invocation> {
        let username = validate::required_str(ID, params, "username")?;
        validate::username(ID, username)?;

        Ok(Invocation::new(PYTHON)
            .args(["-m", "sherlock", username, "--print-found", "--no-color"])
            .current_dir(ctx.install_dir))
    }

    fn parse_output(
        &self,
        stdout: &str,
        params: &Value,
        _ctx: &ToolContext<'_>,
    ) -> ToolResult<Value> {
        let mut username = params
            .get("username")
            .and_then(Value::as_str)
            .map(str::to_string);
        let mut results = Vec::new();

        for line in stdout.lines().map(str::trim) {
            if let Some(rest) = line.strip_prefix("[*] Checking username ") {
                if let Some(name) = rest.split_whitespace().next() {
                    username = Some(name.to_string());
                }
                continue;
            }
            let Some(rest) = line.strip_prefix("[+]") else {
                continue;
            };
            let Some((platform, url)) = rest.split_once(": ") else {
                continue;
            };
            results.push(json!({
                "platform": platform.trim(),
                "url": url.trim(),
                "exists": true,
                "username": username.as_deref().unwrap_or_default(),
            }));
        }

        Ok(json!({
            "username": username,
            "found": results.len(),
            "results": results,
        }))
    }

    fn simulate(&self, params: &Value, rng: &mut dyn RngCore) -> Value {
        let username = validate::lenient_str(params, "username", "unknown");
        let results: Vec<Value> = PLATFORMS
            .iter()
            .map(|(platform, template)| {
                json!({
                    "platform": platform,
                    "url": template.replace("{}", username),
                    "exists": rng.gen_bool(0.4),
                    "username": username,
                })
            })
            .collect();
        let found = results.iter().filter(|r| r["exists"] == json!(true)).count();

        json!({
            "username": username,
            "found": found,
            "results": results,
        })
    }
}
