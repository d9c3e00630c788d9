//! Parameter validation shared by the adapters.
//!
//! Every value that ends up on a command line passes through here. Values
//! are never interpolated into a shell, but they must also not be mistaken
//! for tool flags.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::{ToolError, ToolResult};

static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,63}$").expect("Invalid username regex"));

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_.+-]{1,64}@[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)+$").expect("Invalid email regex")
});

static HOST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9.:-]{0,252}(/[0-9]{1,3})?$").expect("Invalid host regex")
});

static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?\.)+[A-Za-z]{2,63}$")
        .expect("Invalid domain regex")
});

static PORTS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{1,5}(-[0-9]{1,5})?(,[0-9]{1,5}(-[0-9]{1,5})?)*$").expect("Invalid ports regex"));

/// Fetch a required string parameter.
pub(crate) fn required_str<'a>(tool: &str, params: &'a Value, key: &str) -> ToolResult<&'a str> {
    match params.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim()),
        Some(Value::String(_)) => Err(ToolError::invalid(tool, format!("{key} cannot be empty"))),
        Some(_) => Err(ToolError::invalid(tool, format!("{key} must be a string"))),
        None => Err(ToolError::invalid(tool, format!("{key} is required"))),
    }
}

/// Fetch an optional string parameter.
pub(crate) fn optional_str<'a>(
    tool: &str,
    params: &'a Value,
    key: &str,
) -> ToolResult<Option<&'a str>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim())),
        Some(_) => Err(ToolError::invalid(tool, format!("{key} must be a string"))),
    }
}

pub(crate) fn username(tool: &str, value: &str) -> ToolResult<()> {
    check(tool, "username", value, &USERNAME_RE)
}

pub(crate) fn email(tool: &str, value: &str) -> ToolResult<()> {
    check(tool, "email", value, &EMAIL_RE)
}

pub(crate) fn host(tool: &str, value: &str) -> ToolResult<()> {
    check(tool, "target", value, &HOST_RE)
}

pub(crate) fn domain(tool: &str, value: &str) -> ToolResult<()> {
    check(tool, "domain", value, &DOMAIN_RE)
}

pub(crate) fn ports(tool: &str, value: &str) -> ToolResult<()> {
    check(tool, "ports", value, &PORTS_RE)?;
    let out_of_range = value
        .split([',', '-'])
        .filter_map(|p| p.parse::<u32>().ok())
        .any(|p| p == 0 || p > u32::from(u16::MAX));
    if out_of_range {
        return Err(ToolError::invalid(tool, "ports must be between 1 and 65535"));
    }
    Ok(())
}

fn check(tool: &str, field: &str, value: &str, pattern: &Regex) -> ToolResult<()> {
    if pattern.is_match(value) {
        Ok(())
    } else {
        Err(ToolError::invalid(tool, format!("malformed {field}: {value:?}")))
    }
}

/// Best-effort string parameter for the simulator, which must never fail.
pub(crate) fn lenient_str<'a>(params: &'a Value, key: &str, fallback: &'a str) -> &'a str {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback)
}
