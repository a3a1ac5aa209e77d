use anyhow::{anyhow, Context, Result};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

pub fn required_env(name: &str) -> Result<String> {
    env::var(name).with_context(|| format!("missing env: {name}"))
}

pub fn socket_addr_from_env(name: &str, default: &str) -> Result<SocketAddr> {
    let value = env::var(name).unwrap_or_else(|_| default.to_string());
    SocketAddr::from_str(&value).map_err(|err| anyhow!("invalid socket addr for {name}: {err}"))
}

/// Comma-separated administrator allow-list. Entries are trimmed and
/// lowercased; an empty list is a configuration error, not an open door.
pub fn admin_emails_from_env(name: &str) -> Result<Vec<String>> {
    let raw = required_env(name)?;
    let emails: Vec<String> = raw
        .split(',')
        .map(|entry| entry.trim().to_lowercase())
        .filter(|entry| !entry.is_empty())
        .collect();
    if emails.is_empty() {
        return Err(anyhow!("no administrator emails configured in {name}"));
    }
    Ok(emails)
}

pub fn seconds_from_env(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}
