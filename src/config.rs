//! Minimal runtime configuration helpers.
//! Defaults target a gateway reachable as `ems-esp.local` on the LAN.

use std::time::Duration;
use std::{fs, path::Path};

pub const DEFAULT_GATEWAY_URL: &str = "http://ems-esp.local";
pub const DEFAULT_POLL_SECS: u64 = 30;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub gateway_url: String,
    /// Bearer access token from the gateway's user settings. Only writes need it.
    pub access_token: Option<String>,
    /// Refresh cadence of the `watch` command.
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let gateway_url = match std::env::var("GATEWAY_URL") {
            Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => DEFAULT_GATEWAY_URL.to_string(),
        };
        if !gateway_url.starts_with("http://") && !gateway_url.starts_with("https://") {
            return Err(format!("GATEWAY_URL must start with http:// or https://, got {}", gateway_url));
        }

        // Prefer env var; fallback to token.txt in working directory
        let access_token = match std::env::var("GATEWAY_TOKEN") {
            Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
            _ => match fs::read_to_string(Path::new("token.txt")) {
                Ok(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                _ => None,
            },
        };

        let poll_secs = secs_from_env("POLL_INTERVAL_SECS", DEFAULT_POLL_SECS)?;
        let timeout_secs = secs_from_env("REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?;

        Ok(Config {
            gateway_url,
            access_token,
            poll_interval: Duration::from_secs(poll_secs),
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

fn secs_from_env(name: &str, default: u64) -> Result<u64, String> {
    match std::env::var(name) {
        Ok(s) if !s.trim().is_empty() => parse_secs(name, &s),
        _ => Ok(default),
    }
}

fn parse_secs(name: &str, raw: &str) -> Result<u64, String> {
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(format!("{} must be greater than zero", name)),
        Ok(v) => Ok(v),
        Err(_) => Err(format!("{} must be a whole number of seconds, got {}", name, raw.trim())),
    }
}
