//! Load session config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;

/// Session configuration. File: ~/.config/dropwire/config.toml or
/// /etc/dropwire/config.toml. Env override: DROPWIRE_RELAY_URL.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Relay base URL; the room path is appended per session.
    #[serde(default = "default_relay_base_url")]
    pub relay_base_url: String,
}

fn default_relay_base_url() -> String {
    "ws://localhost:8000".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            relay_base_url: default_relay_base_url(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> SessionConfig {
    let mut c = load_file().unwrap_or_default();
    if let Ok(url) = std::env::var("DROPWIRE_RELAY_URL") {
        if !url.trim().is_empty() {
            c.relay_base_url = url;
        }
    }
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/dropwire/config.toml"));
    }
    out.push(PathBuf::from("/etc/dropwire/config.toml"));
    out
}

fn load_file() -> Option<SessionConfig> {
    for p in config_paths() {
        if p.exists() {
            if let Ok(s) = std::fs::read_to_string(&p) {
                if let Ok(c) = toml::from_str::<SessionConfig>(&s) {
                    return Some(c);
                }
            }
            break;
        }
    }
    None
}
