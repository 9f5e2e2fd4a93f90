//! Load config from file and environment.

use log::warn;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_MANIFEST_URL: &str =
    "https://test-streams.mux.dev/x36xhzz/url_0/193039199_mp4_h264_aac_hd_7.m3u8";
pub const DEFAULT_CORE_CONFIG: &str = "{\"swarmId\":\"TEST_KOTLIN\"}";

/// Host configuration. File: --config path, ~/.config/p2pml/config.toml or /etc/p2pml/config.toml.
/// Env overrides: P2PML_SERVER_PORT, P2PML_ENGINE_PORT, P2PML_CORE_CONFIG, P2PML_MANIFEST_URL.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Local proxy port (default 8081).
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    /// Engine bridge port (default 8090).
    #[serde(default = "default_engine_port")]
    pub engine_port: u16,
    #[serde(default = "default_manifest_url")]
    pub manifest_url: String,
    /// JSON handed to the engine at init.
    #[serde(default = "default_core_config")]
    pub core_config_json: String,
    #[serde(default = "default_http_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_http_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_segment_timeout_ms")]
    pub segment_timeout_ms: u64,
    /// How long manifest resolution waits for the engine before going HTTP-only.
    #[serde(default = "default_engine_ready_timeout_ms")]
    pub engine_ready_timeout_ms: u64,
}

fn default_server_port() -> u16 {
    8081
}
fn default_engine_port() -> u16 {
    p2pml_core::DEFAULT_ENGINE_PORT
}
fn default_manifest_url() -> String {
    DEFAULT_MANIFEST_URL.to_string()
}
fn default_core_config() -> String {
    DEFAULT_CORE_CONFIG.to_string()
}
fn default_http_timeout_ms() -> u64 {
    15_000
}
fn default_segment_timeout_ms() -> u64 {
    20_000
}
fn default_engine_ready_timeout_ms() -> u64 {
    10_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: default_server_port(),
            engine_port: default_engine_port(),
            manifest_url: default_manifest_url(),
            core_config_json: default_core_config(),
            connect_timeout_ms: default_http_timeout_ms(),
            read_timeout_ms: default_http_timeout_ms(),
            segment_timeout_ms: default_segment_timeout_ms(),
            engine_ready_timeout_ms: default_engine_ready_timeout_ms(),
        }
    }
}

/// Load config: merge default, then config file (explicit path first), then env vars.
pub fn load(path: Option<&Path>) -> Config {
    let mut c = load_file(path).unwrap_or_default();
    apply_env(&mut c, |key| std::env::var(key).ok());
    c
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(p) = var("P2PML_SERVER_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.server_port = p;
    }
    if let Some(p) = var("P2PML_ENGINE_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.engine_port = p;
    }
    if let Some(s) = var("P2PML_CORE_CONFIG") {
        c.core_config_json = s;
    }
    if let Some(s) = var("P2PML_MANIFEST_URL") {
        c.manifest_url = s;
    }
}

fn config_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(p) = explicit {
        out.push(p.to_path_buf());
    }
    if let Some(h) = std::env::var_os("HOME").map(PathBuf::from) {
        out.push(h.join(".config/p2pml/config.toml"));
    }
    out.push(PathBuf::from("/etc/p2pml/config.toml"));
    out
}

fn load_file(explicit: Option<&Path>) -> Option<Config> {
    for p in config_paths(explicit) {
        if p.exists() {
            match std::fs::read_to_string(&p) {
                Ok(s) => match toml::from_str::<Config>(&s) {
                    Ok(c) => return Some(c),
                    Err(e) => warn!("ignoring {}: {}", p.display(), e),
                },
                Err(e) => warn!("cannot read {}: {}", p.display(), e),
            }
            break;
        }
    }
    None
}
