//! P2P enable state and the JSON configs passed through to the engine.

use serde::Deserialize;
use serde_json::{Map, Value};

/// Whether segment requests may be routed to the engine. Starts enabled.
#[derive(Debug, Clone)]
pub struct P2PState {
    enabled: bool,
}

impl P2PState {
    pub fn new() -> Self {
        Self { enabled: true }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns true when the value actually changed.
    pub fn set_enabled(&mut self, enabled: bool) -> bool {
        if self.enabled == enabled {
            return false;
        }
        self.enabled = enabled;
        true
    }

    pub fn reset(&mut self) {
        self.enabled = true;
    }
}

impl Default for P2PState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config must be a JSON object")]
    NotAnObject,
    #[error("config key {0} has the wrong type")]
    WrongType(&'static str),
}

/// Core config handed to the engine at init. Only `swarmId` is interpreted here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoreConfig {
    pub swarm_id: Option<String>,
    raw: String,
}

impl CoreConfig {
    /// Empty or whitespace-only input means "engine defaults".
    pub fn parse(json: &str) -> Result<Self, ConfigError> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        let map = parse_object(json)?;
        let swarm_id = match map.get("swarmId") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return Err(ConfigError::WrongType("swarmId")),
        };
        Ok(Self {
            swarm_id,
            raw: json.to_string(),
        })
    }

    /// JSON string forwarded to the engine, unchanged.
    pub fn as_json(&self) -> &str {
        &self.raw
    }
}

#[derive(Debug, Deserialize)]
struct DynamicFields {
    #[serde(rename = "isP2PDisabled", default)]
    is_p2p_disabled: Option<bool>,
}

/// Runtime reconfiguration. `isP2PDisabled` is applied by the host; the whole object
/// is forwarded to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicCoreConfig {
    pub is_p2p_disabled: Option<bool>,
    raw: String,
}

impl DynamicCoreConfig {
    pub fn parse(json: &str) -> Result<Self, ConfigError> {
        let map = parse_object(json)?;
        let fields: DynamicFields = serde_json::from_value(Value::Object(map))
            .map_err(|_| ConfigError::WrongType("isP2PDisabled"))?;
        Ok(Self {
            is_p2p_disabled: fields.is_p2p_disabled,
            raw: json.to_string(),
        })
    }

    pub fn p2p_disabled(disabled: bool) -> Self {
        Self {
            is_p2p_disabled: Some(disabled),
            raw: serde_json::json!({ "isP2PDisabled": disabled }).to_string(),
        }
    }

    pub fn as_json(&self) -> &str {
        &self.raw
    }

    /// Apply the host-side part of this config. Returns true when P2P state changed.
    pub fn apply_to(&self, state: &mut P2PState) -> bool {
        match self.is_p2p_disabled {
            Some(disabled) => state.set_enabled(!disabled),
            None => false,
        }
    }
}

fn parse_object(json: &str) -> Result<Map<String, Value>, ConfigError> {
    match serde_json::from_str::<Value>(json)? {
        Value::Object(map) => Ok(map),
        _ => Err(ConfigError::NotAnObject),
    }
}
