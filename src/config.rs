//! Gateway configuration: which connectors the hub is told to start

use crate::error::{GatewayError, Result};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// Major version of the configuration format this build understands
pub const SUPPORTED_CONFIG_MAJOR: u64 = 1;

/// Type name plus connector-specific config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorDefinition {
    #[serde(rename = "type")]
    pub connector_type: String,
    pub config: Map<String, Value>,
}

impl ConnectorDefinition {
    pub fn new(connector_type: impl Into<String>, config: Map<String, Value>) -> Self {
        Self {
            connector_type: connector_type.into(),
            config,
        }
    }

    /// Parse a definition sent over the wire
    pub fn from_value(value: Value) -> Result<Self> {
        let definition: ConnectorDefinition = serde_json::from_value(value)
            .map_err(|e| GatewayError::InvalidDefinition(e.to_string()))?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn validate(&self) -> Result<()> {
        if self.connector_type.is_empty() {
            return Err(GatewayError::InvalidType);
        }
        Ok(())
    }
}

/// What the gateway starts on its own at boot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupMode {
    /// CnC connector, then every configured connector
    #[default]
    All,
    /// Only the CnC connector; the rest arrive as commands
    CncOnly,
}

/// Top-level configuration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    pub version: String,
    #[serde(default)]
    pub startup_mode: StartupMode,
    /// Extra type names mapped onto registered connector types
    #[serde(default)]
    pub connector_types: BTreeMap<String, String>,
    #[serde(default)]
    pub cnc: Option<ConnectorDefinition>,
    #[serde(default)]
    pub connectors: BTreeMap<String, ConnectorDefinition>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            version: "1.0.0".into(),
            startup_mode: StartupMode::All,
            connector_types: BTreeMap::new(),
            cnc: Some(ConnectorDefinition::new("stdio", Map::new())),
            connectors: BTreeMap::new(),
        }
    }
}

impl GatewayConfig {
    /// Parse and validate a JSON document
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let config: GatewayConfig = serde_json::from_str(text).context("Invalid gateway config")?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("Failed to load config {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        let version = semver::Version::parse(&self.version).map_err(|e| {
            GatewayError::Validation(format!("Invalid config version {:?}: {}", self.version, e))
        })?;
        if version.major != SUPPORTED_CONFIG_MAJOR {
            return Err(GatewayError::Validation(format!(
                "Unsupported config version {} (expected {}.x)",
                version, SUPPORTED_CONFIG_MAJOR
            )));
        }

        if let Some(cnc) = &self.cnc {
            cnc.validate()?;
        }
        for (id, definition) in &self.connectors {
            if id.is_empty() {
                return Err(GatewayError::InvalidId);
            }
            definition.validate()?;
        }
        Ok(())
    }
}
