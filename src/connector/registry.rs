//! Static registry resolving connector type names to factories

use super::lifecycle::Connector;
use crate::error::{GatewayError, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Builds a connector from its id and config
pub type ConnectorFactory =
    Arc<dyn Fn(&str, Map<String, Value>) -> anyhow::Result<Connector> + Send + Sync>;

/// Type name -> factory table, filled once at startup
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    factories: HashMap<String, ConnectorFactory>,
    aliases: HashMap<String, String>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a type name, replacing any previous one
    pub fn register<F>(&mut self, type_name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&str, Map<String, Value>) -> anyhow::Result<Connector> + Send + Sync + 'static,
    {
        let type_name = type_name.into();
        debug!(connector_type = %type_name, "Registered connector type");
        self.factories.insert(type_name, Arc::new(factory));
        self
    }

    /// Make `alias` resolve to the already registered `target` type
    pub fn alias(&mut self, alias: impl Into<String>, target: impl Into<String>) -> Result<&mut Self> {
        let target = target.into();
        if !self.factories.contains_key(&target) {
            return Err(GatewayError::UnknownType(target));
        }
        self.aliases.insert(alias.into(), target);
        Ok(self)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.resolve(type_name).is_some()
    }

    /// Registered type names, sorted
    pub fn types(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .factories
            .keys()
            .chain(self.aliases.keys())
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Build a connector of the given type
    pub fn create(&self, id: &str, type_name: &str, config: &Map<String, Value>) -> Result<Connector> {
        if id.is_empty() {
            return Err(GatewayError::InvalidId);
        }
        if type_name.is_empty() {
            return Err(GatewayError::InvalidType);
        }

        let factory = self
            .resolve(type_name)
            .ok_or_else(|| GatewayError::UnknownType(type_name.to_string()))?;

        factory(id, config.clone()).map_err(|e| match e.downcast::<GatewayError>() {
            Ok(err) => err,
            Err(err) => GatewayError::Connector(err),
        })
    }

    fn resolve(&self, type_name: &str) -> Option<&ConnectorFactory> {
        let target = self
            .aliases
            .get(type_name)
            .map(String::as_str)
            .unwrap_or(type_name);
        self.factories.get(target)
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("types", &self.types())
            .finish()
    }
}
