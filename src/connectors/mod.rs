//! Built-in connector implementations
//!
//! - `stdio` (cloud): newline-delimited JSON over stdin/stdout
//! - `heartbeat` (device): periodic liveness beats
//! - `shadow-cnc` (cloud): CnC over a device shadow; needs an embedder-supplied transport

pub mod heartbeat;
pub mod shadow_cnc;
pub mod stdio;

use crate::connector::{Connector, ConnectorRegistry};
use crate::shadow::ShadowTransport;
use serde_json::{Map, Value};
use std::sync::Arc;

pub use heartbeat::HeartbeatDriver;
pub use shadow_cnc::ShadowCncDriver;
pub use stdio::JsonLinesDriver;

/// Register the connectors that need no outside collaborator
pub fn register_builtin(registry: &mut ConnectorRegistry) {
    registry.register(stdio::TYPE_NAME, |id, config| {
        Ok(Connector::cloud(id, config, JsonLinesDriver::stdio())?)
    });
    registry.register(heartbeat::TYPE_NAME, |id, config| {
        Ok(Connector::device(id, config, HeartbeatDriver::new())?)
    });
}

/// Register `shadow-cnc`, building a transport from each connector's config
pub fn register_shadow_cnc<F>(registry: &mut ConnectorRegistry, transports: F)
where
    F: Fn(&Map<String, Value>) -> anyhow::Result<Arc<dyn ShadowTransport>> + Send + Sync + 'static,
{
    registry.register(shadow_cnc::TYPE_NAME, move |id, config| {
        let transport = transports(&config)?;
        Ok(Connector::cloud(id, config, ShadowCncDriver::new(transport))?)
    });
}
