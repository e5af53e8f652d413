//! Applying a gateway configuration to a hub at boot

use super::manager::{Hub, CNC_CONNECTOR_ID};
use crate::config::{GatewayConfig, StartupMode};
use crate::connector::ConnectorRegistry;
use crate::error::{GatewayError, Result};
use futures::future::join_all;
use tracing::{error, info, warn};

/// What happened while starting the configured connectors
#[derive(Debug, Default)]
pub struct BootstrapReport {
    pub started: Vec<String>,
    pub failed: Vec<(String, GatewayError)>,
}

impl BootstrapReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Register the config's extra type names on the registry
pub fn apply_connector_types(registry: &mut ConnectorRegistry, config: &GatewayConfig) -> Result<()> {
    for (alias, target) in &config.connector_types {
        registry.alias(alias.clone(), target.clone())?;
    }
    Ok(())
}

/// Start the CnC connector, then (in `All` mode) every configured connector.
///
/// Individual failures are logged and collected; they never stop the rest.
pub async fn bootstrap(hub: &Hub, config: &GatewayConfig) -> BootstrapReport {
    let mut report = BootstrapReport::default();

    match &config.cnc {
        Some(definition) => match hub.start_cnc(definition).await {
            Ok(()) => report.started.push(CNC_CONNECTOR_ID.to_string()),
            Err(e) => {
                error!("Failed to start CnC connector: {}", e);
                report.failed.push((CNC_CONNECTOR_ID.to_string(), e));
            }
        },
        None => warn!("No CnC connector configured; gateway cannot receive commands"),
    }

    if config.startup_mode == StartupMode::CncOnly {
        info!(
            configured = config.connectors.len(),
            "Startup mode cnc_only: leaving connectors to commands"
        );
        return report;
    }

    let results = join_all(config.connectors.iter().map(|(id, definition)| async move {
        (id.clone(), hub.start_connector(id, definition).await)
    }))
    .await;

    for (id, result) in results {
        match result {
            Ok(()) => report.started.push(id),
            Err(e) => {
                error!(connector = %id, "Failed to start connector: {}", e);
                report.failed.push((id, e));
            }
        }
    }

    info!(
        started = report.started.len(),
        failed = report.failed.len(),
        "Bootstrap complete"
    );
    report
}
