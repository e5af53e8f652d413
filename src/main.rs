use edge_gateway::command::CommandHandler;
use edge_gateway::config::GatewayConfig;
use edge_gateway::connector::ConnectorRegistry;
use edge_gateway::connectors;
use edge_gateway::hub::{self, Hub};
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable naming the config file when no argument is given
const CONFIG_ENV: &str = "GATEWAY_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = match std::env::args().nth(1).or_else(|| std::env::var(CONFIG_ENV).ok()) {
        Some(path) => {
            info!("Loading config from {}", path);
            GatewayConfig::load(&path)?
        }
        None => {
            info!("No config given, using stdio CnC only");
            GatewayConfig::default()
        }
    };

    let mut registry = ConnectorRegistry::new();
    connectors::register_builtin(&mut registry);
    hub::apply_connector_types(&mut registry, &config)?;
    info!("Connector types: {}", registry.types().join(", "));

    let hub = Arc::new(Hub::new(registry));
    let handler = CommandHandler::spawn(hub.clone());

    let report = hub::bootstrap(&hub, &config).await;
    if !report.is_clean() {
        warn!("{} connector(s) failed to start", report.failed.len());
    }
    info!("Gateway running: {}", hub.connector_ids().join(", "));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    let result = hub.shutdown().await;
    drop(hub);
    if let Some(handler) = handler {
        if let Err(e) = handler.await {
            warn!("Command handler ended abnormally: {}", e);
        }
    }
    match result {
        Ok(()) => info!("Gateway stopped"),
        Err(e) => {
            error!("Shutdown finished with error: {}", e);
            return Err(e.into());
        }
    }
    Ok(())
}
