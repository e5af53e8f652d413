//! Connector lifecycle command handlers (start, stop)

use super::HandlerContext;
use crate::command::{CncRequest, CommandResult};
use crate::config::ConnectorDefinition;
use tracing::info;

/// Handle START_CONNECTOR: `{ connectorId, definition: { type, config } }`
pub async fn handle_start_connector(ctx: &HandlerContext, request: &CncRequest) -> CommandResult {
    let id = request.param_str("connectorId").unwrap_or_default();

    let definition = match request.params().get("definition") {
        Some(value) => match ConnectorDefinition::from_value(value.clone()) {
            Ok(definition) => definition,
            Err(e) => return CommandResult::Failed { message: e.to_string() },
        },
        None => {
            return CommandResult::Rejected {
                message: "Missing definition parameter".into(),
            };
        }
    };

    info!(
        request = %request.id(),
        connector = %id,
        connector_type = %definition.connector_type,
        "Starting connector on command"
    );

    let hub = match ctx.hub() {
        Ok(hub) => hub,
        Err(e) => return CommandResult::Failed { message: e.to_string() },
    };

    match hub.start_connector(id, &definition).await {
        Ok(()) => CommandResult::Completed {
            message: format!("Connector started: {}", id),
        },
        Err(e) => CommandResult::Failed { message: e.to_string() },
    }
}

/// Handle STOP_CONNECTOR: `{ connectorId }`
pub async fn handle_stop_connector(ctx: &HandlerContext, request: &CncRequest) -> CommandResult {
    let id = request.param_str("connectorId").unwrap_or_default();

    info!(request = %request.id(), connector = %id, "Stopping connector on command");

    let hub = match ctx.hub() {
        Ok(hub) => hub,
        Err(e) => return CommandResult::Failed { message: e.to_string() },
    };

    match hub.stop_connector(id).await {
        Ok(()) => CommandResult::Completed {
            message: format!("Connector stopped: {}", id),
        },
        Err(e) => CommandResult::Failed { message: e.to_string() },
    }
}
