//! Command handler - acknowledges and dispatches incoming CnC requests

use super::handlers::{self, HandlerContext};
use super::request::{CncRequest, FailureReason};
use crate::error::GatewayError;
use crate::hub::Hub;
use gateway_shared::actions;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

/// Outcome of handling one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// Command completed successfully
    Completed { message: String },
    /// Command accepted but execution failed
    Failed { message: String },
    /// Command rejected before doing anything (unknown action, bad params)
    Rejected { message: String },
}

/// Executes CnC requests against the hub
#[derive(Debug, Clone)]
pub struct CommandHandler {
    ctx: HandlerContext,
}

impl CommandHandler {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self {
            ctx: HandlerContext {
                hub: Arc::downgrade(&hub),
            },
        }
    }

    /// Subscribe to the hub's CnC requests and handle them in the background.
    ///
    /// Returns `None` if someone else already took the hub's CnC stream.
    pub fn spawn(hub: Arc<Hub>) -> Option<JoinHandle<()>> {
        let requests = hub.subscribe_cnc()?;
        let handler = Self::new(hub);
        Some(tokio::spawn(handler.run(requests)))
    }

    /// Handle requests until the stream closes, which happens once the hub is
    /// dropped; each request runs in its own task
    pub async fn run(self, mut requests: mpsc::UnboundedReceiver<CncRequest>) {
        while let Some(request) = requests.recv().await {
            let handler = self.clone();
            let span = info_span!("cnc", request = %request.id(), action = %request.action());
            tokio::spawn(
                async move {
                    handler.handle(request).await;
                }
                .instrument(span),
            );
        }
        info!("CnC request stream closed");
    }

    /// Acknowledge, dispatch, then settle the request with finish or fail
    pub async fn handle(&self, request: CncRequest) -> CommandResult {
        if let Err(e) = request.acknowledge(None) {
            warn!(request = %request.id(), "Failed to acknowledge: {}", e);
        }

        let result = match request.action() {
            actions::START_CONNECTOR => handlers::handle_start_connector(&self.ctx, &request).await,
            actions::STOP_CONNECTOR => handlers::handle_stop_connector(&self.ctx, &request).await,
            other => CommandResult::Rejected {
                message: GatewayError::UnrecognizedAction(other.to_string()).to_string(),
            },
        };

        let reply = match &result {
            CommandResult::Completed { message } => {
                info!(request = %request.id(), "Command completed: {}", message);
                request.finish(Some(message))
            }
            CommandResult::Failed { message } => {
                warn!(request = %request.id(), "Command failed: {}", message);
                request.fail(FailureReason::Error(message.clone()))
            }
            CommandResult::Rejected { message } => {
                warn!(request = %request.id(), "Command rejected: {}", message);
                request.fail(FailureReason::Error(message.clone()))
            }
        };

        if let Err(e) = reply {
            error!(request = %request.id(), "Failed to settle command: {}", e);
        }
        result
    }
}
