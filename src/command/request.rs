//! A single inbound CnC command and its reply channel

use crate::connector::Connector;
use crate::error::{GatewayError, Result};
use gateway_shared::{CncCommand, CncReply, ConnectorRole, ProtocolError};
use serde_json::{Map, Value};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Why a command failed: an error (its message is reported) or a plain message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Error(String),
    Message(String),
}

impl From<&GatewayError> for FailureReason {
    fn from(err: &GatewayError) -> Self {
        FailureReason::Error(err.to_string())
    }
}

impl From<GatewayError> for FailureReason {
    fn from(err: GatewayError) -> Self {
        FailureReason::from(&err)
    }
}

impl From<&anyhow::Error> for FailureReason {
    fn from(err: &anyhow::Error) -> Self {
        FailureReason::Error(err.to_string())
    }
}

impl From<anyhow::Error> for FailureReason {
    fn from(err: anyhow::Error) -> Self {
        FailureReason::from(&err)
    }
}

impl From<&str> for FailureReason {
    fn from(message: &str) -> Self {
        FailureReason::Message(message.to_string())
    }
}

impl From<String> for FailureReason {
    fn from(message: String) -> Self {
        FailureReason::Message(message)
    }
}

/// One command received over the CnC channel.
///
/// Replies are pushed into the outbound buffer of the cloud connector the
/// command arrived on. The request does not keep that connector alive.
#[derive(Clone)]
pub struct CncRequest {
    id: String,
    action: String,
    params: Map<String, Value>,
    connector_id: String,
    connector: Weak<Connector>,
}

impl CncRequest {
    /// Wrap a command; the connector must be cloud-role
    pub fn new(command: CncCommand, connector: &Arc<Connector>) -> Result<Self> {
        command.validate()?;

        if connector.role() != ConnectorRole::Cloud {
            return Err(GatewayError::WrongRole {
                id: connector.id().to_string(),
                actual: connector.role(),
                expected: ConnectorRole::Cloud,
            });
        }

        Ok(Self {
            id: command.id,
            action: command.action,
            params: command.params,
            connector_id: connector.id().to_string(),
            connector: Arc::downgrade(connector),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// String param, if present and a string
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Report progress; the message must be non-empty
    pub fn log(&self, message: &str) -> Result<()> {
        if message.is_empty() {
            return Err(GatewayError::Validation(
                "Log message must be a non-empty string".into(),
            ));
        }
        self.send(CncReply::log(&self.id, message))
    }

    /// Tell the operator the command was received
    pub fn acknowledge(&self, message: Option<&str>) -> Result<()> {
        self.send(CncReply::acknowledge(&self.id, message.unwrap_or_default()))
    }

    /// Settle the command successfully
    pub fn finish(&self, message: Option<&str>) -> Result<()> {
        self.send(CncReply::finish(&self.id, message.unwrap_or_default()))
    }

    /// Settle the command with a failure
    pub fn fail(&self, reason: impl Into<FailureReason>) -> Result<()> {
        let message = match reason.into() {
            FailureReason::Error(message) => message,
            FailureReason::Message(message) if !message.is_empty() => message,
            FailureReason::Message(_) => {
                return Err(GatewayError::Validation(
                    "Failure reason must be an error or a non-empty string".into(),
                ));
            }
        };
        self.send(CncReply::fail(&self.id, message))
    }

    fn send(&self, reply: CncReply) -> Result<()> {
        let connector = self
            .connector
            .upgrade()
            .ok_or_else(|| GatewayError::ConnectorGone(self.connector_id.clone()))?;

        debug!(
            request = %self.id,
            connector = %self.connector_id,
            "Reply {}: {}", reply.reply_type, reply.message
        );
        let payload = serde_json::to_value(&reply)
            .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        connector.add_data(payload)
    }
}

impl std::fmt::Debug for CncRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CncRequest")
            .field("id", &self.id)
            .field("action", &self.action)
            .field("params", &self.params)
            .field("connector", &self.connector_id)
            .finish()
    }
}
