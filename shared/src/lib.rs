//! Edge Gateway Shared Types
//!
//! This crate provides the envelope types exchanged over the command-and-control
//! channel and the connector lifecycle state machine used by the gateway runtime.

pub mod state_machine;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

pub use state_machine::{ConnectorState, ConnectorStateMachine, LifecycleEvent, TransitionResult};

/// Shadow protocol parameters
pub mod shadow {
    /// Retries granted to every get/update before it is reported as timed out
    pub const DEFAULT_RETRIES: u32 = 2;

    /// Action name reported for a shadow get
    pub const ACTION_GET: &str = "get_shadow";

    /// Action name reported for a shadow update
    pub const ACTION_UPDATE: &str = "update_shadow";
}

/// Command-and-control action names understood by the gateway
pub mod actions {
    pub const START_CONNECTOR: &str = "start_connector";
    pub const STOP_CONNECTOR: &str = "stop_connector";
}

/// Errors raised while validating envelopes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Command id must be a non-empty string")]
    MissingCommandId,

    #[error("Command action must be a non-empty string")]
    MissingAction,

    #[error("Malformed command: {0}")]
    Malformed(String),
}

/// Which side of the gateway a connector talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorRole {
    /// Cloud endpoint: receives device data, buffers outbound messages
    Cloud,
    /// Device or sensor: pure data source
    Device,
}

impl fmt::Display for ConnectorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorRole::Cloud => write!(f, "cloud"),
            ConnectorRole::Device => write!(f, "device"),
        }
    }
}

/// Inbound command envelope delivered by a CnC connector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CncCommand {
    pub id: String,
    pub action: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl CncCommand {
    /// Create a command with empty params
    pub fn new(id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            params: Map::new(),
        }
    }

    /// Builder-style param setter
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Parse a command out of an arbitrary JSON payload
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let command: CncCommand =
            serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        command.validate()?;
        Ok(command)
    }

    /// Check that id and action are non-empty
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.id.is_empty() {
            return Err(ProtocolError::MissingCommandId);
        }
        if self.action.is_empty() {
            return Err(ProtocolError::MissingAction);
        }
        Ok(())
    }
}

/// Kind of reply sent back for a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyType {
    Log,
    Acknowledge,
    Finish,
    Fail,
}

impl fmt::Display for ReplyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReplyType::Log => "log",
            ReplyType::Acknowledge => "acknowledge",
            ReplyType::Finish => "finish",
            ReplyType::Fail => "fail",
        };
        f.write_str(name)
    }
}

/// Outbound reply envelope pushed into the originating connector's buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CncReply {
    pub request_id: String,
    #[serde(rename = "type")]
    pub reply_type: ReplyType,
    pub message: String,
}

impl CncReply {
    /// Progress log line for a running command
    pub fn log(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(request_id, ReplyType::Log, message)
    }

    /// Command received and being processed
    pub fn acknowledge(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(request_id, ReplyType::Acknowledge, message)
    }

    /// Command completed successfully
    pub fn finish(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(request_id, ReplyType::Finish, message)
    }

    /// Command failed
    pub fn fail(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(request_id, ReplyType::Fail, message)
    }

    fn new(request_id: impl Into<String>, reply_type: ReplyType, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            reply_type,
            message: message.into(),
        }
    }
}
