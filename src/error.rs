//! Error types for the gateway runtime

use gateway_shared::{ConnectorRole, ConnectorState, ProtocolError};
use thiserror::Error;

/// Errors surfaced by connectors, the hub, command requests and the shadow manager
#[derive(Error, Debug)]
pub enum GatewayError {
    // Validation
    #[error("Connector id must be a non-empty string")]
    InvalidId,

    #[error("Connector type must be a non-empty string")]
    InvalidType,

    #[error("Unknown connector type: {0}")]
    UnknownType(String),

    #[error("Connector {id} has role {actual}, expected {expected}")]
    WrongRole {
        id: String,
        actual: ConnectorRole,
        expected: ConnectorRole,
    },

    #[error("Invalid connector definition: {0}")]
    InvalidDefinition(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    // Lifecycle
    #[error("Connector cannot be started when in {0} state")]
    CannotStart(ConnectorState),

    #[error("Connector cannot be stopped when in {0} state")]
    CannotStop(ConnectorState),

    #[error("{0} is not implemented")]
    NotImplemented(&'static str),

    #[error(transparent)]
    Connector(#[from] anyhow::Error),

    // Hub
    #[error("Hub has been shut down")]
    HubShutDown,

    #[error("CnC connector has already been initialized")]
    CncAlreadyActive,

    #[error("CnC connector is not active")]
    CncNotActive,

    #[error("Connector has already been initialized: {0}")]
    AlreadyInitialized(String),

    #[error("Connector is not active: {0}")]
    NotActive(String),

    #[error("Connector is no longer available: {0}")]
    ConnectorGone(String),

    // Commands
    #[error("Unrecognized action: {0}")]
    UnrecognizedAction(String),

    // Shadow
    #[error("Shadow manager has already been started")]
    AlreadyStarted,

    #[error("Shadow manager has already been stopped")]
    AlreadyStopped,

    #[error("Shadow manager is not started")]
    NotStarted,

    #[error("Thing is not being watched: {0}")]
    NotWatched(String),

    #[error("Shadow transport error: {0}")]
    Transport(String),
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, GatewayError>;
