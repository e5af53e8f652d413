//! Connector orchestration
//!
//! This module handles:
//! - Owning the CnC connector and the named device/cloud connectors
//! - Routing device data to every cloud connector
//! - Turning CnC payloads into requests for the command handler
//! - Ordered startup from configuration and ordered shutdown

mod bootstrap;
mod manager;

pub use bootstrap::{apply_connector_types, bootstrap, BootstrapReport};
pub use manager::{Hub, CNC_CONNECTOR_ID};
