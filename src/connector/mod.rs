//! Connector runtime
//!
//! This module handles:
//! - The lifecycle every device and cloud connector goes through
//! - The driver trait concrete connectors implement
//! - Data and error observers, and the cloud-side outbound buffer
//! - Resolving connector type names to implementations

mod driver;
mod lifecycle;
mod outbound;
mod registry;

pub use driver::{ConnectorContext, ConnectorDriver, DataHandler, ErrorHandler};
pub use lifecycle::{Connector, StateChange};
pub use outbound::OutboundQueue;
pub use registry::{ConnectorFactory, ConnectorRegistry};
