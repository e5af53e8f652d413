//! Edge gateway runtime
//!
//! Connectors move data between devices and the cloud; the hub owns them and
//! routes device data to every cloud connector; commands arriving on the CnC
//! connector start and stop connectors at runtime.

pub mod command;
pub mod config;
pub mod connector;
pub mod connectors;
pub mod error;
pub mod hub;
pub mod shadow;

pub use error::{GatewayError, Result};
