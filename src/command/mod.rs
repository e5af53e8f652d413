//! Command-and-control handling for the gateway
//!
//! This module handles:
//! - Wrapping inbound commands with their reply channel
//! - Acknowledging, dispatching and settling each command
//! - Reporting results back through the originating cloud connector

mod executor;
pub mod handlers;
mod request;

pub use executor::{CommandHandler, CommandResult};
pub use request::{CncRequest, FailureReason};
