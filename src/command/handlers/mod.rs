//! Command handlers for the recognized CnC actions

mod connector;

pub use connector::{handle_start_connector, handle_stop_connector};

use crate::error::{GatewayError, Result};
use crate::hub::Hub;
use std::sync::{Arc, Weak};

/// Context passed to command handlers.
///
/// Holds the hub weakly so the CnC stream closes once the hub is dropped.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub hub: Weak<Hub>,
}

impl HandlerContext {
    pub fn hub(&self) -> Result<Arc<Hub>> {
        self.hub.upgrade().ok_or(GatewayError::HubShutDown)
    }
}
