//! Device shadow synchronization
//!
//! This module handles:
//! - Abstracting the cloud shadow service behind [`ShadowTransport`]
//! - Correlating get/update requests with their status and timeout events
//! - Retrying timed-out requests before reporting failure

mod manager;
mod transport;

pub use manager::{ShadowAction, ShadowCallback, ShadowFailure, ShadowManager, ShadowResponse};
pub use transport::{ShadowEvent, ShadowStatus, ShadowTransport};
