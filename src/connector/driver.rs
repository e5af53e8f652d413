//! Driver abstraction for pluggable device and cloud connectors

use super::outbound::OutboundQueue;
use crate::error::GatewayError;
use anyhow::Result;
use async_trait::async_trait;
use gateway_shared::ConnectorRole;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{error, warn};

/// Observer for the data a connector emits
pub type DataHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Observer for errors a connector reports outside of its lifecycle steps
pub type ErrorHandler = Arc<dyn Fn(&anyhow::Error) + Send + Sync>;

/// The concrete behavior behind a connector.
///
/// Every step may complete immediately or suspend. The defaults fail with
/// `NotImplemented`; a driver must override the steps it supports.
#[async_trait]
pub trait ConnectorDriver: Send + Sync {
    /// Validate and apply configuration before starting
    async fn configure(&self, _ctx: &ConnectorContext) -> Result<()> {
        Err(GatewayError::NotImplemented("configure").into())
    }

    /// Open the underlying channel and begin producing data
    async fn start(&self, _ctx: &ConnectorContext) -> Result<()> {
        Err(GatewayError::NotImplemented("start").into())
    }

    /// Release the underlying channel
    async fn stop(&self, _ctx: &ConnectorContext) -> Result<()> {
        Err(GatewayError::NotImplemented("stop").into())
    }
}

/// Handle given to a driver for reaching its connector's identity, config and events.
///
/// Cheap to clone; background tasks spawned by a driver keep their own copy.
#[derive(Clone)]
pub struct ConnectorContext {
    id: Arc<str>,
    role: ConnectorRole,
    config: Arc<Map<String, Value>>,
    data: Arc<Mutex<Option<DataHandler>>>,
    errors: Arc<Mutex<Option<ErrorHandler>>>,
    outbound: Option<OutboundQueue>,
}

impl ConnectorContext {
    pub(crate) fn new(id: &str, role: ConnectorRole, config: Map<String, Value>) -> Self {
        let outbound = match role {
            ConnectorRole::Cloud => Some(OutboundQueue::new()),
            ConnectorRole::Device => None,
        };

        Self {
            id: Arc::from(id),
            role,
            config: Arc::new(config),
            data: Arc::new(Mutex::new(None)),
            errors: Arc::new(Mutex::new(None)),
            outbound,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> ConnectorRole {
        self.role
    }

    pub fn config(&self) -> &Map<String, Value> {
        &self.config
    }

    /// String config value, if present and a string
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    /// Unsigned config value, if present and a non-negative integer
    pub fn config_u64(&self, key: &str) -> Option<u64> {
        self.config.get(key).and_then(Value::as_u64)
    }

    /// Outbound buffer; only cloud connectors have one
    pub fn outbound(&self) -> Option<&OutboundQueue> {
        self.outbound.as_ref()
    }

    /// Deliver a payload to the data observer
    pub fn emit(&self, payload: Value) {
        let handler = self.data.lock().clone();
        match handler {
            Some(handler) => handler(payload),
            None => warn!(connector = %self.id, "Dropping data: no observer registered"),
        }
    }

    /// Report a runtime error that happened outside a lifecycle step
    pub fn report_error(&self, err: anyhow::Error) {
        let handler = self.errors.lock().clone();
        match handler {
            Some(handler) => handler(&err),
            None => error!(connector = %self.id, "Connector error: {:#}", err),
        }
    }

    pub(crate) fn set_data_handler(&self, handler: DataHandler) {
        *self.data.lock() = Some(handler);
    }

    pub(crate) fn set_error_handler(&self, handler: ErrorHandler) {
        *self.errors.lock() = Some(handler);
    }
}

impl std::fmt::Debug for ConnectorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorContext")
            .field("id", &self.id)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}
