//! Connector lifecycle: guarded start/stop around a pluggable driver

use super::driver::{ConnectorContext, ConnectorDriver};
use super::outbound::OutboundQueue;
use crate::error::{GatewayError, Result};
use gateway_shared::{
    ConnectorRole, ConnectorState, ConnectorStateMachine, LifecycleEvent, TransitionResult,
};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, Instrument};

/// A lifecycle transition, published to state-change subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: ConnectorState,
    pub to: ConnectorState,
}

/// A device or cloud connector.
///
/// Goes through its lifecycle exactly once. A connector that ends up in
/// `Error` or `Stopped` is discarded and a fresh one is built to retry.
pub struct Connector {
    ctx: ConnectorContext,
    fsm: Mutex<ConnectorStateMachine>,
    driver: Box<dyn ConnectorDriver>,
    state_tx: Mutex<Option<mpsc::UnboundedSender<StateChange>>>,
}

impl Connector {
    /// Create a connector in `Init` state
    pub fn new(
        id: impl Into<String>,
        role: ConnectorRole,
        config: Map<String, Value>,
        driver: impl ConnectorDriver + 'static,
    ) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(GatewayError::InvalidId);
        }

        Ok(Self {
            ctx: ConnectorContext::new(&id, role, config),
            fsm: Mutex::new(ConnectorStateMachine::new()),
            driver: Box::new(driver),
            state_tx: Mutex::new(None),
        })
    }

    /// Create a cloud-role connector
    pub fn cloud(
        id: impl Into<String>,
        config: Map<String, Value>,
        driver: impl ConnectorDriver + 'static,
    ) -> Result<Self> {
        Self::new(id, ConnectorRole::Cloud, config, driver)
    }

    /// Create a device-role connector
    pub fn device(
        id: impl Into<String>,
        config: Map<String, Value>,
        driver: impl ConnectorDriver + 'static,
    ) -> Result<Self> {
        Self::new(id, ConnectorRole::Device, config, driver)
    }

    pub fn id(&self) -> &str {
        self.ctx.id()
    }

    pub fn role(&self) -> ConnectorRole {
        self.ctx.role()
    }

    pub fn config(&self) -> &Map<String, Value> {
        self.ctx.config()
    }

    pub fn state(&self) -> ConnectorState {
        self.fsm.lock().state()
    }

    /// Register the single observer for emitted data, replacing any previous one
    pub fn on_data(&self, handler: impl Fn(Value) + Send + Sync + 'static) {
        self.ctx.set_data_handler(std::sync::Arc::new(handler));
    }

    /// Register the single observer for runtime errors, replacing any previous one
    pub fn on_error(&self, handler: impl Fn(&anyhow::Error) + Send + Sync + 'static) {
        self.ctx.set_error_handler(std::sync::Arc::new(handler));
    }

    /// Receive every subsequent lifecycle transition
    pub fn subscribe_state_changes(&self) -> mpsc::UnboundedReceiver<StateChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.state_tx.lock() = Some(tx);
        rx
    }

    /// Outbound buffer (cloud connectors only)
    pub fn outbound(&self) -> Option<&OutboundQueue> {
        self.ctx.outbound()
    }

    /// Queue a message for the cloud
    pub fn add_data(&self, payload: Value) -> Result<()> {
        match self.ctx.outbound() {
            Some(queue) => {
                queue.push(payload);
                Ok(())
            }
            None => Err(GatewayError::WrongRole {
                id: self.id().to_string(),
                actual: self.role(),
                expected: ConnectorRole::Cloud,
            }),
        }
    }

    /// Run configure then start.
    ///
    /// The state flips to `StartingUp` before any driver code runs, so a second
    /// concurrent call is rejected instead of racing the first.
    pub async fn start(&self) -> Result<()> {
        if let TransitionResult::Invalid { from, .. } =
            self.transition(LifecycleEvent::StartRequested)
        {
            return Err(GatewayError::CannotStart(from));
        }

        let span = info_span!("connector", id = %self.id(), role = %self.role());
        let outcome = async {
            self.driver.configure(&self.ctx).await?;
            self.driver.start(&self.ctx).await
        }
        .instrument(span)
        .await;

        match outcome {
            Ok(()) => {
                self.transition(LifecycleEvent::StartSucceeded);
                info!(connector = %self.id(), "Connector started");
                Ok(())
            }
            Err(e) => {
                self.transition(LifecycleEvent::Failed);
                error!(connector = %self.id(), "Connector failed to start: {:#}", e);
                Err(GatewayError::Connector(e))
            }
        }
    }

    /// Run the driver's stop step
    pub async fn stop(&self) -> Result<()> {
        if let TransitionResult::Invalid { from, .. } =
            self.transition(LifecycleEvent::StopRequested)
        {
            return Err(GatewayError::CannotStop(from));
        }

        let span = info_span!("connector", id = %self.id(), role = %self.role());
        let outcome = self.driver.stop(&self.ctx).instrument(span).await;

        match outcome {
            Ok(()) => {
                self.transition(LifecycleEvent::StopSucceeded);
                info!(connector = %self.id(), "Connector stopped");
                Ok(())
            }
            Err(e) => {
                self.transition(LifecycleEvent::Failed);
                error!(connector = %self.id(), "Connector failed to stop: {:#}", e);
                Err(GatewayError::Connector(e))
            }
        }
    }

    fn transition(&self, event: LifecycleEvent) -> TransitionResult {
        let mut fsm = self.fsm.lock();
        let from = fsm.state();
        let result = fsm.process_event(event);
        drop(fsm);

        if let TransitionResult::Success(to) = result {
            debug!(connector = %self.id(), "State: {} -> {}", from, to);
            if let Some(tx) = self.state_tx.lock().as_ref() {
                let _ = tx.send(StateChange { from, to });
            }
        }
        result
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("id", &self.id())
            .field("role", &self.role())
            .field("state", &self.state())
            .finish()
    }
}
