//! Hub: owns the CnC connector and the named device/cloud connectors

use crate::command::CncRequest;
use crate::config::ConnectorDefinition;
use crate::connector::{Connector, ConnectorRegistry};
use crate::error::{GatewayError, Result};
use futures::future::join_all;
use gateway_shared::{CncCommand, ConnectorRole};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Id given to the CnC connector
pub const CNC_CONNECTOR_ID: &str = "cnc";

#[derive(Default)]
struct HubState {
    /// Set once by `shutdown`, never cleared
    stopped: bool,
    cnc: Option<Arc<Connector>>,
    connectors: HashMap<String, Arc<Connector>>,
}

/// Central registry and orchestrator of all active connectors.
///
/// Device data is broadcast to every registered cloud connector; commands
/// arriving on the CnC connector are wrapped in [`CncRequest`]s and handed to
/// the single CnC subscriber.
pub struct Hub {
    registry: ConnectorRegistry,
    state: Arc<Mutex<HubState>>,
    cnc_tx: mpsc::UnboundedSender<CncRequest>,
    cnc_rx: Mutex<Option<mpsc::UnboundedReceiver<CncRequest>>>,
}

impl Hub {
    pub fn new(registry: ConnectorRegistry) -> Self {
        let (cnc_tx, cnc_rx) = mpsc::unbounded_channel();

        Self {
            registry,
            state: Arc::new(Mutex::new(HubState::default())),
            cnc_tx,
            cnc_rx: Mutex::new(Some(cnc_rx)),
        }
    }

    pub fn registry(&self) -> &ConnectorRegistry {
        &self.registry
    }

    /// Take the stream of CnC requests. Only the first caller gets it.
    pub fn subscribe_cnc(&self) -> Option<mpsc::UnboundedReceiver<CncRequest>> {
        self.cnc_rx.lock().take()
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().stopped
    }

    pub fn cnc(&self) -> Option<Arc<Connector>> {
        self.state.lock().cnc.clone()
    }

    pub fn connector(&self, id: &str) -> Option<Arc<Connector>> {
        self.state.lock().connectors.get(id).cloned()
    }

    /// Ids of registered connectors, sorted
    pub fn connector_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().connectors.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Create, wire and start the CnC connector
    pub async fn start_cnc(&self, definition: &ConnectorDefinition) -> Result<()> {
        self.check_cnc_slot_free()?;
        definition.validate()?;

        let connector = Arc::new(self.registry.create(
            CNC_CONNECTOR_ID,
            &definition.connector_type,
            &definition.config,
        )?);
        if connector.role() != ConnectorRole::Cloud {
            return Err(GatewayError::WrongRole {
                id: connector.id().to_string(),
                actual: connector.role(),
                expected: ConnectorRole::Cloud,
            });
        }

        self.wire_cnc(&connector);

        {
            let mut state = self.state.lock();
            if state.stopped {
                return Err(GatewayError::HubShutDown);
            }
            if state.cnc.is_some() {
                return Err(GatewayError::CncAlreadyActive);
            }
            state.cnc = Some(connector.clone());
        }

        info!(connector_type = %definition.connector_type, "Starting CnC connector");
        if let Err(e) = connector.start().await {
            let mut state = self.state.lock();
            if state.cnc.as_ref().is_some_and(|c| Arc::ptr_eq(c, &connector)) {
                state.cnc = None;
            }
            return Err(e);
        }
        Ok(())
    }

    /// Create, wire and start a named device or cloud connector
    pub async fn start_connector(&self, id: &str, definition: &ConnectorDefinition) -> Result<()> {
        self.check_connector_slot_free(id)?;
        definition.validate()?;

        let connector = Arc::new(self.registry.create(
            id,
            &definition.connector_type,
            &definition.config,
        )?);

        match connector.role() {
            ConnectorRole::Device => self.wire_device(&connector),
            ConnectorRole::Cloud => {}
        }

        {
            let mut state = self.state.lock();
            if state.stopped {
                return Err(GatewayError::HubShutDown);
            }
            if state.connectors.contains_key(id) {
                return Err(GatewayError::AlreadyInitialized(id.to_string()));
            }
            state.connectors.insert(id.to_string(), connector.clone());
        }

        info!(
            connector = %id,
            connector_type = %definition.connector_type,
            role = %connector.role(),
            "Starting connector"
        );
        if let Err(e) = connector.start().await {
            self.remove_connector(id, &connector);
            return Err(e);
        }
        Ok(())
    }

    /// Stop the CnC connector; the slot is cleared whatever the outcome
    pub async fn stop_cnc(&self) -> Result<()> {
        let connector = {
            let state = self.state.lock();
            if state.stopped {
                return Err(GatewayError::HubShutDown);
            }
            state.cnc.clone().ok_or(GatewayError::CncNotActive)?
        };

        let result = connector.stop().await;

        let mut state = self.state.lock();
        if state.cnc.as_ref().is_some_and(|c| Arc::ptr_eq(c, &connector)) {
            state.cnc = None;
        }
        result
    }

    /// Stop a named connector; the slot is cleared whatever the outcome
    pub async fn stop_connector(&self, id: &str) -> Result<()> {
        let connector = {
            let state = self.state.lock();
            if state.stopped {
                return Err(GatewayError::HubShutDown);
            }
            if id.is_empty() {
                return Err(GatewayError::InvalidId);
            }
            state
                .connectors
                .get(id)
                .cloned()
                .ok_or_else(|| GatewayError::NotActive(id.to_string()))?
        };

        let result = connector.stop().await;
        self.remove_connector(id, &connector);
        result
    }

    /// Stop everything, once.
    ///
    /// Device and cloud connectors are stopped together and all of them are
    /// awaited, failures included. The CnC connector goes last so it can still
    /// report on the others.
    pub async fn shutdown(&self) -> Result<()> {
        let (connectors, cnc) = {
            let mut state = self.state.lock();
            if state.stopped {
                return Err(GatewayError::HubShutDown);
            }
            state.stopped = true;
            let connectors: Vec<Arc<Connector>> = state.connectors.values().cloned().collect();
            (connectors, state.cnc.clone())
        };

        info!(connectors = connectors.len(), "Shutting down hub");

        let results = join_all(connectors.iter().map(|connector| async move {
            (connector.id().to_string(), connector.stop().await)
        }))
        .await;

        for (id, result) in results {
            if let Err(e) = result {
                error!(connector = %id, "Failed to stop connector during shutdown: {}", e);
            }
        }
        self.state.lock().connectors.clear();

        let result = match &cnc {
            Some(cnc) => cnc.stop().await,
            None => Ok(()),
        };
        self.state.lock().cnc = None;

        match &result {
            Ok(()) => info!("Hub shut down"),
            Err(e) => error!("Failed to stop CnC connector during shutdown: {}", e),
        }
        result
    }

    fn check_cnc_slot_free(&self) -> Result<()> {
        let state = self.state.lock();
        if state.stopped {
            return Err(GatewayError::HubShutDown);
        }
        if state.cnc.is_some() {
            return Err(GatewayError::CncAlreadyActive);
        }
        Ok(())
    }

    fn check_connector_slot_free(&self, id: &str) -> Result<()> {
        let state = self.state.lock();
        if state.stopped {
            return Err(GatewayError::HubShutDown);
        }
        if id.is_empty() {
            return Err(GatewayError::InvalidId);
        }
        if state.connectors.contains_key(id) {
            return Err(GatewayError::AlreadyInitialized(id.to_string()));
        }
        Ok(())
    }

    fn remove_connector(&self, id: &str, connector: &Arc<Connector>) {
        let mut state = self.state.lock();
        if state
            .connectors
            .get(id)
            .is_some_and(|c| Arc::ptr_eq(c, connector))
        {
            state.connectors.remove(id);
        }
    }

    /// Every payload the CnC connector emits becomes a CncRequest
    fn wire_cnc(&self, connector: &Arc<Connector>) {
        let source = Arc::downgrade(connector);
        let tx = self.cnc_tx.clone();

        connector.on_data(move |payload| {
            let Some(connector) = source.upgrade() else {
                return;
            };

            let request = CncCommand::from_value(payload)
                .map_err(GatewayError::from)
                .and_then(|command| CncRequest::new(command, &connector));

            match request {
                Ok(request) => {
                    info!(
                        request = %request.id(),
                        action = %request.action(),
                        "CnC command received"
                    );
                    if tx.send(request).is_err() {
                        warn!("No CnC subscriber, dropping command");
                    }
                }
                Err(e) => warn!(connector = %connector.id(), "Discarding malformed command: {}", e),
            }
        });
    }

    /// Device data fans out to every registered cloud connector
    fn wire_device(&self, connector: &Arc<Connector>) {
        let state = Arc::downgrade(&self.state);
        let source = connector.id().to_string();

        connector.on_data(move |payload| broadcast(&state, &source, payload));
    }
}

fn broadcast(state: &Weak<Mutex<HubState>>, source: &str, payload: Value) {
    let Some(state) = state.upgrade() else {
        return;
    };

    let sinks: Vec<Arc<Connector>> = state
        .lock()
        .connectors
        .values()
        .filter(|c| c.role() == ConnectorRole::Cloud && c.id() != source)
        .cloned()
        .collect();

    debug!(connector = %source, sinks = sinks.len(), "Routing device data");
    for sink in sinks {
        if let Err(e) = sink.add_data(payload.clone()) {
            warn!(connector = %sink.id(), "Failed to queue device data: {}", e);
        }
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Hub")
            .field("stopped", &state.stopped)
            .field("cnc", &state.cnc)
            .field("connectors", &state.connectors.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::test_support::{FailAt, Journal, RecordingDriver};
    use crate::connector::ConnectorContext;
    use gateway_shared::ConnectorState;
    use serde_json::{json, Map};
    use std::time::Duration;

    type Contexts = Arc<Mutex<HashMap<String, Arc<Mutex<Option<ConnectorContext>>>>>>;

    struct Fixture {
        hub: Hub,
        journal: Journal,
        contexts: Contexts,
    }

    impl Fixture {
        fn new() -> Self {
            let journal: Journal = Arc::default();
            let contexts: Contexts = Arc::default();
            let mut registry = ConnectorRegistry::new();

            let kinds: [(&str, ConnectorRole, Option<FailAt>, u64); 7] = [
                ("device", ConnectorRole::Device, None, 0),
                ("cloud", ConnectorRole::Cloud, None, 0),
                ("slow-device", ConnectorRole::Device, None, 20),
                ("broken-device", ConnectorRole::Device, Some(FailAt::Start), 0),
                ("stuck-device", ConnectorRole::Device, Some(FailAt::Stop), 0),
                ("broken-cloud", ConnectorRole::Cloud, Some(FailAt::Start), 0),
                ("stuck-cloud", ConnectorRole::Cloud, Some(FailAt::Stop), 0),
            ];

            for (name, role, fail, delay_ms) in kinds {
                let journal = journal.clone();
                let contexts = contexts.clone();
                registry.register(name, move |id, config| {
                    let mut driver = RecordingDriver::with_journal(journal.clone());
                    if let Some(at) = fail {
                        driver = driver.fail_at(at, "driver failure");
                    }
                    if delay_ms > 0 {
                        let delay = Duration::from_millis(delay_ms);
                        driver = driver.slow_start(delay).slow_stop(delay);
                    }
                    contexts.lock().insert(id.to_string(), driver.context());
                    Ok(Connector::new(id, role, config, driver)?)
                });
            }

            Self {
                hub: Hub::new(registry),
                journal,
                contexts,
            }
        }

        fn emit(&self, id: &str, payload: Value) {
            let handle = self.contexts.lock().get(id).cloned().expect("connector built");
            let ctx = handle.lock().clone().expect("connector configured");
            ctx.emit(payload);
        }

        fn outbound(&self, id: &str) -> Vec<Value> {
            self.hub
                .connector(id)
                .expect("connector registered")
                .outbound()
                .expect("cloud connector")
                .drain()
        }
    }

    fn def(connector_type: &str) -> ConnectorDefinition {
        ConnectorDefinition::new(connector_type, Map::new())
    }

    #[tokio::test]
    async fn test_device_data_reaches_each_cloud_connector_once() {
        let f = Fixture::new();
        f.hub.start_connector("d", &def("device")).await.unwrap();
        f.hub.start_connector("c", &def("cloud")).await.unwrap();
        f.hub.start_connector("c2", &def("cloud")).await.unwrap();

        f.emit("d", json!({"id": "x"}));

        assert_eq!(f.outbound("c"), vec![json!({"id": "x"})]);
        assert_eq!(f.outbound("c2"), vec![json!({"id": "x"})]);
    }

    #[tokio::test]
    async fn test_cloud_emissions_are_not_routed_back() {
        let f = Fixture::new();
        f.hub.start_connector("d", &def("device")).await.unwrap();
        f.hub.start_connector("c", &def("cloud")).await.unwrap();

        f.emit("c", json!({"from": "cloud"}));
        assert!(f.outbound("c").is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected_while_first_is_starting() {
        let f = Fixture::new();
        let (slow, fast) = (def("slow-device"), def("device"));
        let (first, second) = tokio::join!(
            f.hub.start_connector("d", &slow),
            f.hub.start_connector("d", &fast),
        );

        assert!(first.is_ok());
        assert_eq!(
            second.unwrap_err().to_string(),
            "Connector has already been initialized: d"
        );
    }

    #[tokio::test]
    async fn test_failed_start_frees_the_id() {
        let f = Fixture::new();
        let err = f.hub.start_connector("d", &def("broken-device")).await.unwrap_err();
        assert_eq!(err.to_string(), "driver failure");
        assert!(f.hub.connector("d").is_none());

        f.hub.start_connector("d", &def("device")).await.unwrap();
        assert_eq!(f.hub.connector_ids(), vec!["d"]);
    }

    #[tokio::test]
    async fn test_start_connector_validation() {
        let f = Fixture::new();
        assert!(matches!(
            f.hub.start_connector("", &def("device")).await,
            Err(GatewayError::InvalidId)
        ));
        assert!(matches!(
            f.hub.start_connector("d", &def("")).await,
            Err(GatewayError::InvalidType)
        ));
        assert!(matches!(
            f.hub.start_connector("d", &def("teleporter")).await,
            Err(GatewayError::UnknownType(_))
        ));
        assert!(f.hub.connector_ids().is_empty());
    }

    #[tokio::test]
    async fn test_stop_connector_clears_slot_and_rethrows() {
        let f = Fixture::new();
        f.hub.start_connector("d", &def("stuck-device")).await.unwrap();

        let err = f.hub.stop_connector("d").await.unwrap_err();
        assert_eq!(err.to_string(), "driver failure");
        assert!(f.hub.connector("d").is_none());

        assert!(matches!(
            f.hub.stop_connector("d").await,
            Err(GatewayError::NotActive(id)) if id == "d"
        ));
    }

    #[tokio::test]
    async fn test_cnc_must_be_cloud_and_unique() {
        let f = Fixture::new();
        assert!(matches!(
            f.hub.start_cnc(&def("device")).await,
            Err(GatewayError::WrongRole { .. })
        ));
        assert!(f.hub.cnc().is_none());

        f.hub.start_cnc(&def("cloud")).await.unwrap();
        assert!(matches!(
            f.hub.start_cnc(&def("cloud")).await,
            Err(GatewayError::CncAlreadyActive)
        ));
    }

    #[tokio::test]
    async fn test_cnc_start_failure_allows_retry() {
        let f = Fixture::new();
        assert!(f.hub.start_cnc(&def("broken-cloud")).await.is_err());
        assert!(f.hub.cnc().is_none());

        f.hub.start_cnc(&def("cloud")).await.unwrap();
        assert_eq!(f.hub.cnc().unwrap().state(), ConnectorState::Started);
    }

    #[tokio::test]
    async fn test_cnc_payloads_become_requests() {
        let f = Fixture::new();
        let mut requests = f.hub.subscribe_cnc().unwrap();
        assert!(f.hub.subscribe_cnc().is_none());

        f.hub.start_cnc(&def("cloud")).await.unwrap();
        f.emit(CNC_CONNECTOR_ID, json!({"id": "bad"}));
        f.emit(
            CNC_CONNECTOR_ID,
            json!({"id": "r1", "action": "stop_connector", "params": {"connectorId": "d"}}),
        );

        let request = requests.try_recv().unwrap();
        assert_eq!(request.id(), "r1");
        assert_eq!(request.param_str("connectorId"), Some("d"));
        assert!(requests.try_recv().is_err());

        request.acknowledge(None).unwrap();
        let cnc = f.hub.cnc().unwrap();
        assert_eq!(cnc.outbound().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_cnc() {
        let f = Fixture::new();
        assert!(matches!(f.hub.stop_cnc().await, Err(GatewayError::CncNotActive)));

        f.hub.start_cnc(&def("cloud")).await.unwrap();
        f.hub.stop_cnc().await.unwrap();
        assert!(f.hub.cnc().is_none());
    }

    #[tokio::test]
    async fn test_failed_stop_cnc_clears_slot_and_rethrows() {
        let f = Fixture::new();
        f.hub.start_cnc(&def("stuck-cloud")).await.unwrap();

        let err = f.hub.stop_cnc().await.unwrap_err();
        assert_eq!(err.to_string(), "driver failure");
        assert!(f.hub.cnc().is_none());

        f.hub.start_cnc(&def("cloud")).await.unwrap();
        assert_eq!(f.hub.cnc().unwrap().state(), ConnectorState::Started);
    }

    #[tokio::test]
    async fn test_shutdown_stops_cnc_last() {
        let f = Fixture::new();
        f.hub.start_cnc(&def("cloud")).await.unwrap();
        f.hub.start_connector("a", &def("slow-device")).await.unwrap();
        f.hub.start_connector("b", &def("stuck-device")).await.unwrap();
        f.hub.start_connector("c", &def("cloud")).await.unwrap();

        f.hub.shutdown().await.unwrap();

        let journal = f.journal.lock().clone();
        let cnc_stop = journal
            .iter()
            .position(|entry| entry == "stop-issued:cnc")
            .expect("cnc stopped");
        for id in ["a", "b", "c"] {
            let issued = journal
                .iter()
                .position(|entry| *entry == format!("stop-issued:{}", id))
                .expect("connector stopped");
            assert!(issued < cnc_stop, "{} stopped after cnc", id);
        }
        // The slow connector finished before cnc was asked to stop
        let slow_done = journal.iter().position(|entry| entry == "stop:a").unwrap();
        assert!(slow_done < cnc_stop);

        assert!(f.hub.is_shut_down());
        assert!(f.hub.cnc().is_none());
        assert!(f.hub.connector_ids().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_is_one_shot() {
        let f = Fixture::new();
        f.hub.shutdown().await.unwrap();

        assert!(matches!(f.hub.shutdown().await, Err(GatewayError::HubShutDown)));
        assert!(matches!(
            f.hub.start_connector("d", &def("device")).await,
            Err(GatewayError::HubShutDown)
        ));
        assert!(matches!(
            f.hub.start_cnc(&def("cloud")).await,
            Err(GatewayError::HubShutDown)
        ));
        assert!(matches!(f.hub.stop_cnc().await, Err(GatewayError::HubShutDown)));
    }
}
