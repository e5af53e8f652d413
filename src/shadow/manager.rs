//! Request/response correlation over a shadow transport

use super::transport::{ShadowEvent, ShadowStatus, ShadowTransport};
use crate::error::{GatewayError, Result};
use gateway_shared::shadow;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Which logical call a response belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowAction {
    GetShadow,
    UpdateShadow,
}

impl ShadowAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ShadowAction::GetShadow => shadow::ACTION_GET,
            ShadowAction::UpdateShadow => shadow::ACTION_UPDATE,
        }
    }
}

impl fmt::Display for ShadowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An accepted get or update
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowResponse {
    pub action: ShadowAction,
    pub state: Value,
}

/// A get or update that did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowFailure {
    Rejected,
    TimedOut,
}

impl fmt::Display for ShadowFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShadowFailure::Rejected => f.write_str("rejected"),
            ShadowFailure::TimedOut => f.write_str("timedout"),
        }
    }
}

/// Per-thing subscriber, called once per settled request
pub type ShadowCallback = Arc<dyn Fn(std::result::Result<ShadowResponse, ShadowFailure>) + Send + Sync>;

#[derive(Debug, Clone)]
enum Operation {
    Get,
    Update(Value),
}

impl Operation {
    fn action(&self) -> ShadowAction {
        match self {
            Operation::Get => ShadowAction::GetShadow,
            Operation::Update(_) => ShadowAction::UpdateShadow,
        }
    }
}

/// A request awaiting its status or timeout
struct PendingRequest {
    thing: String,
    operation: Operation,
    callback: ShadowCallback,
    retries_remaining: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Started,
    Stopped,
}

struct Inner {
    transport: Arc<dyn ShadowTransport>,
    things: Mutex<HashMap<String, ShadowCallback>>,
    requests: Mutex<HashMap<String, PendingRequest>>,
    lifecycle: Mutex<Lifecycle>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

/// Correlates shadow gets/updates with the status and timeout events that
/// settle them, retrying timed-out requests.
///
/// Requests are keyed by the transport's request id, not by thing: a request
/// in flight when its thing stops being watched still settles against the
/// callback it was issued with. The manager itself schedules no timers; all
/// timeouts come from the transport.
#[derive(Clone)]
pub struct ShadowManager {
    inner: Arc<Inner>,
}

impl ShadowManager {
    pub fn new(transport: Arc<dyn ShadowTransport>) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                things: Mutex::new(HashMap::new()),
                requests: Mutex::new(HashMap::new()),
                lifecycle: Mutex::new(Lifecycle::Idle),
                pump: Mutex::new(None),
            }),
        }
    }

    /// Begin consuming transport events; resolves on the first `Connect`.
    ///
    /// Connection errors before that are logged and waited out, never returned.
    pub async fn start(&self) -> Result<()> {
        let mut events = {
            let mut lifecycle = self.inner.lifecycle.lock();
            if *lifecycle != Lifecycle::Idle {
                return Err(GatewayError::AlreadyStarted);
            }
            let events = self
                .inner
                .transport
                .take_events()
                .ok_or_else(|| GatewayError::Transport("event stream already taken".into()))?;
            *lifecycle = Lifecycle::Started;
            events
        };

        let (connected_tx, connected_rx) = oneshot::channel();
        let manager = self.clone();
        let pump = tokio::spawn(async move {
            let mut connected_tx = Some(connected_tx);
            while let Some(event) = events.recv().await {
                if event == ShadowEvent::Connect {
                    if let Some(tx) = connected_tx.take() {
                        let _ = tx.send(());
                    }
                }
                manager.handle_event(event);
            }
            debug!("Shadow event stream closed");
        });
        *self.inner.pump.lock() = Some(pump);

        connected_rx
            .await
            .map_err(|_| GatewayError::Transport("event stream closed before connecting".into()))
    }

    /// Close the transport
    pub async fn stop(&self) -> Result<()> {
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            match *lifecycle {
                Lifecycle::Idle => return Err(GatewayError::NotStarted),
                Lifecycle::Stopped => return Err(GatewayError::AlreadyStopped),
                Lifecycle::Started => *lifecycle = Lifecycle::Stopped,
            }
        }

        let result = self.inner.transport.end(false).await;
        if let Some(pump) = self.inner.pump.lock().take() {
            pump.abort();
        }
        result.map_err(|e| GatewayError::Transport(e.to_string()))?;

        info!("Shadow transport closed");
        Ok(())
    }

    /// Watch a thing and fetch its current shadow
    pub fn watch_shadow(&self, thing: &str, callback: ShadowCallback) -> Result<()> {
        self.inner
            .transport
            .register(thing)
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        self.inner
            .things
            .lock()
            .insert(thing.to_string(), callback.clone());
        debug!(thing = %thing, "Watching shadow");

        if let Err(e) = self.issue(thing, Operation::Get, callback, shadow::DEFAULT_RETRIES) {
            self.stop_watching(thing);
            return Err(e);
        }
        Ok(())
    }

    /// Push a state update for a watched thing
    pub fn update_state(&self, thing: &str, state: Value) -> Result<()> {
        let callback = self
            .inner
            .things
            .lock()
            .get(thing)
            .cloned()
            .ok_or_else(|| GatewayError::NotWatched(thing.to_string()))?;

        self.issue(thing, Operation::Update(state), callback, shadow::DEFAULT_RETRIES)?;
        Ok(())
    }

    /// Stop reacting to deltas and accepting updates for a thing.
    ///
    /// Requests already in flight still settle against their original callback.
    pub fn stop_watching(&self, thing: &str) {
        if self.inner.things.lock().remove(thing).is_some() {
            self.inner.transport.unregister(thing);
            debug!(thing = %thing, "Stopped watching shadow");
        }
    }

    pub fn is_watching(&self, thing: &str) -> bool {
        self.inner.things.lock().contains_key(thing)
    }

    /// Number of requests awaiting a status or timeout
    pub fn pending_requests(&self) -> usize {
        self.inner.requests.lock().len()
    }

    /// Apply one transport event
    pub fn handle_event(&self, event: ShadowEvent) {
        match event {
            ShadowEvent::Connect => info!("Shadow transport connected"),
            ShadowEvent::Error(message) => {
                warn!("Shadow transport error, waiting for reconnect: {}", message);
            }
            ShadowEvent::Delta { thing, .. } => self.handle_delta(&thing),
            ShadowEvent::Status {
                thing,
                status,
                request_id,
                state,
            } => self.handle_status(&thing, status, &request_id, state),
            ShadowEvent::Timeout { thing, request_id } => self.handle_timeout(&thing, &request_id),
        }
    }

    fn handle_delta(&self, thing: &str) {
        let Some(callback) = self.inner.things.lock().get(thing).cloned() else {
            debug!(thing = %thing, "Ignoring delta for unwatched thing");
            return;
        };

        debug!(thing = %thing, "Delta received, fetching shadow");
        if let Err(e) = self.issue(thing, Operation::Get, callback, shadow::DEFAULT_RETRIES) {
            warn!(thing = %thing, "Failed to fetch shadow after delta: {}", e);
        }
    }

    fn handle_status(&self, thing: &str, status: ShadowStatus, request_id: &str, state: Value) {
        let Some(pending) = self.inner.requests.lock().remove(request_id) else {
            warn!(thing = %thing, request = %request_id, "Status for unknown request");
            return;
        };

        let action = pending.operation.action();
        debug!(thing = %thing, request = %request_id, ?status, "{} settled", action);

        match status {
            ShadowStatus::Accepted => (pending.callback)(Ok(ShadowResponse { action, state })),
            ShadowStatus::Rejected => (pending.callback)(Err(ShadowFailure::Rejected)),
        }
    }

    fn handle_timeout(&self, thing: &str, request_id: &str) {
        let Some(pending) = self.inner.requests.lock().remove(request_id) else {
            warn!(thing = %thing, request = %request_id, "Timeout for unknown request");
            return;
        };

        if pending.retries_remaining == 0 {
            warn!(thing = %thing, request = %request_id, "{} timed out", pending.operation.action());
            (pending.callback)(Err(ShadowFailure::TimedOut));
            return;
        }

        let retries_remaining = pending.retries_remaining - 1;
        debug!(
            thing = %thing,
            request = %request_id,
            retries_remaining,
            "{} timed out, retrying",
            pending.operation.action()
        );

        let callback = pending.callback.clone();
        if let Err(e) = self.issue(
            &pending.thing,
            pending.operation,
            pending.callback,
            retries_remaining,
        ) {
            warn!(thing = %thing, "Retry could not be issued: {}", e);
            callback(Err(ShadowFailure::TimedOut));
        }
    }

    /// Send a request and track it under the id the transport hands back
    fn issue(
        &self,
        thing: &str,
        operation: Operation,
        callback: ShadowCallback,
        retries_remaining: u32,
    ) -> Result<String> {
        let action = operation.action();

        // Held across the send so a fast status cannot miss its record
        let mut requests = self.inner.requests.lock();
        let request_id = match &operation {
            Operation::Get => self.inner.transport.get(thing),
            Operation::Update(state) => self.inner.transport.update(thing, state),
        }
        .ok_or_else(|| GatewayError::Transport(format!("{} refused for {}", action, thing)))?;

        debug!(thing = %thing, request = %request_id, "{} issued", action);
        requests.insert(
            request_id.clone(),
            PendingRequest {
                thing: thing.to_string(),
                operation,
                callback,
                retries_remaining,
            },
        );
        Ok(request_id)
    }
}

impl fmt::Debug for ShadowManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShadowManager")
            .field("lifecycle", &*self.inner.lifecycle.lock())
            .field("things", &self.inner.things.lock().len())
            .field("pending", &self.pending_requests())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shadow::test_support::FakeTransport;
    use serde_json::json;
    use std::time::Duration;

    type Calls = Arc<Mutex<Vec<std::result::Result<ShadowResponse, ShadowFailure>>>>;

    fn recorder() -> (ShadowCallback, Calls) {
        let calls: Calls = Arc::default();
        let sink = calls.clone();
        (Arc::new(move |result| sink.lock().push(result)), calls)
    }

    fn setup() -> (ShadowManager, Arc<FakeTransport>) {
        let transport = Arc::new(FakeTransport::new());
        (ShadowManager::new(transport.clone()), transport)
    }

    fn status(thing: &str, status: ShadowStatus, request_id: &str, state: Value) -> ShadowEvent {
        ShadowEvent::Status {
            thing: thing.into(),
            status,
            request_id: request_id.into(),
            state,
        }
    }

    fn timeout(thing: &str, request_id: &str) -> ShadowEvent {
        ShadowEvent::Timeout {
            thing: thing.into(),
            request_id: request_id.into(),
        }
    }

    #[test]
    fn test_watch_issues_get_and_accepted_status_resolves() {
        let (manager, transport) = setup();
        let (cb, calls) = recorder();

        manager.watch_shadow("gw1", cb).unwrap();
        assert_eq!(transport.calls(), vec!["register:gw1", "get:gw1:1"]);

        manager.handle_event(status("gw1", ShadowStatus::Accepted, "1", json!({"foo": 1})));

        assert_eq!(
            *calls.lock(),
            vec![Ok(ShadowResponse {
                action: ShadowAction::GetShadow,
                state: json!({"foo": 1}),
            })]
        );
        assert_eq!(manager.pending_requests(), 0);
    }

    #[test]
    fn test_rejected_status() {
        let (manager, _transport) = setup();
        let (cb, calls) = recorder();

        manager.watch_shadow("gw1", cb).unwrap();
        manager.handle_event(status("gw1", ShadowStatus::Rejected, "1", json!({})));

        assert_eq!(*calls.lock(), vec![Err(ShadowFailure::Rejected)]);
    }

    #[test]
    fn test_status_settles_once() {
        let (manager, _transport) = setup();
        let (cb, calls) = recorder();

        manager.watch_shadow("gw1", cb).unwrap();
        manager.handle_event(status("gw1", ShadowStatus::Accepted, "1", json!({})));
        manager.handle_event(status("gw1", ShadowStatus::Accepted, "1", json!({})));
        manager.handle_event(timeout("gw1", "1"));

        assert_eq!(calls.lock().len(), 1);
    }

    #[test]
    fn test_unknown_request_ids_are_dropped() {
        let (manager, _transport) = setup();
        let (cb, calls) = recorder();

        manager.watch_shadow("gw1", cb).unwrap();
        manager.handle_event(status("gw1", ShadowStatus::Accepted, "999", json!({})));
        manager.handle_event(timeout("gw1", "998"));

        assert!(calls.lock().is_empty());
        assert_eq!(manager.pending_requests(), 1);
    }

    #[test]
    fn test_timeouts_retry_twice_then_fail() {
        let (manager, transport) = setup();
        let (cb, calls) = recorder();

        manager.watch_shadow("gw1", cb).unwrap();
        manager.handle_event(timeout("gw1", "1"));
        manager.handle_event(timeout("gw1", "2"));
        assert!(calls.lock().is_empty());

        manager.handle_event(timeout("gw1", "3"));
        assert_eq!(*calls.lock(), vec![Err(ShadowFailure::TimedOut)]);
        assert_eq!(
            transport.calls(),
            vec!["register:gw1", "get:gw1:1", "get:gw1:2", "get:gw1:3"]
        );
        assert_eq!(manager.pending_requests(), 0);
    }

    #[test]
    fn test_accepted_after_retry_stops_retrying() {
        let (manager, transport) = setup();
        let (cb, calls) = recorder();

        manager.watch_shadow("gw1", cb).unwrap();
        manager.handle_event(timeout("gw1", "1"));
        manager.handle_event(status("gw1", ShadowStatus::Accepted, "2", json!({"ok": true})));
        manager.handle_event(timeout("gw1", "2"));

        assert_eq!(calls.lock().len(), 1);
        assert!(calls.lock()[0].is_ok());
        assert_eq!(transport.calls().len(), 3);
    }

    #[test]
    fn test_update_requires_watch_and_retries_same_state() {
        let (manager, transport) = setup();
        let (cb, calls) = recorder();

        assert!(matches!(
            manager.update_state("gw1", json!({"reported": {}})),
            Err(GatewayError::NotWatched(t)) if t == "gw1"
        ));

        manager.watch_shadow("gw1", cb).unwrap();
        manager
            .update_state("gw1", json!({"reported": {"led": "on"}}))
            .unwrap();
        manager.handle_event(timeout("gw1", "2"));
        manager.handle_event(status(
            "gw1",
            ShadowStatus::Accepted,
            "3",
            json!({"reported": {"led": "on"}}),
        ));

        assert_eq!(transport.updates(), vec![json!({"reported": {"led": "on"}}); 2]);
        assert_eq!(
            *calls.lock(),
            vec![Ok(ShadowResponse {
                action: ShadowAction::UpdateShadow,
                state: json!({"reported": {"led": "on"}}),
            })]
        );
    }

    #[test]
    fn test_delta_triggers_get_only_while_watched() {
        let (manager, transport) = setup();
        let (cb, _calls) = recorder();

        manager.watch_shadow("gw1", cb).unwrap();
        manager.handle_event(ShadowEvent::Delta {
            thing: "gw1".into(),
            state: json!({"led": "off"}),
        });
        assert_eq!(transport.calls().last().unwrap(), "get:gw1:2");

        manager.stop_watching("gw1");
        assert!(!manager.is_watching("gw1"));
        manager.handle_event(ShadowEvent::Delta {
            thing: "gw1".into(),
            state: json!({}),
        });
        assert_eq!(transport.calls().last().unwrap(), "unregister:gw1");
        assert!(manager.update_state("gw1", json!({})).is_err());
    }

    #[test]
    fn test_in_flight_request_settles_after_stop_watching() {
        let (manager, _transport) = setup();
        let (cb, calls) = recorder();

        manager.watch_shadow("gw1", cb).unwrap();
        manager.stop_watching("gw1");
        manager.handle_event(status("gw1", ShadowStatus::Accepted, "1", json!({})));

        assert_eq!(calls.lock().len(), 1);
    }

    #[test]
    fn test_refused_request_is_not_tracked() {
        let (manager, transport) = setup();
        let (cb, _calls) = recorder();
        transport.refuse_requests(true);

        assert!(matches!(
            manager.watch_shadow("gw1", cb),
            Err(GatewayError::Transport(_))
        ));
        assert_eq!(manager.pending_requests(), 0);
        assert!(!manager.is_watching("gw1"));
        assert_eq!(transport.calls(), vec!["register:gw1", "unregister:gw1"]);
    }

    #[tokio::test]
    async fn test_start_waits_for_connect_through_errors() {
        let (manager, transport) = setup();

        let starter = manager.clone();
        let started = tokio::spawn(async move { starter.start().await });

        transport.push(ShadowEvent::Error("connection refused".into()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!started.is_finished());

        transport.push(ShadowEvent::Connect);
        tokio::time::timeout(Duration::from_secs(1), started)
            .await
            .expect("start resolves on connect")
            .unwrap()
            .unwrap();

        assert!(matches!(manager.start().await, Err(GatewayError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn test_events_flow_through_pump() {
        let (manager, transport) = setup();
        transport.push(ShadowEvent::Connect);
        manager.start().await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let callback: ShadowCallback = Arc::new(move |result| {
            let _ = tx.send(result);
        });
        manager.watch_shadow("gw1", callback).unwrap();
        transport.push(status("gw1", ShadowStatus::Accepted, "1", json!({"foo": 1})));

        let result = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.unwrap().state, json!({"foo": 1}));
    }

    #[tokio::test]
    async fn test_start_without_event_stream_stays_idle() {
        let (manager, transport) = setup();
        let events = transport.take_events();
        assert!(events.is_some());

        assert!(matches!(manager.start().await, Err(GatewayError::Transport(_))));
        assert!(matches!(manager.stop().await, Err(GatewayError::NotStarted)));
        assert!(matches!(manager.start().await, Err(GatewayError::Transport(_))));
    }

    #[tokio::test]
    async fn test_stop_is_single_use() {
        let (manager, transport) = setup();
        assert!(matches!(manager.stop().await, Err(GatewayError::NotStarted)));

        transport.push(ShadowEvent::Connect);
        manager.start().await.unwrap();
        manager.stop().await.unwrap();
        assert!(transport.ended());

        assert!(matches!(manager.stop().await, Err(GatewayError::AlreadyStopped)));
        assert!(matches!(manager.start().await, Err(GatewayError::AlreadyStarted)));
    }
}
