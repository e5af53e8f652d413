//! Transport abstraction for cloud-held device shadows

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

/// Outcome reported by the transport for a get/update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowStatus {
    Accepted,
    Rejected,
}

impl From<&str> for ShadowStatus {
    fn from(status: &str) -> Self {
        match status {
            "accepted" => ShadowStatus::Accepted,
            _ => ShadowStatus::Rejected,
        }
    }
}

/// Events pushed by the transport
#[derive(Debug, Clone, PartialEq)]
pub enum ShadowEvent {
    /// Connection (re)established
    Connect,
    /// Connection-layer failure; the transport keeps reconnecting on its own
    Error(String),
    /// Unsolicited change to a watched thing's desired state
    Delta { thing: String, state: Value },
    /// Reply to an earlier get/update
    Status {
        thing: String,
        status: ShadowStatus,
        request_id: String,
        state: Value,
    },
    /// No reply arrived in time for an earlier get/update
    Timeout { thing: String, request_id: String },
}

/// A shadow service connection, such as a cloud IoT SDK client.
///
/// `get` and `update` hand back the transport-assigned request id that the
/// matching `Status` or `Timeout` event will carry, or `None` when the request
/// could not be issued. Events are delivered only through the stream returned
/// by `take_events`.
#[async_trait]
pub trait ShadowTransport: Send + Sync {
    /// Start tracking a thing
    fn register(&self, thing: &str) -> Result<()>;

    /// Stop tracking a thing
    fn unregister(&self, thing: &str);

    /// Request the current shadow document
    fn get(&self, thing: &str) -> Option<String>;

    /// Push a partial state document
    fn update(&self, thing: &str, state: &Value) -> Option<String>;

    /// Close the connection
    async fn end(&self, force: bool) -> Result<()>;

    /// The event stream. Only the first caller gets it.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ShadowEvent>>;
}
