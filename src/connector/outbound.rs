//! Outbound message buffer carried by cloud connectors

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;

/// Unbounded append queue of messages waiting to go out to the cloud.
///
/// Producers (`Hub` data routing, `CncRequest` replies) only ever append;
/// the concrete connector drains it at its own pace.
#[derive(Clone, Default)]
pub struct OutboundQueue {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    items: Mutex<VecDeque<Value>>,
    notify: Notify,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and wake a waiting drainer
    pub fn push(&self, message: Value) {
        self.inner.items.lock().push_back(message);
        self.inner.notify.notify_one();
    }

    /// Take the oldest message, if any
    pub fn pop(&self) -> Option<Value> {
        self.inner.items.lock().pop_front()
    }

    /// Take everything currently buffered, oldest first
    pub fn drain(&self) -> Vec<Value> {
        self.inner.items.lock().drain(..).collect()
    }

    /// Wait for the next message
    pub async fn next(&self) -> Value {
        loop {
            if let Some(message) = self.pop() {
                return message;
            }
            self.inner.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for OutboundQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundQueue").field("len", &self.len()).finish()
    }
}
