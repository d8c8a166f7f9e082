//! Request/response correlation fabric (component D).
//!
//! Converts a fire-and-forget publish into an awaitable request/response
//! pair. The slot table is owned by exactly one `Arc<CorrelationFabric>`,
//! shared with every task that needs to `fire` a request; `complete` only
//! enqueues a wake through a oneshot sender, it never runs the waiter's
//! continuation itself.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Result of a `fire` call that timed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeout;

impl std::fmt::Display for Timeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timeout")
    }
}

impl std::error::Error for Timeout {}

#[derive(Default)]
pub struct CorrelationFabric {
    slots: Mutex<HashMap<Uuid, oneshot::Sender<serde_json::Value>>>,
}

impl CorrelationFabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a slot, invoke `action(id)` exactly once, then wait for
    /// completion up to `timeout`. The slot is always de-registered,
    /// whether `action` completes, times out, or the reply never arrives.
    pub async fn fire<F>(&self, action: F, timeout: Duration) -> Result<serde_json::Value, Timeout>
    where
        F: FnOnce(Uuid),
    {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.slots.lock().expect("correlation slot table poisoned").insert(id, tx);

        action(id);

        let result = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_recv_error)) => Err(Timeout),
            Err(_elapsed) => Err(Timeout),
        };

        self.slots.lock().expect("correlation slot table poisoned").remove(&id);
        result
    }

    /// Complete a pending slot. Idempotent for unknown ids (silently
    /// dropped); the first completion of a given id wins, later ones are
    /// no-ops because the sender is consumed by the first successful send.
    pub fn complete(&self, id: Uuid, value: serde_json::Value) {
        let sender = self.slots.lock().expect("correlation slot table poisoned").remove(&id);
        if let Some(sender) = sender {
            let _ = sender.send(value);
        }
    }
}
