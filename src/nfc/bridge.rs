//! Crosses from the NFC worker's blocking OS thread back into the async bus
//! runtime, reusing the correlation fabric for both kinds of request the
//! session engine needs to make.

use super::session::{AccessReply, BusBridge};
use crate::bus::{Bus, Message};
use crate::correlation::CorrelationFabric;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

const ACCESS_TIMEOUT: Duration = Duration::from_secs(5);
const LOCK_STATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Tracks the one outstanding `/lock/state` request's correlation id.
///
/// `/lock_result` carries a bare integer per the wire contract (mirroring
/// `/lock`'s own payload), unlike `/access_result`, so it has no `id` field
/// to correlate a reply by. The NFC engine only ever has one request in
/// flight at a time per session, so stashing the single pending id is
/// enough to route the next `/lock_result` back to its waiter — the same
/// role the original's `lock_result`/`refresh_lock_state` pairing plays.
#[derive(Clone, Default)]
pub struct LockQuerySlot(Arc<Mutex<Option<Uuid>>>);

impl LockQuerySlot {
    fn set(&self, id: Uuid) {
        *self.0.lock().expect("lock query slot poisoned") = Some(id);
    }

    fn take(&self) -> Option<Uuid> {
        self.0.lock().expect("lock query slot poisoned").take()
    }
}

pub struct TokioBusBridge {
    runtime: tokio::runtime::Handle,
    bus: Arc<dyn Bus>,
    fabric: Arc<CorrelationFabric>,
    prefix: String,
    lock_query: LockQuerySlot,
}

impl TokioBusBridge {
    pub fn new(runtime: tokio::runtime::Handle, bus: Arc<dyn Bus>, fabric: Arc<CorrelationFabric>, prefix: String, lock_query: LockQuerySlot) -> Self {
        Self { runtime, bus, fabric, prefix, lock_query }
    }

    fn topic(&self, suffix: &str) -> String {
        format!("{}{}", self.prefix, suffix)
    }
}

impl BusBridge for TokioBusBridge {
    fn verify_access(&self, token: &str) -> AccessReply {
        let topic = self.topic("/access");
        let response_topic = self.topic("/access_result");
        let token = token.to_string();
        let bus = self.bus.clone();
        let handle = self.runtime.clone();
        let result = self.runtime.block_on(self.fabric.fire(
            move |id| {
                let bus = bus.clone();
                let message = Message::new(topic, json!({"id": id, "token": token, "actions": Vec::<String>::new()}))
                    .with_response_topic(response_topic);
                handle.spawn(async move {
                    let _ = bus.publish(message).await;
                });
            },
            ACCESS_TIMEOUT,
        ));
        match result {
            Ok(value) => AccessReply {
                valid: value.get("valid").and_then(serde_json::Value::as_bool).unwrap_or(false),
                allowed: value.get("allowed").and_then(serde_json::Value::as_bool).unwrap_or(false),
                actions: value
                    .get("actions")
                    .and_then(serde_json::Value::as_array)
                    .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                    .unwrap_or_default(),
            },
            Err(_timeout) => AccessReply { valid: false, allowed: false, actions: vec![] },
        }
    }

    fn query_lock_state(&self) -> bool {
        let topic = self.topic("/lock/state");
        let response_topic = self.topic("/lock_result");
        let bus = self.bus.clone();
        let handle = self.runtime.clone();
        let lock_query = self.lock_query.clone();
        let result = self.runtime.block_on(self.fabric.fire(
            move |id| {
                lock_query.set(id);
                let bus = bus.clone();
                let message = Message::new(topic, serde_json::Value::Null).with_response_topic(response_topic);
                handle.spawn(async move {
                    let _ = bus.publish(message).await;
                });
            },
            LOCK_STATE_TIMEOUT,
        ));
        // `/lock_result` follows the same convention as `/lock`: non-zero
        // means locked. `is_open` is the inverse, per the documented
        // polarity convention (locked = actuator engaged = is_open=false).
        matches!(result, Ok(value) if value.as_i64() == Some(0))
    }

    fn set_lock(&self, open: bool) {
        let topic = self.topic("/lock");
        let bus = self.bus.clone();
        let payload = json!(i32::from(!open)); // `/lock` payload: non-zero = lock, so closed(!open) maps to 1
        self.runtime.spawn(async move {
            let _ = bus.publish(Message::new(topic, payload)).await;
        });
    }
}

/// Correlates `/access_result` and `/lock_result` replies back to the
/// waiting `fire()` call by the `id` embedded in the payload.
pub fn complete_from_reply(fabric: &CorrelationFabric, payload: &serde_json::Value) {
    if let Some(id) = payload.get("id").and_then(serde_json::Value::as_str).and_then(|s| Uuid::parse_str(s).ok()) {
        fabric.complete(id, payload.clone());
    }
}

/// Subscribes to the bus and forwards every `<prefix>/access_result` and
/// `<prefix>/lock_result` message into the fabric, which is what actually
/// wakes up a pending `fire()` call. Every `BusBridge` needs exactly one of
/// these running somewhere for its requests to ever resolve instead of
/// timing out; the bridge itself cannot subscribe to the bus directly
/// since it only runs synchronously on the blocking NFC thread.
///
/// `lock_query` must be the same [`LockQuerySlot`] handed to the
/// [`TokioBusBridge`] that fires `/lock/state` requests, since `/lock_result`
/// carries no `id` of its own to correlate by.
pub fn spawn_completion_forwarder(
    bus: Arc<dyn Bus>,
    fabric: Arc<CorrelationFabric>,
    prefix: String,
    lock_query: LockQuerySlot,
) -> tokio::task::JoinHandle<()> {
    let access_result = format!("{prefix}/access_result");
    let lock_result = format!("{prefix}/lock_result");
    let mut inbound = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match inbound.recv().await {
                Ok(message) if message.topic == access_result => {
                    complete_from_reply(&fabric, &message.payload);
                }
                Ok(message) if message.topic == lock_result => {
                    if let Some(id) = lock_query.take() {
                        fabric.complete(id, message.payload);
                    }
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    })
}
