//! Message bus abstraction (component E's transport, component F's shared
//! wiring point).
//!
//! `Bus` is deliberately thin: topics, publish, subscribe. Everything about
//! handler discovery, subscription tables and dispatch lives in
//! [`crate::runtime`]; the bus only moves [`Message`]s around.

mod local;

pub use local::LocalBus;

use derive_more::Display;

/// A message in flight on the bus.
///
/// `response_topic`, when set, is where a reply to this message should be
/// published; the `id` field embedded in `payload` correlates request and
/// reply (component D uses it as the slot id).
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub payload: serde_json::Value,
    pub response_topic: Option<String>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self { topic: topic.into(), payload, response_topic: None }
    }

    #[must_use]
    pub fn with_response_topic(mut self, response_topic: impl Into<String>) -> Self {
        self.response_topic = Some(response_topic.into());
        self
    }
}

#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum Error {
    #[display("no subscribers connected")]
    Disconnected,
}

impl std::error::Error for Error {}

/// A connection to the message bus.
///
/// Implementations are expected to be cheaply cloneable handles (an `Arc` or
/// a broadcast sender), not the bus itself.
#[async_trait::async_trait]
pub trait Bus: Send + Sync {
    /// Establish (or re-establish) the underlying connection. `LocalBus`
    /// has nothing to connect to and always succeeds immediately; a
    /// network-backed bus would dial out here, and the runtime's connect
    /// loop retries this call every 30s until it succeeds or shutdown is
    /// requested.
    async fn connect(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn publish(&self, message: Message) -> Result<(), Error>;

    /// Subscribe to every message flowing on the bus. The runtime's
    /// subscription table, not the bus, is responsible for filtering by
    /// topic and dispatching to declared handlers.
    fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Message>;
}
