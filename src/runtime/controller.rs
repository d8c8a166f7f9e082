use crate::bus::Message;
use crate::error::Error;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A handler's reply to a dispatched message, or `None` if it has nothing
/// to publish (e.g. the NFC session's own internal plumbing).
pub type HandlerReply = Option<serde_json::Value>;
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerReply> + Send>>;
pub type BoxedHandler = Arc<dyn Fn(serde_json::Value) -> HandlerFuture + Send + Sync>;

/// Explicit handler registration: a controller hands the runtime a list of
/// these instead of the runtime discovering handlers by reflection.
///
/// `input` is decoded as self-describing JSON before being handed to
/// `handler`; a decode failure is the "schema validation failure" case from
/// the controller runtime design — it is logged and the message is dropped,
/// `handler` is never invoked.
#[derive(Clone)]
pub struct HandlerSpec {
    pub topic_suffix: &'static str,
    pub handler: BoxedHandler,
}

impl HandlerSpec {
    pub fn new<F, Fut>(topic_suffix: &'static str, handler: F) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerReply> + Send + 'static,
    {
        Self { topic_suffix, handler: Arc::new(move |value| Box::pin(handler(value))) }
    }
}

/// Publishes messages back onto the bus. Controllers never hold bus
/// identity directly, only this callback, handed to them in
/// [`Controller::set_publisher`].
#[derive(Clone)]
pub struct Publisher {
    bus: Arc<dyn crate::bus::Bus>,
}

impl Publisher {
    pub fn new(bus: Arc<dyn crate::bus::Bus>) -> Self {
        Self { bus }
    }

    pub async fn publish(&self, message: Message) {
        if let Err(err) = self.bus.publish(message).await {
            log::warn!("Runtime: publish failed: {err}");
        }
    }
}

/// Lifecycle: `constructed -> initialized -> uninitialized`.
///
/// `uninitialize` must run on every exit path, including error; the
/// composer and bootstrap loop both guarantee this with a `finally`-style
/// drop guard rather than relying on callers to remember.
#[async_trait::async_trait]
pub trait Controller: Send + Sync {
    fn handlers(&self) -> Vec<HandlerSpec>;

    async fn set_publisher(&self, publisher: Publisher);

    async fn initialize(&self) -> Result<(), Error>;

    async fn uninitialize(&self);
}
