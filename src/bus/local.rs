use super::{Bus, Error, Message};
use tokio::sync::broadcast;

/// In-process loopback bus over a [`broadcast`] channel.
///
/// Satisfies every controller's `Bus` need without an external broker; see
/// module docs on [`crate::bus`] for why no network-backed implementation is
/// bundled.
#[derive(Clone)]
pub struct LocalBus {
    sender: broadcast::Sender<Message>,
}

impl LocalBus {
    /// `capacity` bounds how many not-yet-received messages the channel
    /// buffers per subscriber before lagging receivers start missing
    /// messages (see `broadcast::Receiver::recv`'s `Lagged` error).
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait::async_trait]
impl Bus for LocalBus {
    async fn publish(&self, message: Message) -> Result<(), Error> {
        // A `send` error only means there are currently no subscribers; per
        // the bus's fire-and-forget contract that is not itself an error
        // worth failing the publisher over, but we do report it so callers
        // relying on at-least-one-subscriber delivery can notice.
        self.sender.send(message).map(|_| ()).map_err(|_| Error::Disconnected)
    }

    fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscriber_observes_a_published_message() {
        let bus = LocalBus::default();
        let mut rx = bus.subscribe();
        bus.publish(Message::new("/lock", json!(1))).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.topic, "/lock");
        assert_eq!(received.payload, json!(1));
    }

    #[tokio::test]
    async fn publish_without_subscribers_reports_disconnected() {
        let bus = LocalBus::default();
        let result = bus.publish(Message::new("/lock", json!(1))).await;
        assert_eq!(result, Err(Error::Disconnected));
    }
}
