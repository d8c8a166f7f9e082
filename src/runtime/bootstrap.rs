use super::controller::{BoxedHandler, Controller, Publisher};
use crate::bus::{Bus, Message};
use crate::error::Error;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const CONNECT_RETRY: Duration = Duration::from_secs(30);

/// `topic_suffix -> handlers`, built once from [`Controller::handlers`] and
/// replayed against the bus on every (re)connect. Built here rather than
/// stored per-controller since the composer already concatenates member
/// handler lists into one flat list.
struct SubscriptionTable {
    prefix: String,
    by_suffix: HashMap<&'static str, Vec<BoxedHandler>>,
}

impl SubscriptionTable {
    fn build(prefix: &str, controller: &dyn Controller) -> Self {
        let mut by_suffix: HashMap<&'static str, Vec<BoxedHandler>> = HashMap::new();
        for spec in controller.handlers() {
            by_suffix.entry(spec.topic_suffix).or_default().push(spec.handler.clone());
        }
        Self { prefix: prefix.to_string(), by_suffix }
    }

    fn topic_for(&self, suffix: &str) -> String {
        format!("{}{}", self.prefix, suffix)
    }

    fn handlers_for_topic(&self, topic: &str) -> Vec<BoxedHandler> {
        self.by_suffix
            .iter()
            .filter(|(suffix, _)| self.topic_for(suffix) == topic)
            .flat_map(|(_, handlers)| handlers.iter().cloned())
            .collect()
    }
}

/// Runs the connect loop, initializes `controller`, dispatches inbound
/// messages to its declared handlers until shutdown, then uninitializes it.
///
/// `shutdown` is expected to be driven by [`signal_shutdown`] or a test
/// harness; it is watched both during the connect retry loop and the main
/// dispatch loop, per the cancellation model: shutdown short-circuits retry
/// loops and `uninitialize` runs on every exit path.
pub async fn run(
    controller: Arc<dyn Controller>,
    bus: Arc<dyn Bus>,
    prefix: &str,
    one_shot: bool,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Error> {
    controller.set_publisher(Publisher::new(bus.clone())).await;

    loop {
        if *shutdown.borrow() {
            return Ok(());
        }
        match bus.connect().await {
            Ok(()) => break,
            Err(err) => {
                log::warn!("Runtime: connect failed: {err}, retrying in {CONNECT_RETRY:?}");
                tokio::select! {
                    () = tokio::time::sleep(CONNECT_RETRY) => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    controller.initialize().await?;
    log::info!("Runtime: controller initialized");

    let table = SubscriptionTable::build(prefix, controller.as_ref());
    let mut inbound = bus.subscribe();
    let publisher = Publisher::new(bus.clone());

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            message = inbound.recv() => {
                match message {
                    Ok(message) => {
                        dispatch(&table, &publisher, message).await;
                        if one_shot {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("Runtime: dispatch loop lagged, skipped {skipped} messages");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    controller.uninitialize().await;
    log::info!("Runtime: controller uninitialized");
    Ok(())
}

/// Invokes every handler registered for `message.topic` concurrently and
/// waits for all to complete, per the "invoke every handler concurrently"
/// dispatch rule. Each handler runs as its own task so one handler's await
/// point never delays another's.
async fn dispatch(table: &SubscriptionTable, publisher: &Publisher, message: Message) {
    let handlers = table.handlers_for_topic(&message.topic);
    if handlers.is_empty() {
        return;
    }
    let payload = message.payload.clone();
    let tasks: Vec<_> = handlers.into_iter().map(|handler| tokio::spawn(handler(payload.clone()))).collect();

    let response_topic = message.response_topic;
    for task in tasks {
        match task.await {
            Ok(Some(reply)) => {
                if let Some(response_topic) = &response_topic {
                    publisher.publish(Message::new(response_topic.clone(), reply)).await;
                }
            }
            Ok(None) => {}
            Err(err) => log::warn!("Runtime: handler task panicked: {err}"),
        }
    }
}

/// Watches SIGINT/SIGTERM and flips `shutdown` to `true` on either.
pub fn install_signal_handler() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        log::info!("Runtime: shutdown signal received");
        let _ = tx.send(true);
    });
    rx
}
