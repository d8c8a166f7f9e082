//! WoT façade (component I): exposes lock state and actuation over HTTP,
//! authorizing every request against the same `/access` request the NFC
//! session engine makes.

use crate::bus::Message;
use crate::config::WotConfig;
use crate::correlation::CorrelationFabric;
use crate::error::Error;
use crate::runtime::{Controller, HandlerReply, HandlerSpec, Publisher};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use log::{info, warn};
use serde_json::json;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

const ACCESS_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared with the axum handlers, which only ever see `Arc<WotState>` (axum
/// extractors require `Clone + Send + Sync + 'static`, ruling out borrowing
/// the controller directly).
struct WotState {
    fabric: Arc<CorrelationFabric>,
    publisher: Mutex<Option<Publisher>>,
    prefix: String,
    /// Mirrors the last `/lock` payload seen on the bus, non-zero = locked.
    /// `-1` means "unknown, never observed".
    last_lock_payload: AtomicI64,
}

impl WotState {
    fn topic(&self, suffix: &str) -> String {
        format!("{}{}", self.prefix, suffix)
    }

    async fn publish(&self, message: Message) {
        if let Some(publisher) = self.publisher.lock().await.as_ref() {
            publisher.publish(message).await;
        }
    }

    async fn request_access(&self, token: &str, action: &str) -> Result<bool, Error> {
        let topic = self.topic("/access");
        let response_topic = self.topic("/access_result");
        let token = token.to_string();
        let action = action.to_string();
        // `fire`'s action callback is synchronous (it only needs to
        // enqueue), so the publisher is cloned out ahead of time and the
        // actual publish deferred to a detached task.
        let publisher = self.publisher.lock().await.clone();

        let result = self
            .fabric
            .fire(
                |id| {
                    let message = Message::new(topic, json!({"id": id, "token": token, "actions": [action]}))
                        .with_response_topic(response_topic);
                    tokio::spawn(async move {
                        if let Some(publisher) = publisher {
                            publisher.publish(message).await;
                        }
                    });
                },
                ACCESS_TIMEOUT,
            )
            .await;

        match result {
            Ok(value) => Ok(value.get("allowed").and_then(serde_json::Value::as_bool).unwrap_or(false)),
            Err(_timeout) => Err(Error::from(crate::error::ErrorKind::Timeout)),
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix("Bearer ").map(str::to_string)
}

async fn authorize(state: &WotState, headers: &HeaderMap, action: &str) -> Result<(), Response> {
    let Some(token) = bearer_token(headers) else {
        return Err((StatusCode::UNAUTHORIZED, "missing bearer token").into_response());
    };
    match state.request_access(&token, action).await {
        Ok(true) => Ok(()),
        Ok(false) => Err((StatusCode::FORBIDDEN, format!("{action} not allowed")).into_response()),
        Err(err) => {
            warn!("WoT: access request failed: {err}");
            Err((StatusCode::SERVICE_UNAVAILABLE, "access backend unavailable").into_response())
        }
    }
}

async fn get_status(State(state): State<Arc<WotState>>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&state, &headers, "state").await {
        return response;
    }
    match state.last_lock_payload.load(Ordering::SeqCst) {
        -1 => (StatusCode::OK, "unknown").into_response(),
        payload => (StatusCode::OK, if payload != 0 { "locked" } else { "unlocked" }).into_response(),
    }
}

async fn get_status_locked(State(state): State<Arc<WotState>>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&state, &headers, "state").await {
        return response;
    }
    match state.last_lock_payload.load(Ordering::SeqCst) {
        -1 => (StatusCode::OK, "null").into_response(),
        payload => (StatusCode::OK, if payload != 0 { "1" } else { "0" }).into_response(),
    }
}

async fn post_action_lock(State(state): State<Arc<WotState>>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&state, &headers, "lock").await {
        return response;
    }
    state.publish(Message::new(state.topic("/lock"), json!(1))).await;
    (StatusCode::OK, "locking").into_response()
}

async fn post_action_unlock(State(state): State<Arc<WotState>>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&state, &headers, "unlock").await {
        return response;
    }
    state.publish(Message::new(state.topic("/lock"), json!(0))).await;
    (StatusCode::OK, "unlocking").into_response()
}

pub struct WotController {
    bind_addr: String,
    state: Arc<WotState>,
    shutdown: Mutex<Option<tokio::sync::oneshot::Sender<()>>>,
}

impl WotController {
    pub fn new(config: &WotConfig, fabric: Arc<CorrelationFabric>, prefix: String) -> Self {
        Self {
            bind_addr: config.bind_addr.clone(),
            state: Arc::new(WotState {
                fabric,
                publisher: Mutex::new(None),
                prefix,
                last_lock_payload: AtomicI64::new(-1),
            }),
            shutdown: Mutex::new(None),
        }
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/api/status", get(get_status))
            .route("/api/status/locked", get(get_status_locked))
            .route("/api/action/lock", post(post_action_lock).put(post_action_lock))
            .route("/api/action/unlock", post(post_action_unlock).put(post_action_unlock))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }
}

fn mirror_lock_state(state: &Arc<WotState>, payload: serde_json::Value) -> HandlerReply {
    if let Some(payload) = payload.as_i64() {
        state.last_lock_payload.store(payload, Ordering::SeqCst);
    }
    None
}

#[async_trait::async_trait]
impl Controller for WotController {
    fn handlers(&self) -> Vec<HandlerSpec> {
        let state = self.state.clone();
        vec![HandlerSpec::new("/lock", move |payload| {
            let state = state.clone();
            async move { mirror_lock_state(&state, payload) }
        })]
    }

    async fn set_publisher(&self, publisher: Publisher) {
        *self.state.publisher.lock().await = Some(publisher);
    }

    async fn initialize(&self) -> Result<(), Error> {
        let bind_addr = self.bind_addr.clone();
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .map_err(|err| crate::error::ErrorKind::Hardware(format!("binding {bind_addr}: {err}")))?;
        let (tx, rx) = tokio::sync::oneshot::channel();
        *self.shutdown.lock().await = Some(tx);
        tokio::spawn(async move {
            let shutdown = async {
                let _ = rx.await;
            };
            if let Err(err) = axum::serve(listener, router).with_graceful_shutdown(shutdown).await {
                warn!("WoT: server exited: {err}");
            }
        });
        info!("WoT: listening on {bind_addr}");
        Ok(())
    }

    async fn uninitialize(&self) {
        if let Some(tx) = self.shutdown.lock().await.take() {
            let _ = tx.send(());
        }
        info!("WoT: uninitialized");
    }
}
