//! Access controller (component G).

use crate::config::AccessConfig;
use crate::error::Error;
use crate::runtime::{Controller, HandlerReply, HandlerSpec, Publisher};
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, warn};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// `"all"` vs an explicit action set, mirroring the mock token grammar's
/// `csv | "all"` field.
#[derive(Debug, Clone, PartialEq, Eq)]
enum GrantedActions {
    All,
    Restricted(HashSet<String>),
}

impl GrantedActions {
    fn allows(&self, requested: &[String]) -> bool {
        match self {
            Self::All => true,
            Self::Restricted(granted) => requested.iter().all(|action| granted.contains(action)),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            Self::All => json!(["state", "unlock", "lock"]),
            Self::Restricted(actions) => json!(actions.iter().collect::<Vec<_>>()),
        }
    }
}

struct Verdict {
    valid: bool,
    actions: GrantedActions,
    expires: Option<DateTime<Utc>>,
}

/// Mock token grammar: `flag;csv|"all";iso8601-or-bare-year`. A token that
/// does not split into exactly three `;`-separated parts is a parse
/// failure; per-field content, once split, is interpreted best-effort (an
/// unparseable expiry, or an empty actions list, is not itself a parse
/// failure).
///
/// Grounded on the mock access backend this was distilled from: parse
/// failures of the whole token default to full access for 24h so a
/// misconfigured or placeholder token never locks an owner out during
/// development.
fn parse_mock_token(token: &str) -> Verdict {
    let parts: Vec<&str> = token.split(';').collect();
    let [flag, actions, expires] = parts[..] else {
        return Verdict { valid: true, actions: GrantedActions::All, expires: Some(Utc::now() + chrono::Duration::hours(24)) };
    };

    let valid = flag.trim().parse::<i64>().map(|n| n != 0).unwrap_or(true);
    let actions = if actions.trim() == "all" {
        GrantedActions::All
    } else {
        GrantedActions::Restricted(actions.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
    };
    let expires = parse_loose_timestamp(expires.trim());

    Verdict { valid, actions, expires }
}

fn parse_loose_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(year) = text.parse::<i32>() {
        return Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single();
    }
    None
}

enum Backend {
    Mock,
    Real { verify_url: String, api_key: Option<String>, client: reqwest::Client },
}

async fn verify(backend: &Backend, token: &str) -> Verdict {
    match backend {
        Backend::Mock => parse_mock_token(token),
        Backend::Real { verify_url, api_key, client } => {
            let mut request = client.get(verify_url).bearer_auth(token);
            if let Some(api_key) = api_key {
                request = request.header("X-Api-Key", api_key);
            }
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    Verdict { valid: true, actions: GrantedActions::All, expires: Some(Utc::now() + chrono::Duration::hours(1)) }
                }
                Ok(response) => {
                    debug!("Access: verify backend returned {}", response.status());
                    Verdict { valid: false, actions: GrantedActions::Restricted(HashSet::new()), expires: None }
                }
                Err(err) => {
                    warn!("Access: verify backend unreachable: {err}");
                    Verdict { valid: false, actions: GrantedActions::Restricted(HashSet::new()), expires: None }
                }
            }
        }
    }
}

async fn handle_access(backend: &Backend, payload: serde_json::Value) -> HandlerReply {
    let id = payload.get("id").cloned().unwrap_or(serde_json::Value::Null);
    let token = payload.get("token").and_then(serde_json::Value::as_str).unwrap_or("").to_string();
    let requested: Vec<String> = payload
        .get("actions")
        .and_then(serde_json::Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    let verdict = verify(backend, &token).await;
    let not_expired = verdict.expires.is_some_and(|expires| expires >= Utc::now());
    let allowed = verdict.valid && verdict.actions.allows(&requested) && not_expired;

    Some(json!({
        "id": id,
        "token": token,
        "valid": verdict.valid,
        "allowed": allowed,
        "actions": verdict.actions.to_json(),
        "expires": verdict.expires.map(|e| e.to_rfc3339()),
    }))
}

/// Verifies bearer tokens and decides whether requested actions are
/// permitted, against either the mock grammar or a real HTTP backend.
///
/// The backend lives behind an `Arc` rather than being borrowed by the
/// registered handler closure: [`HandlerSpec`] requires `'static` closures,
/// and the composer only ever hands the bootstrap loop a `&dyn Controller`,
/// never an `Arc<Self>` it could clone.
pub struct AccessController {
    backend: Arc<Backend>,
    publisher: Mutex<Option<Publisher>>,
}

impl AccessController {
    pub fn new(config: &AccessConfig) -> Self {
        let backend = if config.mock || config.verify_url.is_empty() {
            Backend::Mock
        } else {
            Backend::Real {
                verify_url: config.verify_url.clone(),
                api_key: if config.api_key.is_empty() { None } else { Some((*config.api_key).clone()) },
                client: reqwest::Client::new(),
            }
        };
        Self { backend: Arc::new(backend), publisher: Mutex::new(None) }
    }
}

#[async_trait::async_trait]
impl Controller for AccessController {
    fn handlers(&self) -> Vec<HandlerSpec> {
        let backend = self.backend.clone();
        vec![HandlerSpec::new("/access", move |payload| {
            let backend = backend.clone();
            async move { handle_access(&backend, payload).await }
        })]
    }

    async fn set_publisher(&self, publisher: Publisher) {
        *self.publisher.lock().await = Some(publisher);
    }

    async fn initialize(&self) -> Result<(), Error> {
        log::info!("Access: initialized ({})", if matches!(*self.backend, Backend::Mock) { "mock" } else { "real" });
        Ok(())
    }

    async fn uninitialize(&self) {
        log::info!("Access: uninitialized");
    }
}
