//! NFC tap-session state machine (component C).
//!
//! State machine: `Idle -(SELECT DF)-> Announced -(Verify ok)-> Verified
//! -*(Query|Open|Close)-> Verified -(hang-up|error)-> Idle`. `run` below
//! folds this into a loop driven by [`super::transport::Transport`], since
//! the states themselves carry no behavior beyond which operations
//! [`SessionState::allowed_ops`] currently permits.

use super::transport::{Interface, Transport};
use crate::codec::Record;
use log::{debug, warn};
use std::collections::HashSet;

/// Reply from an access check, as seen by the session engine. Distinct from
/// the wire-level `/access_result` payload so the session logic does not
/// need to know about bus framing.
#[derive(Debug, Clone)]
pub struct AccessReply {
    pub valid: bool,
    pub allowed: bool,
    pub actions: Vec<String>,
}

/// The synchronous face the session engine needs of the bus runtime.
///
/// The NFC worker runs on a dedicated blocking OS thread (see
/// [`crate::nfc::worker`]); a `BusBridge` implementation crosses back into
/// the async scheduler and blocks the calling thread until a reply arrives,
/// reusing the correlation fabric (component D) for both calls below.
pub trait BusBridge: Send {
    fn verify_access(&self, token: &str) -> AccessReply;
    /// `true` if the lock is currently open.
    fn query_lock_state(&self) -> bool;
    /// Optimistically drive the lock to `open`/closed; always succeeds from
    /// the session's point of view (dummy-mode semantics live in the lock
    /// controller, not here).
    fn set_lock(&self, open: bool);
}

/// `{has_access, allowed_ops, is_open}`, reset at the start of every tap.
/// Lock actuator state that must survive across taps (the dummy-lock
/// `was_open` memory) lives in the lock controller, not here, since it is a
/// property of the shared actuator, not of any one session.
#[derive(Debug, Default)]
pub struct SessionState {
    pub has_access: bool,
    pub allowed_ops: HashSet<String>,
    pub is_open: Option<bool>,
}

impl SessionState {
    fn state_str(&self) -> String {
        if self.is_open == Some(true) { "open" } else { "closed" }.to_string()
    }

    fn refresh_lock_state(&mut self, bridge: &dyn BusBridge) {
        if self.is_open.is_none() {
            self.is_open = Some(bridge.query_lock_state());
        }
    }

    fn set_lock(&mut self, bridge: &dyn BusBridge, open: bool) {
        self.is_open = Some(open);
        bridge.set_lock(open);
    }
}

/// Drives one tap session to completion: sends `Announce`, then loops
/// dispatching inbound records until the peer hangs up or a transport error
/// occurs (both of which terminate the session silently, per the transport
/// error propagation policy).
pub fn run<I: Interface>(
    transport: &mut Transport<I>,
    announce: Record,
    bridge: &dyn BusBridge,
) -> Result<(), super::transport::Error<I::Error>> {
    transport.listen()?;
    let mut state = SessionState::default();
    let mut outgoing = announce.encode();

    loop {
        let Some(bytes) = transport.exchange(&outgoing)? else {
            debug!("NFC: session ended by peer hang-up");
            return Ok(());
        };
        let record = match Record::decode(&bytes) {
            Ok(record) => record,
            Err(err) => {
                warn!("NFC: malformed record, terminating session: {err}");
                return Ok(());
            }
        };
        let Some(response) = dispatch(record, &mut state, bridge) else {
            debug!("NFC: handler ended the session");
            return Ok(());
        };
        outgoing = response.encode();
    }
}

fn dispatch(record: Record, state: &mut SessionState, bridge: &dyn BusBridge) -> Option<Record> {
    match record {
        Record::Echo { message } => Some(Record::EchoSuccess { message }),
        Record::Verify { token } => Some(verify(state, bridge, &token)),
        Record::Query {} => Some(query(state, bridge)),
        Record::Open {} => Some(open(state, bridge)),
        Record::Close {} => Some(close(state, bridge)),
        // Any other decoded variant (a Success/Failure/Announce arriving as
        // an inbound command) is not a valid request; end the session.
        _ => None,
    }
}

fn verify(state: &mut SessionState, bridge: &dyn BusBridge, token: &str) -> Record {
    let reply = bridge.verify_access(token);
    if reply.valid && reply.allowed {
        state.has_access = true;
        state.allowed_ops = reply.actions.into_iter().collect();
        Record::VerifySuccess {}
    } else {
        Record::VerifyFailure { message: "Invalid or expired authentication token".to_string(), state: None }
    }
}

fn query(state: &mut SessionState, bridge: &dyn BusBridge) -> Record {
    if let Some(message) = auth_failure(state, "state", "Query") {
        return Record::QueryFailure { message, state: Some(state.state_str()) };
    }
    state.refresh_lock_state(bridge);
    Record::QuerySuccess { state: state.state_str() }
}

fn open(state: &mut SessionState, bridge: &dyn BusBridge) -> Record {
    if let Some(message) = auth_failure(state, "unlock", "Open") {
        return Record::OpenFailure { message, state: Some(state.state_str()) };
    }
    state.set_lock(bridge, true);
    Record::OpenSuccess { state: state.state_str() }
}

fn close(state: &mut SessionState, bridge: &dyn BusBridge) -> Record {
    if let Some(message) = auth_failure(state, "lock", "Close") {
        return Record::CloseFailure { message, state: Some(state.state_str()) };
    }
    state.set_lock(bridge, false);
    Record::CloseSuccess { state: state.state_str() }
}

fn auth_failure(state: &SessionState, op: &str, op_label: &str) -> Option<String> {
    if !state.has_access {
        Some("Authentication missing or invalid".to_string())
    } else if !state.allowed_ops.contains(op) {
        Some(format!("{op_label} operation not allowed"))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nfc::transport::Interface;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    struct StubBridge {
        valid: bool,
        actions: Vec<String>,
        lock_open: RefCell<bool>,
    }

    impl BusBridge for StubBridge {
        fn verify_access(&self, _token: &str) -> AccessReply {
            AccessReply { valid: self.valid, allowed: self.valid, actions: self.actions.clone() }
        }

        fn query_lock_state(&self) -> bool {
            *self.lock_open.borrow()
        }

        fn set_lock(&self, open: bool) {
            *self.lock_open.borrow_mut() = open;
        }
    }

    #[derive(Debug, derive_more::Display)]
    #[display("scripted interface exhausted")]
    struct Exhausted;
    impl std::error::Error for Exhausted {}

    struct Scripted {
        inbound: VecDeque<Vec<u8>>,
    }

    impl Interface for Scripted {
        type Error = Exhausted;
        fn activate(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
        fn receive(&mut self) -> Result<Vec<u8>, Self::Error> {
            self.inbound.pop_front().ok_or(Exhausted)
        }
        fn send(&mut self, _frame: &[u8]) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    fn framed(payload: Vec<u8>) -> Vec<u8> {
        let mut frame = vec![0x02];
        frame.extend(payload);
        frame
    }

    fn select_df() -> Vec<u8> {
        let mut frame = vec![0x00, 0xA4, 0x04, 0x00];
        let aid = b"eu.sofie-iot.smaug.locker.1";
        frame.push(aid.len() as u8);
        frame.extend_from_slice(aid);
        frame
    }

    #[test]
    fn happy_path_tap_grants_full_access() {
        let bridge = StubBridge { valid: true, actions: vec!["state".into(), "unlock".into(), "lock".into()], lock_open: RefCell::new(false) };
        let mut link = Scripted {
            inbound: vec![
                select_df(),
                framed(Record::Verify { token: "1;all;9999".to_string() }.encode()),
                framed(Record::Query {}.encode()),
                framed(Record::Open {}.encode()),
                framed(Record::Close {}.encode()),
                vec![0xB3],
            ]
            .into(),
        };
        let mut transport = Transport::new(&mut link, b"eu.sofie-iot.smaug.locker.1".to_vec());
        let announce = Record::Announce {
            contract_address: String::new(),
            locker_id: String::new(),
            name: String::new(),
            image_urls: vec![],
            open_close_type: "open-tap-close".to_string(),
        };

        // Drive the session manually so we can inspect each reply.
        transport.listen().unwrap();
        let mut outgoing = announce.encode();
        let mut state = SessionState::default();
        let mut replies = Vec::new();
        loop {
            let Some(bytes) = transport.exchange(&outgoing).unwrap() else { break };
            let record = Record::decode(&bytes).unwrap();
            let Some(response) = dispatch(record, &mut state, &bridge) else { break };
            replies.push(response.clone());
            outgoing = response.encode();
        }

        assert_eq!(replies[0], Record::VerifySuccess {});
        assert_eq!(replies[1], Record::QuerySuccess { state: "closed".to_string() });
        assert_eq!(replies[2], Record::OpenSuccess { state: "open".to_string() });
        assert_eq!(replies[3], Record::CloseSuccess { state: "closed".to_string() });
    }

    #[test]
    fn denied_access_blocks_every_subsequent_operation() {
        let bridge = StubBridge { valid: false, actions: vec![], lock_open: RefCell::new(false) };
        let mut state = SessionState::default();
        let verify_reply = dispatch(Record::Verify { token: "0;;1970".to_string() }, &mut state, &bridge).unwrap();
        assert!(matches!(verify_reply, Record::VerifyFailure { .. }));
        let open_reply = dispatch(Record::Open {}, &mut state, &bridge).unwrap();
        assert_eq!(
            open_reply,
            Record::OpenFailure { message: "Authentication missing or invalid".to_string(), state: Some("closed".to_string()) }
        );
    }

    #[test]
    fn partial_permissions_reject_disallowed_operations_only() {
        let bridge = StubBridge { valid: true, actions: vec!["state".to_string()], lock_open: RefCell::new(false) };
        let mut state = SessionState::default();
        dispatch(Record::Verify { token: "1;state;9999".to_string() }, &mut state, &bridge);
        let query_reply = dispatch(Record::Query {}, &mut state, &bridge).unwrap();
        assert_eq!(query_reply, Record::QuerySuccess { state: "closed".to_string() });
        let open_reply = dispatch(Record::Open {}, &mut state, &bridge).unwrap();
        assert_eq!(
            open_reply,
            Record::OpenFailure { message: "Open operation not allowed".to_string(), state: Some("closed".to_string()) }
        );
    }

    #[test]
    fn session_resets_before_announce_each_tap() {
        let state = SessionState::default();
        assert!(!state.has_access);
        assert!(state.allowed_ops.is_empty());
        assert_eq!(state.is_open, None);
    }
}
