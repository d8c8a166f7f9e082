//! Half-duplex NFC transport: type-4 tag emulation responder (component B).

use derive_more::Display;
use log::{debug, warn};

const PROBE: [u8; 6] = [0x02, 0x00, 0xB0, 0x00, 0x00, 0x01];
const PROBE_REPLY: [u8; 2] = [0x90, 0x00];
const SELECT_DF_HEADER: [u8; 4] = [0x00, 0xA4, 0x04, 0x00];
const CONTROL_CONTINUATION_BIT: u8 = 0b0010_0000;
const CONTROL_SESSION_END: u8 = 0xB3;

/// The front-end a [`Transport`] drives. Already operates at the level of
/// whole command/response frames (as a PN532 in target mode hands back
/// fully-assembled frames via `TgGetData`/`TgSetData`), not raw bus bytes —
/// mirroring how the reader-mode driver this crate's NFC stack grew from
/// treats its interface as frame-level, not bit-level.
pub trait Interface {
    type Error: std::error::Error + Send + Sync + 'static;

    /// (Re-)enter target mode, presenting the fixed `sens_res`/`sdd_res`/
    /// `sel_res` of an ISO-14443-A type-4 tag, and block until an initiator
    /// activates us.
    fn activate(&mut self) -> Result<(), Self::Error>;

    /// Block for the initiator's next frame.
    fn receive(&mut self) -> Result<Vec<u8>, Self::Error>;

    /// Send a frame to the initiator.
    fn send(&mut self, frame: &[u8]) -> Result<(), Self::Error>;
}

impl<T: Interface> Interface for &mut T {
    type Error = T::Error;

    fn activate(&mut self) -> Result<(), Self::Error> {
        (**self).activate()
    }

    fn receive(&mut self) -> Result<Vec<u8>, Self::Error> {
        (**self).receive()
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), Self::Error> {
        (**self).send(frame)
    }
}

/// Transport error: wraps the underlying interface's I/O error.
#[derive(Debug, Display)]
pub enum Error<E> {
    #[display("NFC interface error: {_0}")]
    Interface(E),
}

impl<E: std::error::Error + 'static> std::error::Error for Error<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Interface(err) => Some(err),
        }
    }
}

impl<E> From<E> for Error<E> {
    fn from(err: E) -> Self {
        Self::Interface(err)
    }
}

enum SelectOutcome {
    Accepted { control: u8 },
    TruncatedLc,
    AidMismatch,
    NotRecognized,
}

fn classify_select_df(frame: &[u8], configured_aid: &[u8]) -> SelectOutcome {
    if frame.len() < SELECT_DF_HEADER.len() + 1 || frame[..SELECT_DF_HEADER.len()] != SELECT_DF_HEADER {
        return SelectOutcome::NotRecognized;
    }
    let lc = frame[SELECT_DF_HEADER.len()] as usize;
    let aid = &frame[SELECT_DF_HEADER.len() + 1..];
    if aid.len() < lc {
        return SelectOutcome::TruncatedLc;
    }
    if &aid[..lc] != configured_aid {
        return SelectOutcome::AidMismatch;
    }
    SelectOutcome::Accepted { control: 0 }
}

/// No real target-mode radio driver ships in this crate (the reader-role
/// PN532 driver this stack grew from exposes a controller that reads
/// tags, not one that emulates being read); this stands in for it so the
/// worker thread still has something to drive. Every call blocks briefly
/// and then errors, so the worker's listen loop retries at a sedate pace
/// rather than spinning.
#[derive(Debug, Default)]
pub struct NullInterface;

#[derive(Debug, Display)]
#[display("no target-mode NFC driver is configured")]
pub struct NoHardware;

impl std::error::Error for NoHardware {}

impl Interface for NullInterface {
    type Error = NoHardware;

    fn activate(&mut self) -> Result<(), Self::Error> {
        std::thread::sleep(std::time::Duration::from_secs(60));
        Err(NoHardware)
    }

    fn receive(&mut self) -> Result<Vec<u8>, Self::Error> {
        Err(NoHardware)
    }

    fn send(&mut self, _frame: &[u8]) -> Result<(), Self::Error> {
        Err(NoHardware)
    }
}

/// Drives one [`Interface`] through listen/select/exchange per the type-4
/// tag emulation responder protocol.
pub struct Transport<I> {
    interface: I,
    aid: Vec<u8>,
    last_control: u8,
}

impl<I: Interface> Transport<I> {
    pub fn new(interface: I, aid: impl Into<Vec<u8>>) -> Self {
        Self { interface, aid: aid.into(), last_control: 0 }
    }

    /// Blocks until a peer selects our configured AID. On return, the
    /// transport is ready for [`Self::exchange`] to send the first reply
    /// (the session engine's `Announce`).
    pub fn listen(&mut self) -> Result<(), Error<I::Error>> {
        loop {
            self.interface.activate()?;
            self.last_control = 0;
            loop {
                let frame = self.interface.receive()?;
                if frame.is_empty() {
                    continue;
                }
                if frame == PROBE {
                    debug!("NFC: probe received, replying success and remaining in listen");
                    self.interface.send(&PROBE_REPLY)?;
                    continue;
                }
                match classify_select_df(&frame, &self.aid) {
                    SelectOutcome::Accepted { control } => {
                        self.last_control = control;
                        debug!("NFC: AID selected, session starting");
                        return Ok(());
                    }
                    SelectOutcome::TruncatedLc => {
                        warn!("NFC: SELECT DF with truncated LC, rejecting");
                    }
                    SelectOutcome::AidMismatch => {
                        warn!("NFC: SELECT DF with mismatching AID, rejecting");
                    }
                    SelectOutcome::NotRecognized => {
                        debug!("NFC: unrecognized frame while listening, ignoring");
                    }
                }
            }
        }
    }

    /// Sends `payload` (the application record bytes) prefixed with an
    /// I-block control byte, then waits for and reassembles the peer's
    /// reply. `Ok(None)` means the peer ended the session.
    pub fn exchange(&mut self, payload: &[u8]) -> Result<Option<Vec<u8>>, Error<I::Error>> {
        let control = 0x02 | (self.last_control & 0x01);
        let mut frame = Vec::with_capacity(1 + payload.len());
        frame.push(control);
        frame.extend_from_slice(payload);
        self.interface.send(&frame)?;
        self.receive_reply()
    }

    fn receive_reply(&mut self) -> Result<Option<Vec<u8>>, Error<I::Error>> {
        let mut accumulated = Vec::new();
        loop {
            let frame = self.interface.receive()?;
            let Some((&control, tail)) = frame.split_first() else {
                debug!("NFC: null/empty frame, ending session");
                return Ok(None);
            };
            self.last_control = control;
            if control == CONTROL_SESSION_END {
                debug!("NFC: peer ended session");
                return Ok(None);
            }
            accumulated.extend_from_slice(tail);
            if control & CONTROL_CONTINUATION_BIT != 0 {
                self.interface.send(&[control])?;
                continue;
            }
            return Ok(Some(accumulated));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Debug, Display)]
    #[display("scripted interface exhausted")]
    struct Exhausted;
    impl std::error::Error for Exhausted {}

    /// Drives a [`Transport`] against a scripted sequence of inbound frames,
    /// recording every outbound frame for assertions.
    struct Scripted {
        inbound: VecDeque<Vec<u8>>,
        pub outbound: Rc<RefCell<Vec<Vec<u8>>>>,
    }

    impl Scripted {
        fn new(inbound: Vec<Vec<u8>>) -> Self {
            Self { inbound: inbound.into(), outbound: Rc::new(RefCell::new(Vec::new())) }
        }
    }

    impl Interface for Scripted {
        type Error = Exhausted;

        fn activate(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }

        fn receive(&mut self) -> Result<Vec<u8>, Self::Error> {
            self.inbound.pop_front().ok_or(Exhausted)
        }

        fn send(&mut self, frame: &[u8]) -> Result<(), Self::Error> {
            self.outbound.borrow_mut().push(frame.to_vec());
            Ok(())
        }
    }

    const AID: &[u8] = b"eu.sofie-iot.smaug.locker.1";

    fn select_df(aid: &[u8]) -> Vec<u8> {
        let mut frame = SELECT_DF_HEADER.to_vec();
        frame.push(aid.len() as u8);
        frame.extend_from_slice(aid);
        frame
    }

    #[test]
    fn probe_elicits_success_and_listener_remains() {
        let mut link = Scripted::new(vec![PROBE.to_vec(), select_df(AID)]);
        let aid = AID.to_vec();
        let mut transport = Transport::new(&mut link, aid);
        transport.listen().unwrap();
        assert_eq!(*link.outbound.borrow(), vec![PROBE_REPLY.to_vec()]);
    }

    #[test]
    fn truncated_lc_is_rejected_and_listener_remains() {
        let mut truncated = SELECT_DF_HEADER.to_vec();
        truncated.push(10); // claims 10 bytes of AID but supplies none
        let mut link = Scripted::new(vec![truncated, select_df(AID)]);
        let mut transport = Transport::new(&mut link, AID.to_vec());
        transport.listen().unwrap();
        assert!(link.outbound.borrow().is_empty());
    }

    #[test]
    fn mismatching_aid_is_rejected_and_listener_remains() {
        let mut link = Scripted::new(vec![select_df(b"not-our-aid"), select_df(AID)]);
        let mut transport = Transport::new(&mut link, AID.to_vec());
        transport.listen().unwrap();
        assert!(link.outbound.borrow().is_empty());
    }

    #[test]
    fn exchange_toggles_control_bit_from_last_received() {
        let mut link = Scripted::new(vec![select_df(AID), vec![0x03, 0xAA], vec![0xB3]]);
        let outbound = link.outbound.clone();
        let mut transport = Transport::new(&mut link, AID.to_vec());
        transport.listen().unwrap();
        let reply = transport.exchange(&[0x01]).unwrap();
        assert_eq!(reply, Some(vec![0xAA]));
        assert_eq!(outbound.borrow()[0][0], 0x02);
        // last received control was 0x03 (odd), so the next outgoing control toggles to 0x02 | 1 = 0x03
        let ended = transport.exchange(&[0x02]).unwrap();
        assert_eq!(outbound.borrow()[1][0], 0x03);
        assert_eq!(ended, None);
    }

    #[test]
    fn continuation_chunks_are_reassembled() {
        let mut link = Scripted::new(vec![
            select_df(AID),
            vec![CONTROL_CONTINUATION_BIT | 0x02, 0xAA, 0xBB],
            vec![CONTROL_CONTINUATION_BIT | 0x02, 0xCC],
            vec![0x02, 0xDD],
        ]);
        let mut transport = Transport::new(&mut link, AID.to_vec());
        transport.listen().unwrap();
        let reply = transport.exchange(&[0x00]).unwrap();
        assert_eq!(reply, Some(vec![0xAA, 0xBB, 0xCC, 0xDD]));
    }
}
