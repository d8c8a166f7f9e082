//! Dedicated OS thread driving the NFC transport, per the concurrency
//! model's "NFC transport blocks on hardware I/O and therefore runs on one
//! dedicated OS thread" rule.

use super::bridge::TokioBusBridge;
use super::session;
use super::transport::{Interface, Transport};
use crate::codec::Record;
use crate::config::NfcConfig;
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Runs the listen-tap-listen loop until `running` is cleared, per the
/// cancellation model: "the NFC worker observes a running flag and exits
/// its listen loop". Intended to be wrapped in `tokio::task::spawn_blocking`
/// by the caller.
pub fn run_loop<I: Interface>(mut interface: I, config: &NfcConfig, bridge: TokioBusBridge, running: Arc<AtomicBool>) {
    let mut transport = Transport::new(&mut interface, config.aid.clone().into_bytes());
    info!("NFC: worker started, AID {}", config.aid);

    while running.load(Ordering::Relaxed) {
        let announce = Record::Announce {
            contract_address: config.contract_address.clone(),
            locker_id: config.locker_id.clone(),
            name: config.name.clone(),
            image_urls: config.image_urls.clone(),
            open_close_type: config.open_close_type.clone(),
        };
        match session::run(&mut transport, announce, &bridge) {
            Ok(()) => {}
            Err(err) => warn!("NFC: transport error, returning to listen: {err}"),
        }
    }
    info!("NFC: worker stopped");
}
