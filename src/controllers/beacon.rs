//! Beacon (component J): Eddystone-UID advertising. No inbound handlers —
//! this controller only drives outbound BLE state, started at `initialize`
//! and stopped at `uninitialize`.

use crate::config::BeaconConfig;
use crate::error::{Error, ErrorKind};
use crate::runtime::{Controller, HandlerSpec, Publisher};
use log::info;

const EDDYSTONE_UID_FRAME_TYPE: u8 = 0x00;
const NAMESPACE_LEN: usize = 10;
const INSTANCE_LEN: usize = 6;

/// Builds the Eddystone-UID service-data payload: frame type, calibrated Tx
/// power (left at 0, no real radio to calibrate against), 10-byte namespace,
/// 6-byte instance, and two reserved zero bytes.
fn eddystone_uid_frame(namespace: &[u8; NAMESPACE_LEN], instance: &[u8; INSTANCE_LEN]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(2 + NAMESPACE_LEN + INSTANCE_LEN + 2);
    frame.push(EDDYSTONE_UID_FRAME_TYPE);
    frame.push(0); // calibrated Tx power
    frame.extend_from_slice(namespace);
    frame.extend_from_slice(instance);
    frame.extend_from_slice(&[0, 0]);
    frame
}

/// Decodes hex into a fixed-size array, left-padding with zero bytes if
/// `text` decodes shorter than `N` (matching the original's `bytes.rjust`),
/// and rejecting only inputs that decode longer than `N`.
fn parse_hex_array<const N: usize>(field: &'static str, text: &str) -> Result<[u8; N], Error> {
    let bytes = const_hex::decode(text).map_err(|err| ErrorKind::Validation(format!("{field}: {err}")))?;
    if bytes.len() > N {
        return Err(ErrorKind::Validation(format!("{field}: expected at most {N} bytes, got {}", bytes.len())).into());
    }
    let mut padded = [0u8; N];
    padded[N - bytes.len()..].copy_from_slice(&bytes);
    Ok(padded)
}

/// No real BLE radio in this corpus; the mock driver only logs what it
/// would have advertised. A real implementation would own a BlueZ/HCI
/// handle here instead.
trait BeaconDriver: Send + Sync {
    fn start(&self, frame: &[u8]);
    fn stop(&self);
}

struct MockBeaconDriver;

impl BeaconDriver for MockBeaconDriver {
    fn start(&self, frame: &[u8]) {
        info!("Beacon: advertising Eddystone-UID frame {}", const_hex::encode(frame));
    }

    fn stop(&self) {
        info!("Beacon: advertising stopped");
    }
}

pub struct BeaconController {
    driver: Box<dyn BeaconDriver>,
    namespace: [u8; NAMESPACE_LEN],
    instance: [u8; INSTANCE_LEN],
}

impl BeaconController {
    pub fn new(config: &BeaconConfig) -> Result<Self, Error> {
        Ok(Self {
            driver: Box::new(MockBeaconDriver),
            namespace: parse_hex_array("beacon.namespace", &config.namespace)?,
            instance: parse_hex_array("beacon.instance", &config.instance)?,
        })
    }
}

#[async_trait::async_trait]
impl Controller for BeaconController {
    fn handlers(&self) -> Vec<HandlerSpec> {
        Vec::new()
    }

    async fn set_publisher(&self, _publisher: Publisher) {}

    async fn initialize(&self) -> Result<(), Error> {
        let frame = eddystone_uid_frame(&self.namespace, &self.instance);
        self.driver.start(&frame);
        Ok(())
    }

    async fn uninitialize(&self) {
        self.driver.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_layout_matches_eddystone_uid() {
        let namespace = [0x11; NAMESPACE_LEN];
        let instance = [0x22; INSTANCE_LEN];
        let frame = eddystone_uid_frame(&namespace, &instance);
        assert_eq!(frame.len(), 20);
        assert_eq!(frame[0], 0x00);
        assert_eq!(frame[1], 0x00);
        assert_eq!(&frame[2..12], &namespace);
        assert_eq!(&frame[12..18], &instance);
        assert_eq!(&frame[18..20], &[0, 0]);
    }

    #[test]
    fn hex_fields_decode_to_fixed_size_arrays() {
        let namespace: [u8; NAMESPACE_LEN] = parse_hex_array("ns", "00112233445566778899").unwrap();
        assert_eq!(namespace[0], 0x00);
        assert_eq!(namespace[9], 0x99);
    }

    #[test]
    fn short_hex_field_is_left_padded_with_zeros() {
        let namespace: [u8; NAMESPACE_LEN] = parse_hex_array("ns", "00112233").unwrap();
        assert_eq!(namespace, [0, 0, 0, 0, 0, 0, 0x00, 0x11, 0x22, 0x33]);
    }

    #[test]
    fn empty_hex_field_decodes_to_all_zeros() {
        let namespace: [u8; NAMESPACE_LEN] = parse_hex_array("ns", "").unwrap();
        assert_eq!(namespace, [0; NAMESPACE_LEN]);
    }

    #[test]
    fn over_length_hex_field_is_rejected() {
        assert!(parse_hex_array::<NAMESPACE_LEN>("ns", "00112233445566778899aa").is_err());
    }
}
