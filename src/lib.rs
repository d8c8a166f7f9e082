//! Firmware-level control plane for a smart-locker endpoint: BLE announce,
//! NFC tap auth against a type-4 tag emulator, bearer-token verification
//! against an access backend, and lock actuation, composed as a handful of
//! independently testable controllers over a shared message bus.

pub mod bus;
pub mod codec;
pub mod config;
pub mod controllers;
pub mod correlation;
pub mod error;
pub mod nfc;
pub mod runtime;

pub use error::{Error, ErrorKind};
