//! Controllers plugged into the [`crate::runtime`] composer (components
//! G-J): access, lock, WoT façade, beacon.

mod access;
mod beacon;
mod lock;
mod wot;

pub use access::AccessController;
pub use beacon::BeaconController;
pub use lock::LockController;
pub use wot::WotController;
