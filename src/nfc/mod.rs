//! NFC protocol engine: transport (B) and session (C).

pub mod bridge;
pub mod session;
pub mod transport;
pub mod worker;

pub use session::{AccessReply, BusBridge};
pub use transport::{Interface, Transport};
