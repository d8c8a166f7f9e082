//! Binary record codec (tag byte + packed key/value body).
//!
//! Every message exchanged with an NFC peer, and every frame that crosses
//! the bus in serialized form, is one of these records. The wire layout is
//! `tag || packed_fields`, see [`Record::encode`]/[`Record::decode`].

mod error;
mod record;
mod value;

pub use error::Error;
pub use record::Record;
pub use value::Value;
