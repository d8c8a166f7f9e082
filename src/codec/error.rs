use derive_more::Display;

/// Record decode/encode error.
///
/// Carries enough context to log a useful `warn!` when a controller drops a
/// malformed inbound message without crashing the session.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum Error {
    /// Zero-length input.
    #[display("empty record")]
    Empty,
    /// `byte[0]` does not match any declared record tag.
    #[display("unknown tag: {_0:#04x}")]
    UnknownTag(u8),
    /// A field name present in the body is not declared for this variant.
    #[display("unknown field: {_0}")]
    UnknownField(String),
    /// A required field is absent after parsing the whole body.
    #[display("missing field: {_0}")]
    MissingField(&'static str),
    /// Trailing bytes remain after the declared field count was consumed.
    #[display("extra positional data")]
    ExtraPositional,
    /// The body could not be parsed as a well-formed field map at all.
    #[display("body is not a map")]
    BodyNotMap,
    /// A field was present with a type other than what the variant expects.
    #[display("field {_0} has the wrong type")]
    WrongFieldType(&'static str),
}

impl std::error::Error for Error {}
