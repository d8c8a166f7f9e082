use derive_more::Display;

/// Top-level error type, wrapping a causing [`ErrorKind`].
#[derive(Debug, Display)]
#[display("{kind}")]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.kind.source()
    }
}

impl<T> From<T> for Error
where
    ErrorKind: From<T>,
{
    fn from(err: T) -> Self {
        Self { kind: ErrorKind::from(err) }
    }
}

/// Error kind with optional embedded causing error.
#[derive(Debug, Display)]
#[allow(clippy::module_name_repetitions)]
pub enum ErrorKind {
    #[display("decode: {_0}")]
    Decode(crate::codec::Error),
    #[display("validation: {_0}")]
    Validation(String),
    #[display("transport: {_0}")]
    Transport(String),
    #[display("access denied: {_0}")]
    AuthDenied(String),
    #[display("access backend unreachable: {_0}")]
    AuthUnreachable(String),
    #[display("timed out waiting for a reply")]
    Timeout,
    #[display("operation not allowed: {_0}")]
    UnsupportedOp(String),
    #[display("hardware error: {_0}")]
    Hardware(String),
    #[display("shutting down")]
    Shutdown,
}

impl std::error::Error for ErrorKind {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Decode(err) => Some(err),
            _ => None,
        }
    }
}

impl From<crate::codec::Error> for ErrorKind {
    fn from(err: crate::codec::Error) -> Self {
        Self::Decode(err)
    }
}
