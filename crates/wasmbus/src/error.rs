use core::fmt::Display;

/// Error taxonomy shared by every layer of the lattice RPC stack.
///
/// The variants are deliberately coarse: callers branch on the kind, not on
/// the underlying cause. Transport errors are retryable; encode/decode
/// errors are terminal for the message; validation errors carry a
/// descriptive message back to the caller; operation errors cover user
/// handler failures and dispatch misses.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("operation error: {0}")]
    Operation(String),
}

impl Error {
    pub fn transport(err: impl Display) -> Self {
        Error::Transport(err.to_string())
    }

    pub fn encode(err: impl Display) -> Self {
        Error::Encode(err.to_string())
    }

    pub fn decode(err: impl Display) -> Self {
        Error::Decode(err.to_string())
    }

    pub fn validation(err: impl Display) -> Self {
        Error::Validation(err.to_string())
    }

    pub fn operation(err: impl Display) -> Self {
        Error::Operation(err.to_string())
    }

    /// Re-tag an error as a decode error, unless it already is one.
    pub(crate) fn into_decode(self) -> Self {
        match self {
            err @ Error::Decode(_) => err,
            other => Error::Decode(other.to_string()),
        }
    }

    /// Re-tag an error as an encode error, unless it already is one.
    pub(crate) fn into_encode(self) -> Self {
        match self {
            err @ Error::Encode(_) => err,
            other => Error::Encode(other.to_string()),
        }
    }

    /// Re-tag an error as an operation error, unless it already is one.
    pub(crate) fn into_operation(self) -> Self {
        match self {
            err @ Error::Operation(_) => err,
            other => Error::Operation(other.to_string()),
        }
    }
}
