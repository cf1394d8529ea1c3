use thiserror::Error;

/// A stored or streamed item could not be turned into a typed value.
///
/// Decode failures are never retried: the same bytes will fail the same way.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("missing attribute: {0}")]
    MissingAttribute(&'static str),

    #[error("attribute {name} has the wrong type: expected {expected}")]
    WrongType {
        name: &'static str,
        expected: &'static str,
    },

    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("attribute {0} must not be empty")]
    Empty(&'static str),

    #[error("malformed record: {0}")]
    Malformed(String),
}
