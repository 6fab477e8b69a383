//! Codec error types.

use thiserror::Error;

/// Errors raised while encoding or decoding a value.
///
/// These never leave the gateway as failures of the surrounding operation: a
/// value that cannot be encoded or decoded is carried as null instead.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Neither the binary nor the text format can represent the type.
    #[error("type {0} is not encodable")]
    NotEncodable(&'static str),

    /// The type tag has no registered entry.
    #[error("unknown type tag: {0}")]
    UnknownTag(String),

    /// An encode function was handed a value of the wrong type.
    #[error("expected a value of type {0}")]
    TypeMismatch(&'static str),

    /// Binary (bincode) format failure.
    #[error("binary format error: {0}")]
    Binary(String),

    /// Text (JSON) format failure.
    #[error("text format error: {0}")]
    Text(String),
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;
