//! The crate's single error hierarchy.
//!
//! Every fallible public operation returns [`Error`] so callers can match on
//! the documented failure kind instead of parsing a message string.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("record not found")]
    RecordNotFound,

    #[error("encoded record of {size} bytes exceeds per-page capacity of {capacity} bytes")]
    RecordTooLarge { size: usize, capacity: usize },

    #[error("failed to decode record: {0}")]
    Decode(#[from] DecodeError),

    #[error("record has {got} fields but schema declares {expected}")]
    SchemaMismatch { expected: usize, got: usize },

    #[error("var_str value of {len} bytes exceeds the 255-byte maximum")]
    VarStrTooLong { len: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to (de)serialize schema sidecar: {0}")]
    SchemaSidecar(#[from] serde_json::Error),
}

/// The reasons [`Error::Decode`] can occur, kept distinct from the outer
/// enum so a caller that only cares about "decode failed" doesn't have to
/// match on the encoding minutiae, but can if they want to.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("buffer ended after {consumed} bytes while decoding a {field_type} field")]
    UnexpectedEof {
        consumed: usize,
        field_type: &'static str,
    },

    #[error("var_str declares length {declared} but only {available} bytes remain")]
    VarStrOverrun { declared: usize, available: usize },

    #[error("var_str payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

pub type Result<T> = std::result::Result<T, Error>;
