//! Error types for data parsing in miband-types.

use thiserror::Error;

/// Errors that can occur when parsing band identifiers, keys or BLE payloads.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in miband-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// Payload was shorter than the format requires.
    #[error("Insufficient bytes: expected at least {expected}, got {actual}")]
    InsufficientBytes { expected: usize, actual: usize },

    /// Text is not a six-pair, colon-delimited MAC address.
    #[error("Invalid MAC address: '{0}'")]
    InvalidAddress(String),

    /// Key text is not exactly 32 hex digits.
    #[error("Invalid authentication key: {0}")]
    InvalidKey(String),

    /// Value is well-formed but out of the accepted range.
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Result type alias using miband-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
