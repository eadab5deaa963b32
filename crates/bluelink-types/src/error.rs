//! Error types for parsing user-supplied identifiers and values.

use thiserror::Error;

/// Errors that can occur when parsing UUIDs or write payloads.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in bluelink-core).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    /// The string is neither a 16-bit short UUID nor a full 128-bit UUID.
    #[error("Invalid UUID '{0}': expected 4 hex digits (e.g. 180D) or a full UUID")]
    InvalidUuid(String),

    /// A `hex:` payload contained a non-hex character or an odd number of digits.
    #[error("Invalid hex value '{0}'")]
    InvalidHex(String),

    /// The payload was empty.
    #[error("Value must not be empty")]
    EmptyValue,
}

/// Result type alias using bluelink-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
