//! Error types for data parsing in greenhouse-types.

use thiserror::Error;

/// Errors that can occur when interpreting greenhouse identifiers and values.
///
/// This error type is platform-agnostic and does not include
/// transport errors (those belong in greenhouse-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The device id is not one of the known actuators.
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// The metric name is not one of the known metrics.
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    /// A matched token carried a payload that is not a valid number.
    #[error("Invalid value for {token}: {value:?}")]
    InvalidValue {
        /// The token whose payload failed to parse.
        token: String,
        /// The raw payload text.
        value: String,
    },
}

/// Result type alias using greenhouse-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
