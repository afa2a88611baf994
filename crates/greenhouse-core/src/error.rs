//! Error types for greenhouse-core.
//!
//! Most of these never reach a consumer of [`crate::Engine`]: transport
//! failures are absorbed by the connection manager and turned into
//! [`greenhouse_types::ConnectionState`] transitions, and malformed telemetry
//! is dropped at the codec. They surface from the lower-level building blocks
//! ([`crate::transport`], [`crate::connection`]) so those can be tested and
//! logged precisely.
//!
//! | Error | Raised by | Engine reaction |
//! |-------|-----------|-----------------|
//! | [`Error::Serial`], [`Error::Io`] | endpoint open / read / write | endpoint skipped, or `Degraded` |
//! | [`Error::HandshakeFailed`] | handshake | endpoint skipped |
//! | [`Error::NoEndpoints`] | enumeration | stay `Disconnected` |
//! | [`Error::Parse`] | codec / validation | returned to the immediate caller |
//! | [`Error::ChannelClosed`] | command dispatch | logged, logical state kept |

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur inside the acquisition engine.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Serial port error.
    #[error("Serial error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error on an open endpoint.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Identifier or payload could not be interpreted.
    #[error(transparent)]
    Parse(#[from] greenhouse_types::ParseError),

    /// The endpoint opened but never answered the status probe.
    #[error("Handshake with {endpoint} failed: no status reply within {waited:?}")]
    HandshakeFailed {
        /// The endpoint that was probed.
        endpoint: String,
        /// How long the handshake waited.
        waited: Duration,
    },

    /// No plausible endpoint was found during enumeration.
    #[error("No candidate endpoints found")]
    NoEndpoints,

    /// The ingestion task is gone, so commands can no longer be queued.
    #[error("Ingestor channel closed")]
    ChannelClosed,

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a handshake failure for an endpoint.
    pub fn handshake_failed(endpoint: impl Into<String>, waited: Duration) -> Self {
        Self::HandshakeFailed {
            endpoint: endpoint.into(),
            waited,
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

/// Result type alias using greenhouse-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use greenhouse_types::ParseError;

    #[test]
    fn test_error_display() {
        let err = Error::handshake_failed("/dev/ttyACM0", Duration::from_secs(5));
        assert!(err.to_string().contains("/dev/ttyACM0"));
        assert!(err.to_string().contains("5s"));

        let err = Error::invalid_config("history_capacity must be > 0");
        assert_eq!(err.to_string(), "Invalid configuration: history_capacity must be > 0");

        assert_eq!(Error::NoEndpoints.to_string(), "No candidate endpoints found");
    }

    #[test]
    fn test_parse_error_conversion() {
        let err: Error = ParseError::UnknownDevice("heater".into()).into();
        assert!(matches!(err, Error::Parse(_)));
        assert_eq!(err.to_string(), "Unknown device: heater");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("gone"));
    }
}
