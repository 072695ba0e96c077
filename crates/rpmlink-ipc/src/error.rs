//! Error types for the line protocol.

use thiserror::Error;

/// A telemetry line that could not be decoded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    /// The line does not start with the `rpm:` tag.
    #[error("telemetry line lacks the `rpm:` prefix: {0:?}")]
    MissingPrefix(String),
    /// The value after the tag is not a finite number.
    #[error("telemetry value is not a number: {0:?}")]
    InvalidValue(String),
}
