//! Core protocol errors.

use thiserror::Error;

/// Errors raised while decoding or encoding wire messages.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Inbound payload is not a recognised assignment.
    #[error("Malformed assignment: {0}")]
    MalformedAssignment(#[source] serde_json::Error),

    /// Outbound report could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
