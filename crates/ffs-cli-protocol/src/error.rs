//! Error types for the provisioning CLI protocol.

use thiserror::Error;

/// Errors that can occur when working with the provisioning CLI protocol.
#[derive(Debug, Error)]
pub enum CliError {
    /// Failed to parse a line from the firmware.
    #[error("failed to parse response: {0}")]
    ParseError(String),

    /// A parameter chunk cannot be sent as-is.
    #[error("invalid parameter chunk: {0}")]
    InvalidChunk(String),
}

/// Result type alias for CLI protocol operations.
pub type CliResult<T> = Result<T, CliError>;
