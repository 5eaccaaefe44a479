//! Error types for the provisioning engine.
//!
//! Only channel-level failures are errors. A command that fails, is not
//! recognized, or times out is reported as a [`CommandStatus`] so that a
//! session can keep going.
//!
//! [`CommandStatus`]: ffs_cli_protocol::CommandStatus

use std::path::PathBuf;

use ffs_cli_protocol::CliError;
use thiserror::Error;

/// Errors that abort a provisioning run.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Read, write or flush on the transport failed.
    #[error("transport I/O error: {0}")]
    Transport(#[from] std::io::Error),

    /// The serial port could not be opened or configured.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The response watcher thread panicked.
    #[error("response watcher panicked")]
    WatcherPanicked,

    /// A JSON document could not be parsed or written.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A file could not be read or written.
    #[error("failed to access {path}: {source}")]
    File {
        /// Path of the file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The product metadata has missing or unexpected entries.
    #[error("invalid metadata (missing: [{}], extra: [{}])", .missing.join(", "), .extra.join(", "))]
    InvalidMetadata {
        /// Required entries that are absent, empty or still placeholders.
        missing: Vec<String>,
        /// Entries that are not part of the metadata format.
        extra: Vec<String>,
    },

    /// The device serial string is not valid Base64.
    #[error("invalid base64 device serial {serial:?}: {reason}")]
    InvalidSerial {
        /// The rejected serial string.
        serial: String,
        /// Decoder message.
        reason: String,
    },

    /// Protocol-level encoding or parsing failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] CliError),
}

/// Result type alias for provisioning operations.
pub type Result<T> = std::result::Result<T, ProvisionError>;
