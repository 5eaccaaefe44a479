//! Response classification for the provisioning shell.
//!
//! The firmware interleaves echo, log output and data with its status lines,
//! so classification is substring-based:
//! - `ffs_provision command success` ends a command successfully
//! - `ffs_provision command fail` ends it with a failure
//! - `Command not recognized.` is printed for unknown commands

use std::fmt;

use crate::error::{CliError, CliResult};

/// Status line printed after a successful command.
pub const STATUS_SUCCESS: &str = "ffs_provision command success";

/// Status line printed after a failed command.
pub const STATUS_FAIL: &str = "ffs_provision command fail";

/// Line printed by the shell for unknown commands.
pub const STATUS_UNRECOGNIZED: &str = "Command not recognized.";

/// Prompt prefix in front of shell command output.
pub const SHELL_PROMPT: &str = "SHELL>> ";

/// Outcome of a single command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandStatus {
    /// The firmware reported success.
    Success,
    /// The firmware reported failure.
    Fail,
    /// The shell did not recognize the command.
    Unrecognized,
    /// No status line arrived before the deadline.
    Timeout,
}

impl CommandStatus {
    /// Classify a received line.
    ///
    /// Returns `None` for lines that are not terminal (echo, logs, data).
    pub fn classify(line: &str) -> Option<CommandStatus> {
        if line.contains(STATUS_SUCCESS) {
            Some(CommandStatus::Success)
        } else if line.contains(STATUS_FAIL) {
            Some(CommandStatus::Fail)
        } else if line.contains(STATUS_UNRECOGNIZED) {
            Some(CommandStatus::Unrecognized)
        } else {
            None
        }
    }

    /// Check whether a line carries an `ffs_provision` status.
    ///
    /// Unlike [`CommandStatus::classify`] this ignores the shell's
    /// `Command not recognized.` line.
    pub fn is_provision_status(line: &str) -> bool {
        line.contains(STATUS_SUCCESS) || line.contains(STATUS_FAIL)
    }

    /// Only [`CommandStatus::Success`] counts as success.
    pub fn is_success(&self) -> bool {
        matches!(self, CommandStatus::Success)
    }

    /// Get the status name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Success => "success",
            CommandStatus::Fail => "fail",
            CommandStatus::Unrecognized => "unrecognized",
            CommandStatus::Timeout => "timeout",
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse the output line of the `serial_number` shell command.
///
/// Format: `SHELL>> <serial>` where the serial has no whitespace.
pub fn parse_serial_line(line: &str) -> CliResult<String> {
    let text = line.trim_end_matches(['\r', '\n']);
    let serial = text
        .strip_prefix(SHELL_PROMPT)
        .ok_or_else(|| CliError::ParseError(format!("missing shell prompt: {:?}", text)))?;

    if serial.is_empty() || serial.chars().any(char::is_whitespace) {
        return Err(CliError::ParseError(format!(
            "unexpected serial number output: {:?}",
            text
        )));
    }

    Ok(serial.to_string())
}
