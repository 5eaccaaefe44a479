//! Serial link and session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Baud rate of the device shell.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Per-poll read timeout of the serial port.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Write timeout of the serial port.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Inter-byte delay used by `--speed slow` when none is given.
pub const DEFAULT_SLOW_DELAY_MS: u64 = 10;

/// Settings for opening the serial port (8N1, no flow control).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name, e.g. `/dev/ttyACM0` or `COM3`.
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// How long one line poll may block.
    pub read_timeout: Duration,
    /// How long a write may block.
    pub write_timeout: Duration,
}

impl SerialConfig {
    /// Create a configuration for `port` with the shell defaults.
    pub fn new(port: impl Into<String>) -> Self {
        SerialConfig {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

/// How command bytes are pushed to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum WriteMode {
    /// One bulk write per command.
    #[default]
    Normal,
    /// One byte at a time with a fixed delay, for links that drop bytes
    /// under burst writes.
    Slow {
        /// Delay after each byte in milliseconds.
        delay_ms: u64,
    },
}

impl WriteMode {
    /// Delay inserted after each byte, if any.
    pub fn byte_delay(&self) -> Option<Duration> {
        match self {
            WriteMode::Normal => None,
            WriteMode::Slow { delay_ms } => Some(Duration::from_millis(*delay_ms)),
        }
    }
}

/// Timeouts and write mode for a provisioning session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How command bytes are written.
    pub write_mode: WriteMode,
    /// Timeout for ordinary commands (start, stop, parameter upload).
    pub command_timeout_ms: u64,
    /// Timeout for `dha_keygen`.
    pub keygen_timeout_ms: u64,
    /// Shared timeout for reading the CSR block and its status.
    pub csr_timeout_ms: u64,
    /// Timeout for reading the certificate chain back.
    pub cert_read_timeout_ms: u64,
    /// Timeout for each command of the certificate upload.
    pub cert_set_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            write_mode: WriteMode::Normal,
            command_timeout_ms: 1_000,
            keygen_timeout_ms: 3_000,
            csr_timeout_ms: 3_000,
            cert_read_timeout_ms: 2_000,
            cert_set_timeout_ms: 10_000,
        }
    }
}

impl SessionConfig {
    /// Timeout for ordinary commands.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Timeout for `dha_keygen`.
    pub fn keygen_timeout(&self) -> Duration {
        Duration::from_millis(self.keygen_timeout_ms)
    }

    /// Timeout for the CSR read.
    pub fn csr_timeout(&self) -> Duration {
        Duration::from_millis(self.csr_timeout_ms)
    }

    /// Timeout for the certificate chain read.
    pub fn cert_read_timeout(&self) -> Duration {
        Duration::from_millis(self.cert_read_timeout_ms)
    }

    /// Timeout for the certificate upload.
    pub fn cert_set_timeout(&self) -> Duration {
        Duration::from_millis(self.cert_set_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_defaults() {
        let config = SerialConfig::new("/dev/ttyACM0");
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.read_timeout, Duration::from_millis(200));
        assert_eq!(config.write_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_write_mode_delay() {
        assert_eq!(WriteMode::Normal.byte_delay(), None);
        assert_eq!(
            WriteMode::Slow { delay_ms: 10 }.byte_delay(),
            Some(Duration::from_millis(10))
        );
    }

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.command_timeout(), Duration::from_secs(1));
        assert_eq!(config.keygen_timeout(), Duration::from_secs(3));
        assert_eq!(config.cert_set_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_session_config_partial_json() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"write_mode": {"mode": "slow", "delay_ms": 25}, "csr_timeout_ms": 5000}"#)
                .unwrap();
        assert_eq!(config.write_mode, WriteMode::Slow { delay_ms: 25 });
        assert_eq!(config.csr_timeout_ms, 5000);
        assert_eq!(config.command_timeout_ms, 1_000);
    }
}
