//! Duplex line transport to the device shell.
//!
//! A [`Transport`] is split into a read half that yields whole lines and a
//! plain [`Write`] half. Command execution lends the read half to a watcher
//! thread while the calling thread writes, so the two halves must be usable
//! independently.

use std::io::{self, Read, Write};

use ffs_cli_protocol::LineCodec;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, trace};

use crate::config::SerialConfig;
use crate::error::Result;

/// Source of lines from the device.
pub trait LineSource: Send {
    /// Wait for one complete line, at most the source's poll timeout.
    ///
    /// Returns `Ok(None)` when no complete line arrived in time. Lines keep
    /// their terminator.
    fn read_line(&mut self) -> io::Result<Option<String>>;
}

/// A read half and a write half bound to the same device.
///
/// Dropping the transport closes both halves.
pub struct Transport<R, W> {
    reader: R,
    writer: W,
}

impl<R: LineSource, W: Write> Transport<R, W> {
    /// Assemble a transport from its halves.
    pub fn new(reader: R, writer: W) -> Self {
        Transport { reader, writer }
    }

    /// Borrow both halves at once.
    pub fn split(&mut self) -> (&mut R, &mut W) {
        (&mut self.reader, &mut self.writer)
    }

    /// Flush pending output and close the transport.
    pub fn close(mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Transport over a real serial port.
pub type SerialTransport = Transport<SerialLineReader, Box<dyn SerialPort>>;

impl SerialTransport {
    /// Open the port described by `config`.
    ///
    /// The read half is a cloned handle with the short read timeout; the
    /// write half keeps the longer write timeout.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        debug!(
            "Opening {} at {} baud (read timeout {:?}, write timeout {:?})",
            config.port, config.baud_rate, config.read_timeout, config.write_timeout
        );

        let writer = serialport::new(&config.port, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(config.write_timeout)
            .open()?;

        let mut reader = writer.try_clone()?;
        reader.set_timeout(config.read_timeout)?;

        Ok(Transport::new(SerialLineReader::new(reader), writer))
    }
}

/// Line reader over a serial port handle.
pub struct SerialLineReader {
    port: Box<dyn SerialPort>,
    codec: LineCodec,
    buf: [u8; 256],
}

impl SerialLineReader {
    /// Wrap a port handle whose timeout is the poll interval.
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        SerialLineReader {
            port,
            codec: LineCodec::new(),
            buf: [0u8; 256],
        }
    }
}

impl SerialLineReader {
    fn idle(&self) -> Option<String> {
        let pending = self.codec.buffered_len();
        if pending > 0 {
            trace!("Poll timed out with {} bytes of a partial line held", pending);
        }
        None
    }
}

impl LineSource for SerialLineReader {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(line) = self.codec.decode_line() {
                return Ok(Some(line));
            }

            match self.port.read(&mut self.buf) {
                Ok(n) if n > 0 => self.codec.push(&self.buf[..n]),
                Ok(_) => return Ok(self.idle()),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(self.idle()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }
}
