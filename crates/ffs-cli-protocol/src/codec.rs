//! Line-based codec for the provisioning shell.
//!
//! Commands are terminated with `\r\n`. The firmware answers with lines ending
//! in `\n` (usually `\r\n`). Lines are handed out with their terminator intact
//! so PEM blocks can be reassembled byte-for-byte.

use bytes::BytesMut;

/// Maximum length of a line handed out without its terminator. Longer runs
/// are force-split once more data is buffered.
pub const MAX_LINE_LENGTH: usize = 1024;

/// Command terminator expected by the firmware shell.
pub const COMMAND_TERMINATOR: &str = "\r\n";

/// A codec for reading and writing shell lines.
///
/// Bytes arrive in arbitrary pieces from the serial port. The codec holds
/// partial lines until their `\n` arrives, so a read timeout in the middle of
/// a line never splits it in two.
#[derive(Debug)]
pub struct LineCodec {
    /// Buffer for accumulating incoming data.
    buffer: BytesMut,
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl LineCodec {
    /// Create a new line codec.
    pub fn new() -> Self {
        LineCodec {
            buffer: BytesMut::with_capacity(MAX_LINE_LENGTH),
        }
    }

    /// Add received data to the buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode a complete line from the buffer.
    ///
    /// The returned line includes its `\n` (and any `\r` before it). Invalid
    /// UTF-8 is replaced rather than rejected; the shell is ASCII in practice.
    pub fn decode_line(&mut self) -> Option<String> {
        let end = match self.buffer.iter().position(|&b| b == b'\n') {
            Some(pos) => pos + 1,
            None if self.buffer.len() > MAX_LINE_LENGTH => {
                log::warn!(
                    "line exceeds {} bytes without terminator, splitting",
                    MAX_LINE_LENGTH
                );
                self.split_point()
            }
            None => return None,
        };

        let line_data = self.buffer.split_to(end);
        Some(String::from_utf8_lossy(&line_data).into_owned())
    }

    /// Encode a command for transmission.
    ///
    /// Appends the `\r\n` terminator.
    pub fn encode_command(cmd: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(cmd.len() + COMMAND_TERMINATOR.len());
        buf.extend_from_slice(cmd.as_bytes());
        buf.extend_from_slice(COMMAND_TERMINATOR.as_bytes());
        buf
    }

    /// Get the number of buffered bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Where to force-split an overlong line: [`MAX_LINE_LENGTH`], moved back
    /// so a multi-byte UTF-8 character stays whole.
    fn split_point(&self) -> usize {
        let mut end = MAX_LINE_LENGTH;
        while end > 0 && self.buffer[end] & 0xC0 == 0x80 {
            end -= 1;
        }
        if end == 0 {
            MAX_LINE_LENGTH
        } else {
            end
        }
    }
}
