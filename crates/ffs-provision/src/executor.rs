//! Command execution with bounded-time status classification.
//!
//! Every command is written while a watcher thread is already reading the
//! device output. The watcher borrows the read half of the transport inside a
//! [`std::thread::scope`], signals readiness over a rendezvous channel, and is
//! joined before the call returns, so no reader outlives the command it
//! belongs to.

use std::io::{self, Write};
use std::thread;
use std::time::{Duration, Instant};

use ffs_cli_protocol::{Command, CommandStatus};
use tracing::{debug, trace, warn};

use crate::config::WriteMode;
use crate::error::{ProvisionError, Result};
use crate::telemetry::metric_defs;
use crate::transport::{LineSource, Transport};

/// Sends commands and classifies the device's terminal response.
pub struct CommandExecutor<R, W> {
    transport: Transport<R, W>,
    write_mode: WriteMode,

    // Statistics
    commands_sent: u32,
    commands_succeeded: u32,
    commands_failed: u32,
}

impl<R: LineSource, W: Write> CommandExecutor<R, W> {
    /// Create an executor that owns `transport`.
    pub fn new(transport: Transport<R, W>, write_mode: WriteMode) -> Self {
        CommandExecutor {
            transport,
            write_mode,
            commands_sent: 0,
            commands_succeeded: 0,
            commands_failed: 0,
        }
    }

    /// Get the number of commands sent.
    pub fn commands_sent(&self) -> u32 {
        self.commands_sent
    }

    /// Get the number of commands that ended in success.
    pub fn commands_succeeded(&self) -> u32 {
        self.commands_succeeded
    }

    /// Get the number of commands that failed, were not recognized or timed out.
    pub fn commands_failed(&self) -> u32 {
        self.commands_failed
    }

    /// Give the transport back, e.g. to close it explicitly.
    pub fn into_transport(self) -> Transport<R, W> {
        self.transport
    }

    /// Execute one command and wait up to `timeout` for its status.
    ///
    /// Fail, unrecognized and timeout outcomes are returned as statuses; only
    /// transport failures are errors. No retries.
    pub fn execute(&mut self, command: &Command, timeout: Duration) -> Result<CommandStatus> {
        let started = Instant::now();
        let status = self.send_with_watcher(command, |source| read_status(source, timeout))?;

        self.commands_sent += 1;
        if status.is_success() {
            self.commands_succeeded += 1;
            debug!("[{}] {}", status, command);
        } else {
            self.commands_failed += 1;
            warn!("[{}] {}", status, command);
        }

        metrics::counter!(metric_defs::COMMANDS.name, "status" => status.as_str()).increment(1);
        metrics::histogram!(metric_defs::COMMAND_LATENCY.name).record(started.elapsed().as_secs_f64());

        Ok(status)
    }

    /// Write `command` while `watcher` reads the device output.
    ///
    /// The watcher is started first and the write waits for its readiness
    /// signal. The watcher is always joined, even when the write fails; a
    /// write error takes precedence over the watcher's result.
    pub fn send_with_watcher<T, F>(&mut self, command: &Command, watcher: F) -> Result<T>
    where
        T: Send,
        F: FnOnce(&mut R) -> io::Result<T> + Send,
    {
        let bytes = command.encode();
        let write_mode = self.write_mode;
        let (reader, writer) = self.transport.split();

        trace!("Sending '{}' ({} bytes)", command, bytes.len());

        thread::scope(|scope| {
            let (ready_tx, ready_rx) = crossbeam_channel::bounded::<()>(0);

            let handle = scope.spawn(move || {
                // The receiver only disappears if the writer side is gone.
                let _ = ready_tx.send(());
                watcher(reader)
            });

            // A closed channel means the watcher already exited.
            let _ = ready_rx.recv();

            let write_result = write_command(writer, &bytes, write_mode);
            let watch_result = handle.join().map_err(|_| ProvisionError::WatcherPanicked)?;

            write_result?;
            Ok(watch_result?)
        })
    }
}

/// Write one encoded command according to `mode`.
fn write_command<W: Write + ?Sized>(writer: &mut W, bytes: &[u8], mode: WriteMode) -> io::Result<()> {
    match mode.byte_delay() {
        None => writer.write_all(bytes)?,
        Some(delay) => {
            for byte in bytes {
                writer.write_all(std::slice::from_ref(byte))?;
                writer.flush()?;
                thread::sleep(delay);
            }
        }
    }
    writer.flush()
}

/// Read lines until a terminal status line or until `timeout` has elapsed.
///
/// The source is polled at least once, and the line returned by the poll
/// that crosses the deadline is still classified. The call may therefore
/// overrun `timeout` by one poll interval.
pub fn read_status<S: LineSource + ?Sized>(source: &mut S, timeout: Duration) -> io::Result<CommandStatus> {
    let start = Instant::now();

    loop {
        if let Some(line) = source.read_line()? {
            trace!("<< {}", line.trim_end());
            if let Some(status) = CommandStatus::classify(&line) {
                return Ok(status);
            }
        }

        if start.elapsed() >= timeout {
            warn!("Read result TIMEOUT after {:?}", timeout);
            return Ok(CommandStatus::Timeout);
        }
    }
}
