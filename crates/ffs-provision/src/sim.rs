//! Simulated device shell.
//!
//! [`SimulatedDevice`] plays the firmware side of the `ffs_provision` command
//! family over an in-memory channel pair, so sessions can be driven without
//! hardware. Commands are handled as soon as their line is complete on the
//! write half; output lines are queued with the time they become readable.
//!
//! The simulated firmware keeps the same bookkeeping as the real one: a
//! parameter buffer sized by `param_begin`, chunk writes that may not
//! overflow it, and finalizers that only accept a completely written buffer.

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use ffs_cli_protocol::{
    Command, DeviceInfoField, DhaField, LineCodec, PemKind, SHELL_PROMPT, STATUS_FAIL, STATUS_SUCCESS,
};
use tracing::trace;

use crate::transport::{LineSource, Transport};

/// Poll interval of the simulated read half.
pub const SIM_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Transport connected to a [`SimulatedDevice`].
pub type SimTransport = Transport<SimLineReader, SimWriter>;

const UNRECOGNIZED_LINE: &str = "Command not recognized.  Enter 'help' to view a list of available commands.";

// Firmware status codes printed after a failing command.
const FAIL_EXECUTION: u32 = 1;
const FAIL_NOT_STARTED: u32 = 2;

const DEFAULT_CSR_BODY: &[&str] = &[
    "MIIBDzCBtgIBADBUMQswCQYDVQQGEwJVUzELMAkGA1UECAwCV0ExEDAOBgNVBAcM",
    "B1NlYXR0bGUxDzANBgNVBAoMBkFtYXpvbjEVMBMGA1UEAwwMRkZTLVJFRi1ERVZJ",
    "Q0UwWTATBgcqhkjOPQIBBggqhkjOPQMBBwNCAAQ7",
];

/// How the simulated firmware misbehaves.
#[derive(Debug, Clone)]
pub struct DeviceBehavior {
    /// Fail `start`.
    pub fail_start: bool,
    /// Fail `device_info_set` for these fields.
    pub fail_fields: Vec<DeviceInfoField>,
    /// Fail `dha_keygen`.
    pub fail_keygen: bool,
    /// Echo commands but never print a status line.
    pub silent: bool,
    /// Delay between receiving a command and printing its output.
    pub response_delay: Duration,
    /// Serve `dha_get_field` outside a start/stop bracket.
    pub open_reads: bool,
    /// Value printed by `serial_number`.
    pub serial: String,
}

impl Default for DeviceBehavior {
    fn default() -> Self {
        DeviceBehavior {
            fail_start: false,
            fail_fields: Vec::new(),
            fail_keygen: false,
            silent: false,
            response_delay: Duration::ZERO,
            open_reads: false,
            serial: "AQIDBAUGBwgJCgsMDQ4PEA==".to_string(),
        }
    }
}

/// The parameter buffer opened by `param_begin`.
#[derive(Debug, Clone, Default)]
struct ParamBuffer {
    size: usize,
    data: String,
}

#[derive(Debug, Default)]
struct DeviceState {
    behavior: DeviceBehavior,
    started: bool,
    param: Option<ParamBuffer>,
    device_info: HashMap<DeviceInfoField, String>,
    certificate: Option<String>,
    keys_generated: bool,
    received: Vec<Command>,
}

impl DeviceState {
    /// Handle one command and return the lines it prints.
    fn handle(&mut self, command: Command) -> Vec<String> {
        self.received.push(command.clone());

        let mut output = Vec::new();
        let result = self.execute(&command, &mut output);

        if self.behavior.silent {
            return Vec::new();
        }
        match result {
            Some(Ok(())) => output.push(STATUS_SUCCESS.to_string()),
            Some(Err(code)) => output.push(format!("{} execution: {}", STATUS_FAIL, code)),
            None => {}
        }
        output
    }

    /// Run `command`. `None` means the command prints no status line.
    fn execute(&mut self, command: &Command, output: &mut Vec<String>) -> Option<Result<(), u32>> {
        let needs_session = match command {
            Command::Start | Command::Stop | Command::SerialNumber | Command::Raw { .. } => false,
            Command::DhaGetField { .. } => !self.behavior.open_reads,
            _ => true,
        };
        if needs_session && !self.started {
            return Some(Err(FAIL_NOT_STARTED));
        }

        let result = match command {
            Command::Start => {
                if self.behavior.fail_start {
                    Err(FAIL_EXECUTION)
                } else {
                    self.started = true;
                    Ok(())
                }
            }
            Command::Stop => {
                self.started = false;
                self.param = None;
                Ok(())
            }
            Command::ParamBegin { len } => {
                self.param = Some(ParamBuffer {
                    size: *len,
                    data: String::new(),
                });
                Ok(())
            }
            Command::ParamChunk { chunk } => self.append_param(chunk),
            Command::ParamNewline => self.append_param("\n"),
            Command::DeviceInfoSet { field } => {
                if self.behavior.fail_fields.contains(field) {
                    self.param = None;
                    Err(FAIL_EXECUTION)
                } else {
                    self.take_param().map(|value| {
                        self.device_info.insert(*field, value);
                    })
                }
            }
            Command::DhaCertSet => self.take_param().map(|cert| {
                self.certificate = Some(cert);
            }),
            Command::DhaKeygen => {
                if self.behavior.fail_keygen {
                    Err(FAIL_EXECUTION)
                } else {
                    self.keys_generated = true;
                    Ok(())
                }
            }
            Command::DhaGetField { field } => match self.dha_field(*field) {
                Some(text) => {
                    output.extend(text.lines().map(str::to_string));
                    Ok(())
                }
                None => Err(FAIL_EXECUTION),
            },
            Command::SerialNumber => {
                output.push(format!("{}{}", SHELL_PROMPT, self.behavior.serial));
                return None;
            }
            Command::Raw { .. } => {
                output.push(UNRECOGNIZED_LINE.to_string());
                return None;
            }
        };
        Some(result)
    }

    fn append_param(&mut self, text: &str) -> Result<(), u32> {
        let fits = match self.param.as_mut() {
            Some(param) if param.data.len() + text.len() <= param.size => {
                param.data.push_str(text);
                true
            }
            _ => false,
        };
        if fits {
            Ok(())
        } else {
            self.param = None;
            Err(FAIL_EXECUTION)
        }
    }

    /// Take the parameter buffer if it was written completely.
    fn take_param(&mut self) -> Result<String, u32> {
        match self.param.take() {
            Some(param) if param.data.len() == param.size => Ok(param.data),
            _ => Err(FAIL_EXECUTION),
        }
    }

    fn dha_field(&self, field: DhaField) -> Option<String> {
        match field {
            DhaField::Csr if self.keys_generated => {
                let kind = PemKind::CertificateRequest;
                let mut text = String::new();
                text.push_str(kind.begin_marker());
                for line in DEFAULT_CSR_BODY {
                    text.push('\n');
                    text.push_str(line);
                }
                text.push('\n');
                text.push_str(kind.end_marker());
                Some(text)
            }
            DhaField::Csr => None,
            DhaField::CrtChain => self.certificate.clone(),
        }
    }
}

/// A simulated device that transports can be connected to.
///
/// The handle stays usable after the transport is handed to a session, for
/// inspecting what the device received.
#[derive(Debug, Clone, Default)]
pub struct SimulatedDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl SimulatedDevice {
    /// Create a device with the given behavior.
    pub fn new(behavior: DeviceBehavior) -> Self {
        SimulatedDevice {
            state: Arc::new(Mutex::new(DeviceState {
                behavior,
                ..DeviceState::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a new connection to the device.
    pub fn connect(&self) -> SimTransport {
        let (tx, rx) = crossbeam_channel::unbounded();
        let reader = SimLineReader {
            rx,
            pending: None,
            poll: SIM_POLL_INTERVAL,
        };
        let writer = SimWriter {
            state: Arc::clone(&self.state),
            tx,
            codec: LineCodec::new(),
        };
        Transport::new(reader, writer)
    }

    /// Change the behavior of the device.
    pub fn set_behavior(&self, behavior: DeviceBehavior) {
        self.lock().behavior = behavior;
    }

    /// Every command received so far, in order.
    pub fn received(&self) -> Vec<Command> {
        self.lock().received.clone()
    }

    /// Whether a session is open.
    pub fn is_started(&self) -> bool {
        self.lock().started
    }

    /// The committed value of a device info field.
    pub fn device_info(&self, field: DeviceInfoField) -> Option<String> {
        self.lock().device_info.get(&field).cloned()
    }

    /// The committed certificate chain.
    pub fn certificate(&self) -> Option<String> {
        self.lock().certificate.clone()
    }

    /// Install a certificate chain directly.
    pub fn set_certificate(&self, cert: impl Into<String>) {
        self.lock().certificate = Some(cert.into());
    }
}

/// Read half of a simulated connection.
pub struct SimLineReader {
    rx: Receiver<(Instant, String)>,
    pending: Option<(Instant, String)>,
    poll: Duration,
}

impl LineSource for SimLineReader {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        let (ready_at, line) = match self.pending.take() {
            Some(pending) => pending,
            None => match self.rx.recv_timeout(self.poll) {
                Ok(next) => next,
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, "simulated device disconnected"))
                }
            },
        };

        let wait = ready_at.saturating_duration_since(Instant::now());
        if wait > self.poll {
            thread::sleep(self.poll);
            self.pending = Some((ready_at, line));
            return Ok(None);
        }
        thread::sleep(wait);
        Ok(Some(line))
    }
}

/// Write half of a simulated connection.
pub struct SimWriter {
    state: Arc<Mutex<DeviceState>>,
    tx: Sender<(Instant, String)>,
    codec: LineCodec,
}

impl SimWriter {
    fn emit(&self, at: Instant, line: &str) -> io::Result<()> {
        self.tx
            .send((at, format!("{}\r\n", line)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "simulated reader closed"))
    }
}

impl Write for SimWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.codec.push(buf);

        while let Some(line) = self.codec.decode_line() {
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                continue;
            }
            trace!("sim >> {}", line);

            let (output, delay) = {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                let output = state.handle(Command::parse(line));
                (output, state.behavior.response_delay)
            };

            let now = Instant::now();
            self.emit(now, line)?;
            for out in &output {
                self.emit(now + delay, out)?;
            }
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
