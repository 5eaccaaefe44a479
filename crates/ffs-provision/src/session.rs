//! User-facing provisioning operations.
//!
//! Each operation that changes device state is bracketed by
//! `ffs_provision start` and `ffs_provision stop`. Once `start` succeeded,
//! `stop` is always sent, whatever happened in between.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use ffs_cli_protocol::{parse_serial_line, Command, DhaField, PemKind};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::device_info::DeviceInfo;
use crate::error::{ProvisionError, Result};
use crate::executor::CommandExecutor;
use crate::reader::BlockRead;
use crate::transport::{LineSource, Transport};

/// File written by [`ProvisioningSession::save_csr`].
pub const CSR_FILE_NAME: &str = "csr.pem";

/// File written by [`ProvisioningSession::save_cert`].
pub const CERT_FILE_NAME: &str = "cert.pem";

/// Where an operation is in its start/stop bracket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No bracket open.
    Idle,
    /// `start` succeeded.
    Started,
    /// `stop` was sent.
    Stopped,
}

/// Provisioning operations against one device.
pub struct ProvisioningSession<R, W> {
    executor: CommandExecutor<R, W>,
    config: SessionConfig,
    state: SessionState,
}

impl<R: LineSource, W: Write> ProvisioningSession<R, W> {
    /// Create a session over `transport`.
    pub fn new(transport: Transport<R, W>, config: SessionConfig) -> Self {
        ProvisioningSession {
            executor: CommandExecutor::new(transport, config.write_mode),
            config,
            state: SessionState::Idle,
        }
    }

    /// Get the bracket state of the last operation.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Borrow the command executor.
    pub fn executor(&self) -> &CommandExecutor<R, W> {
        &self.executor
    }

    /// Give the transport back.
    pub fn into_transport(self) -> Transport<R, W> {
        self.executor.into_transport()
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!("Session {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    /// Send `start`. Returns whether the device accepted it.
    pub fn start(&mut self) -> Result<bool> {
        self.set_state(SessionState::Idle);
        let ok = self
            .executor
            .execute(&Command::Start, self.config.command_timeout())?
            .is_success();
        if ok {
            self.set_state(SessionState::Started);
        }
        Ok(ok)
    }

    /// Send `stop`. Returns whether the device accepted it.
    pub fn stop(&mut self) -> Result<bool> {
        let status = self.executor.execute(&Command::Stop, self.config.command_timeout())?;
        self.set_state(SessionState::Stopped);
        Ok(status.is_success())
    }

    /// Run `body` inside a start/stop bracket.
    ///
    /// Returns `None` if `start` failed, in which case nothing else was sent.
    /// Otherwise returns the body's result and whether `stop` succeeded.
    fn bracket<T>(&mut self, body: impl FnOnce(&mut Self) -> Result<T>) -> Result<Option<(T, bool)>> {
        if !self.start()? {
            return Ok(None);
        }
        let result = body(self)?;
        let stopped = self.stop()?;
        Ok(Some((result, stopped)))
    }

    /// Write all seven device info fields.
    ///
    /// Every field is uploaded even when an earlier one fails. The result is
    /// true only if `start`, all fields and `stop` succeeded.
    pub fn set_device_info(&mut self, info: &DeviceInfo) -> Result<bool> {
        info!(">>>>>>>>>>>>>>> Provisioning Device Info Start");

        let timeout = self.config.command_timeout();
        let outcome = self.bracket(|session| {
            let mut all_ok = true;
            for (field, value) in info.fields() {
                let ok = session
                    .executor
                    .execute_set(&Command::DeviceInfoSet { field }, value, timeout)?;
                if !ok {
                    warn!("Setting {} failed", field);
                }
                all_ok &= ok;
            }
            Ok(all_ok)
        })?;

        let completed = matches!(outcome, Some((true, true)));
        if completed {
            info!(">>>>>>>>>>>>>>> Provisioning Device Info Succeed");
        } else {
            info!(">>>>>>>>>>>>>>> Provisioning Device Info Failed <<<<<<<<<<<<<<<");
        }
        Ok(completed)
    }

    /// Generate the device key pair and read its certificate signing request.
    ///
    /// A failed key generation skips the CSR request. The result of `stop`
    /// does not affect the outcome.
    pub fn get_csr(&mut self) -> Result<BlockRead> {
        let keygen_timeout = self.config.keygen_timeout();
        let csr_timeout = self.config.csr_timeout();

        let outcome = self.bracket(|session| {
            if !session.executor.execute(&Command::DhaKeygen, keygen_timeout)?.is_success() {
                return Ok(BlockRead::default());
            }

            let command = Command::DhaGetField { field: DhaField::Csr };
            let block = session
                .executor
                .request_block(&command, PemKind::CertificateRequest, csr_timeout)?;
            info!("[{}] {}\n{}", block.success, command, block.text);
            Ok(block)
        })?;

        Ok(outcome.map(|(block, _)| block).unwrap_or_default())
    }

    /// Read the certificate chain stored on the device.
    ///
    /// Sent outside a start/stop bracket, with no status read. Returns an
    /// empty string if the chain is not printed in time.
    pub fn get_cert(&mut self) -> Result<String> {
        let command = Command::DhaGetField {
            field: DhaField::CrtChain,
        };
        let cert = self.executor.request_delimited(
            &command,
            PemKind::Certificate,
            self.config.cert_read_timeout(),
        )?;
        Ok(cert.unwrap_or_default())
    }

    /// Upload a certificate chain. The result of `stop` does not affect the
    /// outcome.
    pub fn set_cert(&mut self, cert: &str) -> Result<bool> {
        info!(">>>>>>>>>>>>>>> Setting Certificate Chain Start");

        let timeout = self.config.cert_set_timeout();
        let outcome = self.bracket(|session| session.executor.execute_set(&Command::DhaCertSet, cert, timeout))?;

        let ok = matches!(outcome, Some((true, _)));
        if ok {
            info!(">>>>>>>>>>>>>>> Setting Certificate Chain Succeed");
        } else {
            info!(">>>>>>>>>>>>>>> Setting Certificate Chain Failed <<<<<<<<<<<<<<<");
        }
        Ok(ok)
    }

    /// Read a certificate chain from `path` and upload it.
    pub fn set_cert_from_file(&mut self, path: &Path) -> Result<bool> {
        let cert = fs::read_to_string(path).map_err(|source| ProvisionError::File {
            path: path.to_path_buf(),
            source,
        })?;
        self.set_cert(&cert)
    }

    /// Fetch the CSR and write it to `csr.pem` in `dir`.
    ///
    /// Returns the written path, or `None` if the CSR could not be read.
    pub fn save_csr(&mut self, dir: &Path) -> Result<Option<PathBuf>> {
        info!(">>>>>>>>>>>>>>> Generating CSR Start");

        let block = self.get_csr()?;
        if !block.success {
            info!(">>>>>>>>>>>>>>> Generating CSR Failed <<<<<<<<<<<<<<<");
            return Ok(None);
        }

        let path = write_file(dir, CSR_FILE_NAME, &block.text)?;
        info!(">>>>>>>>>>>>>>> Generating CSR Succeed: ({} created)", CSR_FILE_NAME);
        Ok(Some(path))
    }

    /// Fetch the certificate chain and write it to `cert.pem` in `dir`.
    ///
    /// The file is written even when the chain came back empty.
    pub fn save_cert(&mut self, dir: &Path) -> Result<PathBuf> {
        let cert = self.get_cert()?;
        if cert.is_empty() {
            warn!("No certificate chain received");
        }
        let path = write_file(dir, CERT_FILE_NAME, &cert)?;
        info!("{} created", CERT_FILE_NAME);
        Ok(path)
    }

    /// Ask the shell for the kit serial number.
    ///
    /// Returns `None` if no `SHELL>> <serial>` line arrives within `timeout`.
    pub fn read_serial_number(&mut self, timeout: Duration) -> Result<Option<String>> {
        let echo = Command::SerialNumber.to_command_string();
        self.executor.send_with_watcher(&Command::SerialNumber, move |source| {
            let start = Instant::now();
            loop {
                // The echo may carry the prompt too.
                match source.read_line()?.and_then(|l| parse_serial_line(&l).ok()) {
                    Some(serial) if serial != echo => return Ok(Some(serial)),
                    _ => {}
                }
                if start.elapsed() >= timeout {
                    warn!("Read serial number TIMEOUT after {:?}", timeout);
                    return Ok(None);
                }
            }
        })
    }
}

fn write_file(dir: &Path, name: &str, contents: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    fs::write(&path, contents).map_err(|source| ProvisionError::File {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}
