//! Chunked upload of multi-line parameters.
//!
//! The shell cannot take a raw newline inside `param_chunk`, so a parameter
//! goes over as:
//!
//! ```text
//! ffs_provision param_begin <L>
//! ffs_provision param_chunk "<≤32 bytes>"    (per chunk of each line)
//! ffs_provision param_newline                (between lines)
//! <final command>                            (e.g. device_info_set dsn)
//! ```
//!
//! The running byte count is the only consistency signal on the host side.
//! The device never echoes its own count back, so a chunk that is reported
//! as accepted but was mangled on the wire goes unnoticed.

use std::io::Write;
use std::time::Duration;

use ffs_cli_protocol::{chunk_line, param_length, param_lines, Command};
use tracing::{debug, warn};

use crate::error::Result;
use crate::executor::CommandExecutor;
use crate::telemetry::metric_defs;
use crate::transport::LineSource;

/// Bookkeeping for one parameter upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    /// Length announced with `param_begin`.
    pub declared_len: usize,
    /// Bytes accounted for by accepted chunks and newlines.
    pub written: usize,
    /// Commands issued, including `param_begin` and the final command.
    pub commands: usize,
    /// Whether the final command succeeded.
    pub committed: bool,
    /// The command that aborted the upload, if any.
    pub failed_at: Option<Command>,
}

impl UploadReport {
    fn new(declared_len: usize) -> Self {
        UploadReport {
            declared_len,
            written: 0,
            commands: 0,
            committed: false,
            failed_at: None,
        }
    }
}

impl<R: LineSource, W: Write> CommandExecutor<R, W> {
    /// Upload `param` and commit it with `final_command`.
    ///
    /// Returns whether the final command succeeded. Any failing step before
    /// it aborts the upload and returns `false`.
    pub fn execute_set(&mut self, final_command: &Command, param: &str, timeout: Duration) -> Result<bool> {
        Ok(self.upload_param(final_command, param, timeout)?.committed)
    }

    /// Upload `param` and commit it with `final_command`, returning the
    /// full bookkeeping.
    pub fn upload_param(&mut self, final_command: &Command, param: &str, timeout: Duration) -> Result<UploadReport> {
        let mut report = UploadReport::new(param_length(param));

        let begin = Command::ParamBegin {
            len: report.declared_len,
        };
        if !self.upload_step(&begin, timeout, &mut report)? {
            return Ok(report);
        }

        for line in param_lines(param) {
            for chunk in chunk_line(line) {
                let command = match Command::param_chunk(chunk) {
                    Ok(command) => command,
                    Err(e) => {
                        warn!("Cannot send chunk before '{}': {}", final_command, e);
                        return Ok(report);
                    }
                };
                if !self.upload_step(&command, timeout, &mut report)? {
                    return Ok(report);
                }
                report.written += chunk.len();
            }

            if report.written < report.declared_len {
                if !self.upload_step(&Command::ParamNewline, timeout, &mut report)? {
                    return Ok(report);
                }
                report.written += 1;
            }
        }

        metrics::counter!(metric_defs::PARAM_BYTES.name).increment(report.written as u64);

        if report.written != report.declared_len {
            // Only reachable if chunking and length disagree on line splitting.
            warn!(
                "Uploaded {} bytes but declared {} before '{}'",
                report.written, report.declared_len, final_command
            );
        }

        report.committed = self.upload_step(final_command, timeout, &mut report)?;
        debug!(
            "Parameter upload for '{}': {} of {} bytes in {} commands, committed={}",
            final_command, report.written, report.declared_len, report.commands, report.committed
        );

        Ok(report)
    }

    fn upload_step(&mut self, command: &Command, timeout: Duration, report: &mut UploadReport) -> Result<bool> {
        report.commands += 1;
        let ok = self.execute(command, timeout)?.is_success();
        if !ok {
            report.failed_at = Some(command.clone());
        }
        Ok(ok)
    }
}
