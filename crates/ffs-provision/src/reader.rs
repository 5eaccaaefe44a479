//! Extraction of PEM blocks from the device output.
//!
//! `dha_get_field` prints the requested object between BEGIN/END marker
//! lines, followed by the usual status line. A block read runs under one
//! deadline that starts with the read and is not reset when the BEGIN marker
//! shows up.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use ffs_cli_protocol::{Command, CommandStatus, PemKind};
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::executor::{read_status, CommandExecutor};
use crate::telemetry::metric_defs;
use crate::transport::LineSource;

/// Result of a block read.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockRead {
    /// Whether the device reported success after printing the block.
    pub success: bool,
    /// The block from the BEGIN line through the END line, verbatim.
    /// Empty when the markers were not found in time.
    pub text: String,
}

impl BlockRead {
    fn missing() -> Self {
        BlockRead::default()
    }
}

/// Why the marker scan stopped.
enum Scan {
    Found(String),
    StatusLine,
    Deadline,
}

/// Scan for a complete block of `kind` until `timeout` after `start`.
///
/// The line returned by the poll that crosses the deadline is still scanned.
fn scan_block<S: LineSource + ?Sized>(source: &mut S, kind: PemKind, start: Instant, timeout: Duration) -> io::Result<Scan> {
    let mut text = String::new();
    let mut in_block = false;

    loop {
        if let Some(line) = source.read_line()? {
            trace!("<< {}", line.trim_end());

            if !in_block {
                if kind.is_begin(&line) {
                    in_block = true;
                    text.push_str(&line);
                } else if CommandStatus::is_provision_status(&line) {
                    return Ok(Scan::StatusLine);
                }
            } else {
                // Status lines cannot appear inside a block.
                if CommandStatus::is_provision_status(&line) {
                    return Ok(Scan::StatusLine);
                }
                text.push_str(&line);
                if kind.is_end(&line) {
                    return Ok(Scan::Found(text));
                }
            }
        }

        if start.elapsed() >= timeout {
            return Ok(Scan::Deadline);
        }
    }
}

/// Read a delimited block of `kind` without the trailing status read.
///
/// Returns `None` if a status line arrives first or the block is not
/// complete within `timeout`.
pub fn read_delimited<S: LineSource + ?Sized>(source: &mut S, kind: PemKind, timeout: Duration) -> io::Result<Option<String>> {
    let start = Instant::now();
    match scan_block(source, kind, start, timeout)? {
        Scan::Found(text) => Ok(Some(text)),
        Scan::StatusLine => {
            debug!("Status line before {} block completed", kind.as_str());
            Ok(None)
        }
        Scan::Deadline => {
            warn!("Read {} TIMEOUT after {:?}", kind.as_str(), timeout);
            Ok(None)
        }
    }
}

/// Read a block of `kind` and the status line that follows it.
///
/// The status read gets whatever remains of `timeout`. The returned success
/// is the device's status, not just marker presence.
pub fn read_block<S: LineSource + ?Sized>(source: &mut S, kind: PemKind, timeout: Duration) -> io::Result<BlockRead> {
    let start = Instant::now();

    let text = match scan_block(source, kind, start, timeout)? {
        Scan::Found(text) => text,
        Scan::StatusLine => {
            debug!("Status line before {} block completed", kind.as_str());
            record(kind, "missing");
            return Ok(BlockRead::missing());
        }
        Scan::Deadline => {
            warn!("Read {} TIMEOUT after {:?}", kind.as_str(), timeout);
            record(kind, "missing");
            return Ok(BlockRead::missing());
        }
    };

    let remaining = timeout.saturating_sub(start.elapsed());
    let status = read_status(source, remaining)?;
    record(kind, if status.is_success() { "ok" } else { "status_fail" });

    Ok(BlockRead {
        success: status.is_success(),
        text,
    })
}

fn record(kind: PemKind, outcome: &'static str) {
    metrics::counter!(metric_defs::PEM_BLOCKS.name, "kind" => kind.as_str(), "outcome" => outcome)
        .increment(1);
}

impl<R: LineSource, W: Write> CommandExecutor<R, W> {
    /// Send `command` and read the block of `kind` it prints, with status.
    pub fn request_block(&mut self, command: &Command, kind: PemKind, timeout: Duration) -> Result<BlockRead> {
        let block = self.send_with_watcher(command, |source| read_block(source, kind, timeout))?;
        debug!("[{}] {}", block.success, command);
        Ok(block)
    }

    /// Send `command` and read the block of `kind` it prints, ignoring status.
    pub fn request_delimited(&mut self, command: &Command, kind: PemKind, timeout: Duration) -> Result<Option<String>> {
        self.send_with_watcher(command, |source| read_delimited(source, kind, timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::thread;

    /// Replays lines, each after an optional delay; empty polls when drained.
    struct TimedScript(VecDeque<(Duration, &'static str)>);

    impl TimedScript {
        fn immediate(lines: &[&'static str]) -> Self {
            TimedScript(lines.iter().map(|l| (Duration::ZERO, *l)).collect())
        }
    }

    impl LineSource for TimedScript {
        fn read_line(&mut self) -> io::Result<Option<String>> {
            match self.0.pop_front() {
                Some((delay, line)) => {
                    thread::sleep(delay);
                    Ok(Some(line.to_string()))
                }
                None => {
                    thread::sleep(Duration::from_millis(5));
                    Ok(None)
                }
            }
        }
    }

    const CSR: &[&str] = &[
        "-----BEGIN CERTIFICATE REQUEST-----\r\n",
        "MIIBDzCBtgIBADBUMQswCQYDVQQGEwJVUzELMAkGA1UECAwCV0ExEDAOBgNVBAcM\r\n",
        "B1NlYXR0bGU=\r\n",
        "-----END CERTIFICATE REQUEST-----\r\n",
    ];

    #[test]
    fn test_read_block_success() {
        let mut lines = vec!["ffs_provision dha_get_field csr\r\n", "\r\n"];
        lines.extend_from_slice(CSR);
        lines.push("ffs_provision command success\r\n");
        let mut source = TimedScript::immediate(&lines);

        let block = read_block(&mut source, PemKind::CertificateRequest, Duration::from_secs(1)).unwrap();
        assert!(block.success);
        assert_eq!(block.text, CSR.concat());
    }

    #[test]
    fn test_read_block_reports_device_status() {
        let mut lines = CSR.to_vec();
        lines.push("ffs_provision command fail\r\n");
        let mut source = TimedScript::immediate(&lines);

        let block = read_block(&mut source, PemKind::CertificateRequest, Duration::from_secs(1)).unwrap();
        assert!(!block.success);
        assert_eq!(block.text, CSR.concat());
    }

    #[test]
    fn test_read_block_without_begin() {
        let mut source = TimedScript::immediate(&["noise\r\n"]);
        let block = read_block(&mut source, PemKind::CertificateRequest, Duration::from_millis(40)).unwrap();
        assert_eq!(block, BlockRead { success: false, text: String::new() });
    }

    #[test]
    fn test_read_block_status_before_begin() {
        let mut source = TimedScript::immediate(&["ffs_provision command fail\r\n"]);
        let started = Instant::now();
        let block = read_block(&mut source, PemKind::CertificateRequest, Duration::from_secs(5)).unwrap();
        assert_eq!(block, BlockRead::default());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_deadline_not_reset_at_begin() {
        // BEGIN at ~60 ms, the body line at ~120 ms: the scan would only go
        // on to END if the clock restarted at BEGIN.
        let mut source = TimedScript(VecDeque::from(vec![
            (Duration::from_millis(60), CSR[0]),
            (Duration::from_millis(60), CSR[1]),
            (Duration::ZERO, CSR[3]),
            (Duration::ZERO, "ffs_provision command success\r\n"),
        ]));

        let block = read_block(&mut source, PemKind::CertificateRequest, Duration::from_millis(100)).unwrap();
        assert!(!block.success);
        assert!(block.text.is_empty());
    }

    #[test]
    fn test_late_status_within_last_poll_counts() {
        // END lands at ~90 ms of a 100 ms budget; the status follows 20 ms
        // later, inside the poll that crosses the deadline.
        let mut source = TimedScript(VecDeque::from(vec![
            (Duration::ZERO, CSR[0]),
            (Duration::ZERO, CSR[1]),
            (Duration::ZERO, CSR[2]),
            (Duration::from_millis(90), CSR[3]),
            (Duration::from_millis(20), "ffs_provision command success\r\n"),
        ]));

        let block = read_block(&mut source, PemKind::CertificateRequest, Duration::from_millis(100)).unwrap();
        assert!(block.success);
        assert_eq!(block.text, CSR.concat());
    }

    #[test]
    fn test_certificate_scan_skips_request_block() {
        let lines = [
            "-----BEGIN CERTIFICATE REQUEST-----\n",
            "-----BEGIN CERTIFICATE-----\n",
            "MIIB\n",
            "-----END CERTIFICATE-----\n",
        ];
        let mut source = TimedScript::immediate(&lines);
        let text = read_delimited(&mut source, PemKind::Certificate, Duration::from_secs(1)).unwrap();
        assert_eq!(text.as_deref(), Some("-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n"));
    }

    #[test]
    fn test_read_delimited_times_out() {
        let mut source = TimedScript::immediate(&["-----BEGIN CERTIFICATE-----\n", "MIIB\n"]);
        let text = read_delimited(&mut source, PemKind::Certificate, Duration::from_millis(30)).unwrap();
        assert_eq!(text, None);
    }

    #[test]
    fn test_status_uses_remaining_budget() {
        // Block completes quickly; no status ever arrives.
        let mut source = TimedScript::immediate(CSR);
        let started = Instant::now();
        let block = read_block(&mut source, PemKind::CertificateRequest, Duration::from_millis(80)).unwrap();
        let elapsed = started.elapsed();

        assert!(!block.success);
        assert_eq!(block.text, CSR.concat());
        assert!(elapsed >= Duration::from_millis(80));
        assert!(elapsed < Duration::from_millis(500));
    }
}
