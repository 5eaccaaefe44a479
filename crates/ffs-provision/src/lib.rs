//! FFS device provisioning over the serial shell.
//!
//! This crate drives the `ffs_provision` command family of FFS-capable
//! firmware to write device identity, generate the device key pair, fetch its
//! certificate signing request and install the signed certificate chain.
//!
//! # Architecture
//!
//! - [`transport`]: line-oriented duplex channel (serial port or simulator)
//! - [`executor`]: one command, one bounded wait for its status line
//! - [`uploader`]: chunked upload of multi-line parameters
//! - [`reader`]: extraction of PEM blocks from the device output
//! - [`session`]: start/stop bracketed provisioning operations
//! - [`device_info`]: provisioning and metadata JSON files
//! - [`sim`]: simulated firmware for tests and dry runs
//!
//! # Example
//!
//! ```
//! use ffs_provision::sim::SimulatedDevice;
//! use ffs_provision::{ProvisioningSession, SessionConfig};
//!
//! let device = SimulatedDevice::default();
//! let mut session = ProvisioningSession::new(device.connect(), SessionConfig::default());
//!
//! let csr = session.get_csr().unwrap();
//! assert!(csr.success);
//! assert!(csr.text.starts_with("-----BEGIN CERTIFICATE REQUEST-----"));
//! ```

pub mod config;
pub mod device_info;
pub mod error;
pub mod executor;
pub mod reader;
pub mod session;
pub mod sim;
pub mod telemetry;
pub mod transport;
pub mod uploader;

pub use config::{SerialConfig, SessionConfig, WriteMode};
pub use device_info::DeviceInfo;
pub use error::{ProvisionError, Result};
pub use executor::CommandExecutor;
pub use reader::BlockRead;
pub use session::{ProvisioningSession, SessionState};
pub use transport::{LineSource, SerialTransport, Transport};
pub use uploader::UploadReport;
