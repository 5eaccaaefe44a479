//! FFS Provisioning CLI Protocol
//!
//! This crate provides the wire vocabulary for provisioning Frustration-Free
//! Setup (FFS) devices over their UART shell. The firmware exposes an
//! `ffs_provision` command family on a plain line-based text interface.
//!
//! # Protocol Overview
//!
//! - **Commands** (host → firmware): text lines terminated with `\r\n`
//! - **Status** (firmware → host): every `ffs_provision` command ends with a
//!   line containing `ffs_provision command success` or
//!   `ffs_provision command fail`. Unknown commands produce
//!   `Command not recognized.`
//! - **Echo**: the shell echoes input, so status matching is done on
//!   substrings rather than whole lines
//!
//! # Parameter Upload
//!
//! Multi-line values (serial numbers, public keys, certificate chains) cannot
//! be sent in one line. They are declared with `param_begin <len>`, streamed
//! as quoted chunks of at most [`PARAM_CHUNK_LEN`] bytes, with line breaks
//! re-inserted by `param_newline`, and committed by a finalizing command such
//! as `device_info_set dsn`.
//!
//! # Example
//!
//! ```rust
//! use ffs_cli_protocol::{Command, CommandStatus, DeviceInfoField};
//!
//! let cmd = Command::DeviceInfoSet { field: DeviceInfoField::Dsn };
//! assert_eq!(cmd.encode(), b"ffs_provision device_info_set dsn\r\n");
//!
//! let status = CommandStatus::classify("ffs_provision command success\r\n");
//! assert_eq!(status, Some(CommandStatus::Success));
//! ```

mod codec;
mod commands;
mod error;
mod param;
mod pem;
mod responses;

pub use codec::*;
pub use commands::*;
pub use error::*;
pub use param::*;
pub use pem::*;
pub use responses::*;
