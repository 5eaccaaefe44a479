//! Commands that can be sent to the provisioning shell.
//!
//! The `ffs_provision` family covers:
//! - Session bracketing (`start`, `stop`)
//! - Parameter upload (`param_begin`, `param_chunk`, `param_newline`)
//! - Finalizers that commit an uploaded parameter (`device_info_set`, `dha_cert_set`)
//! - Device HSM/authentication actions (`dha_keygen`, `dha_get_field`)
//!
//! The plain shell command `serial_number` is included for reading the kit
//! serial before a provisioning JSON is generated.

use std::fmt;

use crate::codec::LineCodec;
use crate::error::{CliError, CliResult};
use crate::param::PARAM_CHUNK_LEN;

/// Prefix shared by every provisioning command.
pub const COMMAND_PREFIX: &str = "ffs_provision";

/// Device info fields committed by `device_info_set <field>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceInfoField {
    /// Device serial number (`dsn`)
    Dsn,
    /// Device type (`type`)
    Type,
    /// FFS product ID (`ffs_pid`)
    FfsPid,
    /// FFS PIN (`ffs_pin`)
    FfsPin,
    /// Bluetooth advertised name (`bt_name`)
    BtName,
    /// Device signing service public key (`dss_pub_key`)
    DssPubKey,
    /// Client ID (`client_id`)
    ClientId,
}

impl DeviceInfoField {
    /// All fields, in the order they are provisioned.
    pub const ALL: [DeviceInfoField; 7] = [
        DeviceInfoField::Dsn,
        DeviceInfoField::Type,
        DeviceInfoField::FfsPid,
        DeviceInfoField::FfsPin,
        DeviceInfoField::BtName,
        DeviceInfoField::DssPubKey,
        DeviceInfoField::ClientId,
    ];

    /// Get the field name used in commands.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceInfoField::Dsn => "dsn",
            DeviceInfoField::Type => "type",
            DeviceInfoField::FfsPid => "ffs_pid",
            DeviceInfoField::FfsPin => "ffs_pin",
            DeviceInfoField::BtName => "bt_name",
            DeviceInfoField::DssPubKey => "dss_pub_key",
            DeviceInfoField::ClientId => "client_id",
        }
    }

    /// Parse a field from its command name.
    pub fn from_name(s: &str) -> Option<DeviceInfoField> {
        DeviceInfoField::ALL.into_iter().find(|f| f.as_str() == s)
    }
}

impl fmt::Display for DeviceInfoField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields readable with `dha_get_field`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DhaField {
    /// Certificate signing request (`csr`)
    Csr,
    /// Installed certificate chain (`crt_chain`)
    CrtChain,
}

impl DhaField {
    /// Get the field name used in commands.
    pub fn as_str(&self) -> &'static str {
        match self {
            DhaField::Csr => "csr",
            DhaField::CrtChain => "crt_chain",
        }
    }

    /// Parse a field from its command name.
    pub fn from_name(s: &str) -> Option<DhaField> {
        match s {
            "csr" => Some(DhaField::Csr),
            "crt_chain" => Some(DhaField::CrtChain),
            _ => None,
        }
    }
}

/// Commands that can be sent to the provisioning shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    // ========== Session ==========
    /// Open a provisioning session.
    Start,

    /// Close a provisioning session.
    Stop,

    // ========== Parameter Upload ==========
    /// Declare the byte length of the parameter about to be uploaded.
    ParamBegin {
        /// Protocol length of the whole parameter.
        len: usize,
    },

    /// Upload one chunk of the current parameter line.
    ParamChunk {
        /// Chunk text, at most [`PARAM_CHUNK_LEN`] bytes.
        chunk: String,
    },

    /// Insert a line separator into the uploaded parameter.
    ParamNewline,

    // ========== Finalizers ==========
    /// Commit the uploaded parameter as a device info field.
    DeviceInfoSet {
        /// The field to commit.
        field: DeviceInfoField,
    },

    /// Commit the uploaded parameter as the certificate chain.
    DhaCertSet,

    // ========== DHA ==========
    /// Generate the device key pair.
    DhaKeygen,

    /// Request a DHA field.
    DhaGetField {
        /// The field to request.
        field: DhaField,
    },

    // ========== Shell ==========
    /// Print the kit serial number (not an `ffs_provision` command).
    SerialNumber,

    /// Send a raw command string.
    Raw {
        /// The raw command text.
        command: String,
    },
}

impl Command {
    /// Build a `param_chunk` command, checking the chunk fits in one upload.
    pub fn param_chunk(chunk: &str) -> CliResult<Command> {
        if chunk.len() > PARAM_CHUNK_LEN {
            return Err(CliError::InvalidChunk(format!(
                "{} bytes exceeds the {} byte limit",
                chunk.len(),
                PARAM_CHUNK_LEN
            )));
        }
        if chunk.contains(['\r', '\n']) {
            return Err(CliError::InvalidChunk(
                "line breaks must be sent as param_newline".to_string(),
            ));
        }
        Ok(Command::ParamChunk {
            chunk: chunk.to_string(),
        })
    }

    /// Encode the command as a line to send to the firmware.
    /// Returns the bytes to send (including the `\r\n` terminator).
    pub fn encode(&self) -> Vec<u8> {
        LineCodec::encode_command(&self.to_command_string())
    }

    /// Get the command string without the terminator.
    pub fn to_command_string(&self) -> String {
        match self {
            Command::Start => format!("{} start", COMMAND_PREFIX),
            Command::Stop => format!("{} stop", COMMAND_PREFIX),

            Command::ParamBegin { len } => format!("{} param_begin {}", COMMAND_PREFIX, len),
            Command::ParamChunk { chunk } => format!("{} param_chunk \"{}\"", COMMAND_PREFIX, chunk),
            Command::ParamNewline => format!("{} param_newline", COMMAND_PREFIX),

            Command::DeviceInfoSet { field } => {
                format!("{} device_info_set {}", COMMAND_PREFIX, field.as_str())
            }
            Command::DhaCertSet => format!("{} dha_cert_set", COMMAND_PREFIX),

            Command::DhaKeygen => format!("{} dha_keygen", COMMAND_PREFIX),
            Command::DhaGetField { field } => {
                format!("{} dha_get_field {}", COMMAND_PREFIX, field.as_str())
            }

            Command::SerialNumber => "serial_number".to_string(),
            Command::Raw { command } => command.clone(),
        }
    }

    /// Parse a received command line (as the firmware sees it).
    ///
    /// Trailing `\r\n` is ignored. Lines that are not recognized come back as
    /// [`Command::Raw`].
    pub fn parse(line: &str) -> Command {
        let line = line.trim_end_matches(['\r', '\n']);
        let raw = || Command::Raw {
            command: line.to_string(),
        };

        if line == "serial_number" {
            return Command::SerialNumber;
        }

        let Some(rest) = line
            .strip_prefix(COMMAND_PREFIX)
            .and_then(|r| r.strip_prefix(' '))
        else {
            return raw();
        };

        let (verb, arg) = match rest.split_once(' ') {
            Some((verb, arg)) => (verb, Some(arg)),
            None => (rest, None),
        };

        match (verb, arg) {
            ("start", None) => Command::Start,
            ("stop", None) => Command::Stop,
            ("param_begin", Some(n)) => match n.parse() {
                Ok(len) => Command::ParamBegin { len },
                Err(_) => raw(),
            },
            ("param_chunk", Some(quoted)) => {
                match quoted.strip_prefix('"').and_then(|q| q.strip_suffix('"')) {
                    Some(chunk) => Command::ParamChunk {
                        chunk: chunk.to_string(),
                    },
                    None => raw(),
                }
            }
            ("param_newline", None) => Command::ParamNewline,
            ("device_info_set", Some(name)) => match DeviceInfoField::from_name(name) {
                Some(field) => Command::DeviceInfoSet { field },
                None => raw(),
            },
            ("dha_cert_set", None) => Command::DhaCertSet,
            ("dha_keygen", None) => Command::DhaKeygen,
            ("dha_get_field", Some(name)) => match DhaField::from_name(name) {
                Some(field) => Command::DhaGetField { field },
                None => raw(),
            },
            _ => raw(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_command_string())
    }
}
