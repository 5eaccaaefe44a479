//! Device identity files.
//!
//! `provision.json` carries everything written by `set_device_info`.
//! It is generated from a per-product `metadata.json` plus the kit serial
//! number, which the kit reports in Base64 and the cloud expects as hex.

use std::fs;
use std::path::Path;

use ffs_cli_protocol::DeviceInfoField;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{ProvisionError, Result};

/// PIN sent to every device.
pub const DEFAULT_FFS_PIN: &str = "123ABC456";

/// Bluetooth name sent to every device.
pub const DEFAULT_BT_NAME: &str = "NXP_REF_DEV";

/// Metadata key holding the serial number.
pub const DEVICE_SERIAL_KEY: &str = "device_serial";

/// Keys every metadata file must provide.
pub const METADATA_KEYS: [&str; 4] = ["client_id", "device_type", "dss_pub_key", "ffs_pid"];

/// Contents of a provisioning JSON file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Device serial number (DSN), hex encoded.
    pub device_serial: String,
    /// Device type identifier.
    pub device_type: String,
    /// FFS product identifier.
    pub ffs_pid: String,
    /// Device setup service public key, one line.
    pub dss_pub_key: String,
    /// Cloud client identifier.
    pub client_id: String,
}

impl DeviceInfo {
    /// Parse a provisioning JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a provisioning JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ProvisionError::File {
            path: path.to_path_buf(),
            source,
        })?;
        let info = Self::from_json_str(&json)?;

        info!("device_serial = {}", info.device_serial);
        info!("device_type   = {}", info.device_type);
        info!("ffs_pid       = {}", info.ffs_pid);
        info!("dss_pub_key   = {}", info.dss_pub_key);
        info!("client_id     = {}", info.client_id);

        Ok(info)
    }

    /// Every device info field paired with its value, in upload order.
    pub fn fields(&self) -> [(DeviceInfoField, &str); 7] {
        [
            (DeviceInfoField::Dsn, self.device_serial.as_str()),
            (DeviceInfoField::Type, self.device_type.as_str()),
            (DeviceInfoField::FfsPid, self.ffs_pid.as_str()),
            (DeviceInfoField::FfsPin, DEFAULT_FFS_PIN),
            (DeviceInfoField::BtName, DEFAULT_BT_NAME),
            (DeviceInfoField::DssPubKey, self.dss_pub_key.as_str()),
            (DeviceInfoField::ClientId, self.client_id.as_str()),
        ]
    }
}

fn is_filled(value: Option<&Value>) -> bool {
    match value {
        Some(Value::String(s)) => !s.is_empty() && !(s.starts_with('<') && s.ends_with('>')),
        _ => false,
    }
}

/// Check product metadata.
///
/// Required entries that are absent, empty, not strings or still
/// `<PLACEHOLDER>` values are reported as missing. Any key other than the
/// required ones and `device_serial` is reported as extra.
pub fn check_metadata(metadata: &Map<String, Value>) -> Result<()> {
    let missing: Vec<String> = METADATA_KEYS
        .iter()
        .filter(|key| !is_filled(metadata.get(**key)))
        .map(|key| key.to_string())
        .collect();

    let extra: Vec<String> = metadata
        .keys()
        .filter(|key| key.as_str() != DEVICE_SERIAL_KEY && !METADATA_KEYS.contains(&key.as_str()))
        .cloned()
        .collect();

    if missing.is_empty() && extra.is_empty() {
        Ok(())
    } else {
        Err(ProvisionError::InvalidMetadata { missing, extra })
    }
}

/// Convert a Base64 kit serial (padding included) to lowercase hex.
pub fn serial_to_hex(serial: &str) -> Result<String> {
    if serial.is_empty() {
        return Err(ProvisionError::InvalidSerial {
            serial: String::new(),
            reason: "empty serial".to_string(),
        });
    }

    let bytes = data_encoding::BASE64
        .decode(serial.as_bytes())
        .map_err(|e| ProvisionError::InvalidSerial {
            serial: serial.to_string(),
            reason: e.to_string(),
        })?;

    Ok(hex::encode(bytes))
}

/// Merge checked `metadata` with the hex serial and render it as
/// provisioning JSON: four-space indent, keys sorted.
pub fn generate_provision_json(metadata: &Map<String, Value>, serial_hex: &str) -> Result<String> {
    check_metadata(metadata)?;

    let mut merged = metadata.clone();
    merged.insert(DEVICE_SERIAL_KEY.to_string(), Value::String(serial_hex.to_string()));
    let merged: std::collections::BTreeMap<_, _> = merged.into_iter().collect();

    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    merged.serialize(&mut ser)?;

    // serde_json only ever emits UTF-8.
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Read `metadata_path`, merge in the serial and write `output_path`.
///
/// `serial` is the Base64 kit serial as reported by the device.
pub fn write_provision_json(metadata_path: &Path, serial: &str, output_path: &Path) -> Result<()> {
    let serial_hex = serial_to_hex(serial)?;
    if serial_hex != serial {
        info!("Using '{}' for DSN modified from input serial '{}'", serial_hex, serial);
    }

    let json = fs::read_to_string(metadata_path).map_err(|source| ProvisionError::File {
        path: metadata_path.to_path_buf(),
        source,
    })?;
    let metadata: Map<String, Value> = serde_json::from_str(&json)?;

    let rendered = generate_provision_json(&metadata, &serial_hex)?;
    fs::write(output_path, rendered).map_err(|source| ProvisionError::File {
        path: output_path.to_path_buf(),
        source,
    })?;

    debug!("Wrote {}", output_path.display());
    Ok(())
}
