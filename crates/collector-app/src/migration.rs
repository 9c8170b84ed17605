use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::entry::CONF_DEVICE_SERIAL_NUMBER;

/// Version 1 entries could store the device serial number as a JSON number.
pub const ENTRY_VERSION: u32 = 2;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("config entry must be a JSON object")]
    NotAnObject,
    #[error("config entry version {0} is newer than supported version {ENTRY_VERSION}")]
    UnsupportedVersion(u64),
    #[error("device serial number must be a string or a number")]
    InvalidSerial,
}

/// Brings a raw stored entry up to `ENTRY_VERSION`. Returns whether anything changed.
pub fn migrate_entry(entry: &mut Value) -> Result<bool, MigrationError> {
    let object = entry.as_object_mut().ok_or(MigrationError::NotAnObject)?;
    let version = object.get("version").and_then(Value::as_u64).unwrap_or(1);

    if version > u64::from(ENTRY_VERSION) {
        return Err(MigrationError::UnsupportedVersion(version));
    }
    if version == u64::from(ENTRY_VERSION) {
        return Ok(false);
    }

    if let Some(data) = object.get_mut("data").and_then(Value::as_object_mut) {
        normalize_serial(data)?;
    }
    object.insert("version".to_string(), json!(ENTRY_VERSION));
    Ok(true)
}

/// Rewrites a numeric `device_serial_number` as a string; other fields are left alone.
pub fn normalize_serial(data: &mut Map<String, Value>) -> Result<bool, MigrationError> {
    let serial = match data.get(CONF_DEVICE_SERIAL_NUMBER) {
        None | Some(Value::String(_)) => return Ok(false),
        Some(Value::Number(number)) => number.to_string(),
        Some(_) => return Err(MigrationError::InvalidSerial),
    };

    data.insert(CONF_DEVICE_SERIAL_NUMBER.to_string(), Value::String(serial));
    Ok(true)
}
