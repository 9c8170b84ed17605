use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DOMAIN: &str = "solarman_api";
pub const MANUFACTURER: &str = "Solarman";
pub const ATTRIBUTION: &str = "Data provided by Solarman API";
pub const CONFIGURATION_URL: &str = "https://globalapi.solarmanpv.com/device/v1.0/currentData";

/// Identity of the single inverter/logger a client instance polls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub serial_number: String,
    pub name: String,
}

impl DeviceIdentity {
    pub fn new(serial_number: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            serial_number: serial_number.into(),
            name: name.into(),
        }
    }

    /// Stable identifier for a value derived from this device, e.g. `"2306x-et_ge0"`.
    pub fn unique_id(&self, key: &str) -> String {
        format!("{}-{}", self.serial_number, key).to_lowercase()
    }

    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            identifiers: vec![(DOMAIN.to_string(), self.serial_number.clone())],
            manufacturer: MANUFACTURER.to_string(),
            name: self.name.clone(),
            entry_type: "service".to_string(),
            configuration_url: CONFIGURATION_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub identifiers: Vec<(String, String)>,
    pub manufacturer: String,
    pub name: String,
    pub entry_type: String,
    pub configuration_url: String,
}

/// Measurement values arrive either as JSON numbers or as numeric strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MeasurementValue {
    Number(f64),
    Text(String),
}

impl MeasurementValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Text(text) => text.trim().parse().ok(),
        }
    }
}

/// One entry of the `dataList` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub key: String,
    #[serde(default)]
    pub value: Option<MeasurementValue>,
    /// Remaining vendor fields (`unit`, `name`, ...), kept as received.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Decoded `currentData` envelope.
///
/// Only `dataList` is interpreted; every other envelope field is carried
/// through untouched so diagnostics can show the payload as received.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPayload {
    #[serde(rename = "dataList", default)]
    pub data_list: Vec<Measurement>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TelemetryPayload {
    pub fn measurement(&self, key: &str) -> Option<&Measurement> {
        self.data_list.iter().find(|item| item.key == key)
    }

    pub fn value(&self, key: &str) -> Option<f64> {
        self.measurement(key)
            .and_then(|item| item.value.as_ref())
            .and_then(MeasurementValue::as_f64)
    }
}
