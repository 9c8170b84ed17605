use serde::Serialize;
use tracing::trace;

use types::{DeviceIdentity, DeviceInfo, TelemetryPayload, ATTRIBUTION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Energy,
    Current,
    Frequency,
    Power,
    Voltage,
    Temperature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateClass {
    Measurement,
    Total,
    TotalIncreasing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityCategory {
    Diagnostic,
}

/// Static metadata for one instrument code of the `currentData` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SensorDescription {
    pub key: &'static str,
    pub translation_key: &'static str,
    pub device_class: DeviceClass,
    pub state_class: StateClass,
    pub unit: &'static str,
    pub display_precision: u8,
    pub entity_category: Option<EntityCategory>,
    pub enabled_by_default: bool,
}

const fn primary(
    key: &'static str,
    translation_key: &'static str,
    device_class: DeviceClass,
    state_class: StateClass,
    unit: &'static str,
    display_precision: u8,
) -> SensorDescription {
    SensorDescription {
        key,
        translation_key,
        device_class,
        state_class,
        unit,
        display_precision,
        entity_category: None,
        enabled_by_default: true,
    }
}

const fn diagnostic(
    key: &'static str,
    translation_key: &'static str,
    device_class: DeviceClass,
    state_class: StateClass,
    unit: &'static str,
    display_precision: u8,
) -> SensorDescription {
    SensorDescription {
        key,
        translation_key,
        device_class,
        state_class,
        unit,
        display_precision,
        entity_category: Some(EntityCategory::Diagnostic),
        enabled_by_default: false,
    }
}

const KWH: &str = "kWh";
const AMPERE: &str = "A";
const HERTZ: &str = "Hz";
const WATT: &str = "W";
const VOLT: &str = "V";
const CELSIUS: &str = "°C";

use DeviceClass::{Current, Energy, Frequency, Power, Temperature, Voltage};
use StateClass::{Measurement, Total, TotalIncreasing};

pub const SENSOR_TYPES: [SensorDescription; 17] = [
    primary("Et_ge0", "total_production", Energy, TotalIncreasing, KWH, 1),
    diagnostic("Et_ge1", "total_production_1", Energy, TotalIncreasing, KWH, 1),
    diagnostic("Et_ge2", "total_production_2", Energy, TotalIncreasing, KWH, 1),
    primary("Etdy_ge0", "daily_production", Energy, Total, KWH, 1),
    diagnostic("Etdy_ge1", "daily_production_1", Energy, Total, KWH, 1),
    diagnostic("Etdy_ge2", "daily_production_2", Energy, Total, KWH, 1),
    diagnostic("AC1", "ac_current", Current, Measurement, AMPERE, 1),
    diagnostic("AF1", "ac_output_frequency", Frequency, Measurement, HERTZ, 2),
    primary("APo_t1", "ac_output_power", Power, Measurement, WATT, 2),
    diagnostic("AV1", "ac_voltage", Voltage, Measurement, VOLT, 1),
    diagnostic("DC1", "dc_current_pv1", Current, Measurement, AMPERE, 1),
    diagnostic("DP1", "dc_power_pv1", Power, Measurement, WATT, 2),
    diagnostic("DV1", "dc_voltage_pv1", Voltage, Measurement, VOLT, 1),
    diagnostic("DC2", "dc_current_pv2", Current, Measurement, AMPERE, 1),
    diagnostic("DP2", "dc_power_pv2", Power, Measurement, WATT, 2),
    diagnostic("DV2", "dc_voltage_pv2", Voltage, Measurement, VOLT, 1),
    diagnostic("AC_RDT_T1", "radiator_temp", Temperature, Measurement, CELSIUS, 1),
];

pub fn description(key: &str) -> Option<&'static SensorDescription> {
    SENSOR_TYPES.iter().find(|description| description.key == key)
}

/// One named observation published to the host, backed by the coordinator cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorEntity {
    pub unique_id: String,
    pub description: SensorDescription,
    pub device_info: DeviceInfo,
    pub attribution: &'static str,
    native_value: Option<f64>,
}

impl SensorEntity {
    pub fn new(description: SensorDescription, device: &DeviceIdentity) -> Self {
        Self {
            unique_id: device.unique_id(description.key),
            description,
            device_info: device.device_info(),
            attribution: ATTRIBUTION,
            native_value: None,
        }
    }

    pub fn key(&self) -> &'static str {
        self.description.key
    }

    pub fn native_value(&self) -> Option<f64> {
        self.native_value
    }

    /// Value rounded to the suggested display precision, with unit.
    pub fn display_value(&self) -> Option<String> {
        let precision = usize::from(self.description.display_precision);
        self.native_value
            .map(|value| format!("{value:.precision$} {}", self.description.unit))
    }

    /// Re-resolves the value from a freshly cached payload.
    pub fn handle_update(&mut self, payload: &TelemetryPayload) {
        self.native_value = payload.value(self.description.key);
        trace!(unique_id = %self.unique_id, value = ?self.native_value, "sensor updated");
    }
}

/// One entity per catalogue entry, primed from `payload` when one is cached.
pub fn build_entities(device: &DeviceIdentity, payload: Option<&TelemetryPayload>) -> Vec<SensorEntity> {
    SENSOR_TYPES
        .iter()
        .map(|description| {
            let mut entity = SensorEntity::new(*description, device);
            if let Some(payload) = payload {
                entity.handle_update(payload);
            }
            entity
        })
        .collect()
}
