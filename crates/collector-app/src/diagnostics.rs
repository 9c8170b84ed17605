use serde_json::{json, Map, Value};

use types::TelemetryPayload;

use crate::entry::{ConfigEntry, CONF_APP_SECRET, CONF_EMAIL, CONF_PASSWORD};

pub const REDACTED: &str = "**REDACTED**";
pub const TO_REDACT: [&str; 3] = [CONF_EMAIL, CONF_PASSWORD, CONF_APP_SECRET];

/// Replaces the values of `keys` at any depth; null and empty strings stay as they are.
pub fn redact(value: &Value, keys: &[&str]) -> Value {
    match value {
        Value::Object(map) => {
            let redacted: Map<String, Value> = map
                .iter()
                .map(|(key, item)| {
                    let item = match item {
                        Value::Null => Value::Null,
                        Value::String(text) if text.is_empty() => item.clone(),
                        _ if keys.contains(&key.as_str()) => Value::String(REDACTED.to_string()),
                        _ => redact(item, keys),
                    };
                    (key.clone(), item)
                })
                .collect();
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(|item| redact(item, keys)).collect()),
        other => other.clone(),
    }
}

/// Diagnostics export: redacted entry data plus the last cached payload.
pub fn entry_diagnostics(
    entry: &ConfigEntry,
    data: Option<&TelemetryPayload>,
) -> serde_json::Result<Value> {
    let entry_data = serde_json::to_value(&entry.data)?;
    Ok(json!({
        "entry_data": redact(&entry_data, &TO_REDACT),
        "data": data,
    }))
}
