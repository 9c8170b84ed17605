use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};

use collector_app::diagnostics::{entry_diagnostics, redact, REDACTED, TO_REDACT};
use collector_app::migration::{migrate_entry, MigrationError, ENTRY_VERSION};
use collector_app::{ConfigEntry, EntryData, EntryStore};
use types::TelemetryPayload;

fn entry_data() -> EntryData {
    EntryData {
        name: "Rooftop".to_string(),
        email: "owner@example.com".to_string(),
        password: "hunter2".to_string(),
        app_id: "202203040001".to_string(),
        app_secret: "s3cr3t".to_string(),
        device_serial_number: "2306123456".to_string(),
    }
}

#[test]
fn v1_entry_is_migrated_and_rewritten() {
    let path = temp_entry_path("migrate");
    std::fs::copy(fixture_path("entry-v1.json"), &path).expect("copy fixture");
    let store = EntryStore::new(&path);

    let entry = store.load().expect("load").expect("entry present");
    assert_eq!(entry.version, ENTRY_VERSION);
    assert_eq!(entry.data.device_serial_number, "123456");
    assert_eq!(entry.data.email, "owner@example.com");
    assert_eq!(entry.data.app_id, "202203040001");
    assert_eq!(entry.title, "Rooftop");

    let rewritten: Value =
        serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
    assert_eq!(rewritten["version"], json!(2));
    assert_eq!(rewritten["data"]["device_serial_number"], json!("123456"));

    cleanup(&path);
}

#[test]
fn migration_leaves_string_serial_and_other_fields_alone() {
    let mut raw = json!({
        "version": 1,
        "title": "Rooftop",
        "data": {"device_serial_number": "2306123456", "app_id": 42}
    });

    assert!(migrate_entry(&mut raw).expect("migrate"));
    assert_eq!(raw["version"], json!(2));
    assert_eq!(raw["data"]["device_serial_number"], json!("2306123456"));
    assert_eq!(raw["data"]["app_id"], json!(42));
}

#[test]
fn current_version_is_untouched() {
    let mut raw = json!({"version": 2, "data": {"device_serial_number": 1}});
    assert!(!migrate_entry(&mut raw).expect("migrate"));
    assert_eq!(raw["data"]["device_serial_number"], json!(1));
}

#[test]
fn newer_version_is_rejected() {
    let mut raw = json!({"version": 3, "data": {}});
    assert!(matches!(
        migrate_entry(&mut raw),
        Err(MigrationError::UnsupportedVersion(3))
    ));
}

#[test]
fn non_scalar_serial_is_rejected() {
    let mut raw = json!({"data": {"device_serial_number": ["123"]}});
    assert!(matches!(
        migrate_entry(&mut raw),
        Err(MigrationError::InvalidSerial)
    ));
}

#[test]
fn save_then_load_returns_same_entry() {
    let path = temp_entry_path("save");
    let store = EntryStore::new(&path);
    assert!(store.load().expect("load").is_none());

    let entry = ConfigEntry::new(entry_data());
    store.save(&entry).expect("save");

    assert_eq!(store.load().expect("load"), Some(entry));
    cleanup(&path);
}

#[test]
fn entry_debug_hides_secrets() {
    let rendered = format!("{:?}", ConfigEntry::new(entry_data()));
    assert!(!rendered.contains("hunter2"));
    assert!(!rendered.contains("s3cr3t"));
    assert!(!rendered.contains("owner@example.com"));
    assert!(rendered.contains("2306123456"));
}

#[test]
fn redact_replaces_nested_keys_and_keeps_empty_values() {
    let value = json!({
        "email": "owner@example.com",
        "password": "",
        "app_secret": null,
        "nested": [{"email": "other@example.com", "keep": 1}],
        "app_id": "202203040001"
    });

    let redacted = redact(&value, &TO_REDACT);
    assert_eq!(
        redacted,
        json!({
            "email": REDACTED,
            "password": "",
            "app_secret": null,
            "nested": [{"email": REDACTED, "keep": 1}],
            "app_id": "202203040001"
        })
    );
}

#[test]
fn diagnostics_redact_credentials_and_include_payload() {
    let entry = ConfigEntry::new(entry_data());
    let payload: TelemetryPayload = serde_json::from_value(json!({
        "deviceSn": "2306123456",
        "dataList": [{"key": "APo_t1", "value": "512.0", "unit": "W"}]
    }))
    .expect("payload");

    let diagnostics = entry_diagnostics(&entry, Some(&payload)).expect("diagnostics");
    assert_eq!(diagnostics["entry_data"]["email"], json!(REDACTED));
    assert_eq!(diagnostics["entry_data"]["password"], json!(REDACTED));
    assert_eq!(diagnostics["entry_data"]["app_secret"], json!(REDACTED));
    assert_eq!(diagnostics["entry_data"]["app_id"], json!("202203040001"));
    assert_eq!(diagnostics["data"]["deviceSn"], json!("2306123456"));
    assert_eq!(diagnostics["data"]["dataList"][0]["unit"], json!("W"));

    let empty = entry_diagnostics(&entry, None).expect("diagnostics");
    assert_eq!(empty["data"], Value::Null);
}

fn temp_entry_path(prefix: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    let pid = std::process::id();
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    path.push(format!("solarman-{prefix}-{pid}-{ts}.json"));
    path
}

fn cleanup(path: &PathBuf) {
    let _ = std::fs::remove_file(path);
}

fn fixture_path(name: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    path
}
