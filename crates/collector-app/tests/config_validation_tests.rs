use std::env;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use collector_app::config::entry_input_from_env;
use collector_app::CollectorConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

const OVERRIDE_VARS: [&str; 6] = [
    "SOLARMAN_API_BASE_URL",
    "SOLARMAN_API_TIMEOUT_MS",
    "SOLARMAN_UPDATE_INTERVAL_MS",
    "SOLARMAN_REQUEST_TIMEOUT_MS",
    "SOLARMAN_ENTRY_PATH",
    "SOLARMAN_HTTP_LISTEN",
];

#[test]
fn toml_config_validates() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    clear_overrides();
    env::set_var("SOLARMAN_CONFIG", fixture_path("config-valid.toml"));

    let config = CollectorConfig::load().expect("load config");
    config.validate().expect("validate config");
    assert_eq!(config.api.timeout_ms, 8_000);
    assert_eq!(config.coordinator.update_interval, Duration::from_secs(120));
    assert_eq!(config.coordinator.request_timeout, Duration::from_secs(9));
    assert_eq!(config.entry_path, "/var/lib/solarman/entry.json");
    assert_eq!(
        config.listen_addr().expect("listen addr"),
        Some("127.0.0.1:9108".parse().expect("socket addr"))
    );

    env::remove_var("SOLARMAN_CONFIG");
}

#[test]
fn json_config_validates() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    clear_overrides();
    env::set_var("SOLARMAN_CONFIG", fixture_path("config-valid.json"));

    let config = CollectorConfig::load().expect("load config");
    config.validate().expect("validate config");
    assert_eq!(config.api.base_url, "http://127.0.0.1:8080");
    assert_eq!(config.coordinator.update_interval, Duration::from_secs(60));
    assert_eq!(config.coordinator.request_timeout, Duration::from_secs(10));
    assert!(config.http_listen.is_none());

    env::remove_var("SOLARMAN_CONFIG");
}

#[test]
fn invalid_config_fails_validation() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    clear_overrides();
    env::set_var("SOLARMAN_CONFIG", fixture_path("config-invalid.toml"));

    let config = CollectorConfig::load().expect("load config");
    assert!(config.validate().is_err());

    env::remove_var("SOLARMAN_CONFIG");
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    clear_overrides();
    env::remove_var("SOLARMAN_CONFIG");

    let config = CollectorConfig::load().expect("load config");
    config.validate().expect("validate config");
    assert_eq!(config.api.base_url, "https://globalapi.solarmanpv.com");
    assert_eq!(config.coordinator.update_interval, Duration::from_secs(300));
    assert_eq!(config.entry_path, "solarman-entry.json");
}

#[test]
fn env_overrides_file_values() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    clear_overrides();
    env::set_var("SOLARMAN_UPDATE_INTERVAL_MS", "1500");
    env::set_var("SOLARMAN_HTTP_LISTEN", "0.0.0.0:9200");
    env::set_var("SOLARMAN_API_TIMEOUT_MS", "not-a-number");

    let config = CollectorConfig::load_with_path(Some(fixture_path("config-valid.toml")))
        .expect("load config");
    assert_eq!(config.coordinator.update_interval, Duration::from_millis(1_500));
    assert_eq!(config.http_listen.as_deref(), Some("0.0.0.0:9200"));
    assert_eq!(config.api.timeout_ms, 8_000);

    clear_overrides();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    clear_overrides();

    let result = CollectorConfig::load_with_path(Some(fixture_path("does-not-exist.toml")));
    assert!(result.is_err());
}

#[test]
fn entry_input_reads_solarman_variables() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    env::remove_var("SOLARMAN_NAME");
    env::set_var("SOLARMAN_EMAIL", "owner@example.com");
    env::set_var("SOLARMAN_DEVICE_SN", "2306123456");
    env::remove_var("SOLARMAN_APP_SECRET");

    let input = entry_input_from_env();
    assert_eq!(input.name, "Solarman API");
    assert_eq!(input.email, "owner@example.com");
    assert_eq!(input.device_serial_number, "2306123456");
    assert!(input.app_secret.is_empty());

    env::remove_var("SOLARMAN_EMAIL");
    env::remove_var("SOLARMAN_DEVICE_SN");
}

fn clear_overrides() {
    for key in OVERRIDE_VARS {
        env::remove_var(key);
    }
}

fn fixture_path(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    path.to_string_lossy().to_string()
}
