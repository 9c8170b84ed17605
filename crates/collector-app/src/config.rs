use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use coordinator::CoordinatorConfig;
use solarman_client::{ClientConfig, Credentials};

use crate::entry::EntryData;

const DEFAULT_ENTRY_PATH: &str = "solarman-entry.json";
const DEFAULT_DEVICE_NAME: &str = "Solarman API";

#[derive(Clone, Debug)]
pub struct CollectorConfig {
    pub api: ClientConfig,
    pub coordinator: CoordinatorConfig,
    pub entry_path: String,
    pub http_listen: Option<String>,
}

impl CollectorConfig {
    pub fn load() -> Result<Self> {
        Self::load_with_path(None)
    }

    pub fn load_with_path(config_path: Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(file_config) = load_file_config(config_path.as_deref())? {
            apply_file_config(&mut config, file_config);
        }

        apply_env_overrides(&mut config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.api.base_url.starts_with("https://") || self.api.base_url.starts_with("http://")) {
            anyhow::bail!("api.base_url must be an http(s) URL");
        }
        if self.api.timeout_ms == 0 {
            anyhow::bail!("api.timeout_ms must be >= 1");
        }
        if self.coordinator.update_interval.as_millis() == 0 {
            anyhow::bail!("coordinator.update_interval_ms must be >= 1");
        }
        if self.coordinator.request_timeout.as_millis() == 0 {
            anyhow::bail!("coordinator.request_timeout_ms must be >= 1");
        }
        if self.entry_path.trim().is_empty() {
            anyhow::bail!("entry.path must be non-empty");
        }
        if let Some(ref listen) = self.http_listen {
            parse_listen(listen)?;
        }

        Ok(())
    }

    pub fn listen_addr(&self) -> Result<Option<SocketAddr>> {
        self.http_listen.as_deref().map(parse_listen).transpose()
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            api: ClientConfig::default(),
            coordinator: CoordinatorConfig::default(),
            entry_path: DEFAULT_ENTRY_PATH.to_string(),
            http_listen: None,
        }
    }
}

/// Entry fields for the `--setup` flow, read from `SOLARMAN_*` variables.
/// Unset variables become empty strings so the flow can report them.
pub fn entry_input_from_env() -> EntryData {
    EntryData {
        name: env::var("SOLARMAN_NAME").unwrap_or_else(|_| DEFAULT_DEVICE_NAME.to_string()),
        email: env::var("SOLARMAN_EMAIL").unwrap_or_default(),
        password: env::var("SOLARMAN_PASSWORD").unwrap_or_default(),
        app_id: env::var("SOLARMAN_APP_ID").unwrap_or_default(),
        app_secret: env::var("SOLARMAN_APP_SECRET").unwrap_or_default(),
        device_serial_number: env::var("SOLARMAN_DEVICE_SN").unwrap_or_default(),
    }
}

/// Replacement credentials for the `--reauth` flow.
pub fn credentials_from_env() -> Credentials {
    let input = entry_input_from_env();
    input.credentials()
}

fn apply_env_overrides(config: &mut CollectorConfig) {
    if let Ok(value) = env::var("SOLARMAN_API_BASE_URL") {
        config.api.base_url = value;
    }

    if let Some(timeout_ms) = parse_env_u64("SOLARMAN_API_TIMEOUT_MS") {
        config.api.timeout_ms = timeout_ms;
    }

    if let Some(interval_ms) = parse_env_u64("SOLARMAN_UPDATE_INTERVAL_MS") {
        config.coordinator.update_interval = Duration::from_millis(interval_ms);
    }

    if let Some(timeout_ms) = parse_env_u64("SOLARMAN_REQUEST_TIMEOUT_MS") {
        config.coordinator.request_timeout = Duration::from_millis(timeout_ms);
    }

    if let Ok(value) = env::var("SOLARMAN_ENTRY_PATH") {
        config.entry_path = value;
    }

    config.http_listen = env::var("SOLARMAN_HTTP_LISTEN").ok().or(config.http_listen.take());
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    api: Option<FileApiConfig>,
    coordinator: Option<FileCoordinatorConfig>,
    entry: Option<FileEntryConfig>,
    http: Option<FileHttpConfig>,
}

#[derive(Debug, Deserialize)]
struct FileApiConfig {
    base_url: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FileCoordinatorConfig {
    update_interval_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FileEntryConfig {
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileHttpConfig {
    listen: Option<String>,
}

fn load_file_config(config_path: Option<&str>) -> Result<Option<FileConfig>> {
    let path = match config_path {
        Some(path) => path.to_string(),
        None => match env::var("SOLARMAN_CONFIG") {
            Ok(value) => value,
            Err(_) => return Ok(None),
        },
    };

    let content = fs::read_to_string(&path)
        .with_context(|| format!("read config file {path}"))?;
    let ext = Path::new(&path).extension().and_then(|value| value.to_str());

    let config = match ext {
        Some("json") => serde_json::from_str(&content).context("parse json config")?,
        _ => toml::from_str(&content).context("parse toml config")?,
    };

    Ok(Some(config))
}

fn apply_file_config(config: &mut CollectorConfig, file: FileConfig) {
    if let Some(api) = file.api {
        if let Some(base_url) = api.base_url {
            config.api.base_url = base_url;
        }
        if let Some(timeout_ms) = api.timeout_ms {
            config.api.timeout_ms = timeout_ms;
        }
    }

    if let Some(coordinator) = file.coordinator {
        if let Some(interval_ms) = coordinator.update_interval_ms {
            config.coordinator.update_interval = Duration::from_millis(interval_ms);
        }
        if let Some(timeout_ms) = coordinator.request_timeout_ms {
            config.coordinator.request_timeout = Duration::from_millis(timeout_ms);
        }
    }

    if let Some(path) = file.entry.and_then(|entry| entry.path) {
        config.entry_path = path;
    }

    if let Some(listen) = file.http.and_then(|http| http.listen) {
        config.http_listen = Some(listen);
    }
}

fn parse_env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn parse_listen(value: &str) -> Result<SocketAddr> {
    value
        .parse::<SocketAddr>()
        .map_err(|_| anyhow::anyhow!("http.listen must be a socket address (e.g. 0.0.0.0:9108)"))
}
