use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use solarman_client::Credentials;
use types::DeviceIdentity;

use crate::migration::{migrate_entry, ENTRY_VERSION};

pub const CONF_NAME: &str = "name";
pub const CONF_EMAIL: &str = "email";
pub const CONF_PASSWORD: &str = "password";
pub const CONF_APP_ID: &str = "app_id";
pub const CONF_APP_SECRET: &str = "app_secret";
pub const CONF_DEVICE_SERIAL_NUMBER: &str = "device_serial_number";

/// The user-supplied fields of a config entry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryData {
    pub name: String,
    pub email: String,
    pub password: String,
    pub app_id: String,
    pub app_secret: String,
    pub device_serial_number: String,
}

impl EntryData {
    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.email, &self.password, &self.app_id, &self.app_secret)
    }

    pub fn device(&self) -> DeviceIdentity {
        DeviceIdentity::new(&self.device_serial_number, &self.name)
    }

    pub fn set_credentials(&mut self, credentials: &Credentials) {
        self.email = credentials.email.clone();
        self.password = credentials.password.clone();
        self.app_id = credentials.app_id.clone();
        self.app_secret = credentials.app_secret.clone();
    }
}

impl fmt::Debug for EntryData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryData")
            .field("name", &self.name)
            .field("app_id", &self.app_id)
            .field("device_serial_number", &self.device_serial_number)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub version: u32,
    pub title: String,
    pub data: EntryData,
}

impl ConfigEntry {
    pub fn new(data: EntryData) -> Self {
        Self {
            version: ENTRY_VERSION,
            title: data.name.clone(),
            data,
        }
    }

    /// Entries are unique per device serial number.
    pub fn unique_id(&self) -> &str {
        &self.data.device_serial_number
    }
}

/// JSON file holding the single config entry of this instance.
#[derive(Debug, Clone)]
pub struct EntryStore {
    path: PathBuf,
}

impl EntryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the stored entry, migrating (and rewriting) entries from older versions.
    pub fn load(&self) -> Result<Option<ConfigEntry>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("read config entry {}", self.path.display()))?;
        let mut raw: Value = serde_json::from_str(&content).context("parse config entry")?;
        let migrated = migrate_entry(&mut raw).context("migrate config entry")?;
        let entry: ConfigEntry = serde_json::from_value(raw).context("decode config entry")?;

        if migrated {
            self.save(&entry)?;
            info!(path = %self.path.display(), version = entry.version, "config entry migrated");
        }

        Ok(Some(entry))
    }

    pub fn save(&self, entry: &ConfigEntry) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create entry directory {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(entry).context("encode config entry")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace config entry {}", self.path.display()))?;
        Ok(())
    }
}
