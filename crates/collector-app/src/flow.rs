//! Validation steps run before credentials are stored: initial setup and
//! reauthentication after the coordinator reports rejected credentials.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, warn};

use solarman_client::{ApiError, ClientConfig, Credentials, SolarmanClient, Transport};

use crate::entry::{
    ConfigEntry, EntryData, EntryStore, CONF_APP_ID, CONF_APP_SECRET, CONF_DEVICE_SERIAL_NUMBER,
    CONF_EMAIL, CONF_NAME, CONF_PASSWORD,
};

pub const BASE_ERROR: &str = "base";
pub const FLOW_TIMEOUT: Duration = Duration::from_secs(10);

/// Form errors keyed by field name (`base` for errors not tied to a field).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlowErrors(BTreeMap<String, String>);

impl FlowErrors {
    pub fn insert(&mut self, field: &str, message: impl Into<String>) {
        self.0.insert(field.to_string(), message.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for FlowErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, message) in &self.0 {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{field}: {message}")?;
            first = false;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("invalid input ({0})")]
    Invalid(FlowErrors),
    #[error("device {0} is already configured")]
    AlreadyConfigured(String),
    #[error("no config entry to reauthenticate")]
    NoEntry,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// User step: validate new input against the API and store it as the entry.
pub async fn create_entry(
    store: &EntryStore,
    transport: Arc<dyn Transport>,
    api: &ClientConfig,
    input: EntryData,
) -> Result<ConfigEntry, FlowError> {
    let errors = required_errors(&input);
    if !errors.is_empty() {
        return Err(FlowError::Invalid(errors));
    }

    if let Err(err) = probe(transport, api, input.credentials(), &input.device_serial_number).await {
        warn!(device_sn = %input.device_serial_number, error = %err, "setup validation failed");
        return Err(FlowError::Invalid(user_step_errors(&err)));
    }

    if let Some(existing) = store.load()? {
        return Err(FlowError::AlreadyConfigured(existing.unique_id().to_string()));
    }

    let entry = ConfigEntry::new(input);
    store.save(&entry)?;
    info!(title = %entry.title, device_sn = %entry.unique_id(), "config entry created");
    Ok(entry)
}

/// Reauth step: validate replacement credentials against the stored device and
/// update only the credential fields of the entry.
pub async fn reauthenticate(
    store: &EntryStore,
    transport: Arc<dyn Transport>,
    api: &ClientConfig,
    credentials: Credentials,
) -> Result<ConfigEntry, FlowError> {
    let mut entry = store.load()?.ok_or(FlowError::NoEntry)?;

    if let Err(err) = probe(transport, api, credentials.clone(), entry.unique_id()).await {
        warn!(device_sn = %entry.unique_id(), error = %err, "reauthentication failed");
        return Err(FlowError::Invalid(reauth_step_errors(&err)));
    }

    entry.data.set_credentials(&credentials);
    store.save(&entry)?;
    info!(device_sn = %entry.unique_id(), "config entry credentials updated");
    Ok(entry)
}

async fn probe(
    transport: Arc<dyn Transport>,
    api: &ClientConfig,
    credentials: Credentials,
    serial_number: &str,
) -> Result<(), ApiError> {
    let client = SolarmanClient::new(transport, credentials, api);
    match timeout(FLOW_TIMEOUT, client.get_data(serial_number)).await {
        Ok(result) => result.map(|_| ()),
        Err(_) => Err(ApiError::Timeout {
            timeout_ms: u64::try_from(FLOW_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

fn required_errors(input: &EntryData) -> FlowErrors {
    let fields = [
        (CONF_NAME, &input.name),
        (CONF_EMAIL, &input.email),
        (CONF_PASSWORD, &input.password),
        (CONF_APP_ID, &input.app_id),
        (CONF_APP_SECRET, &input.app_secret),
        (CONF_DEVICE_SERIAL_NUMBER, &input.device_serial_number),
    ];

    let mut errors = FlowErrors::default();
    for (field, value) in fields {
        if value.trim().is_empty() {
            errors.insert(field, "required");
        }
    }
    errors
}

pub fn user_step_errors(err: &ApiError) -> FlowErrors {
    let field = match err {
        ApiError::InvalidApplicationId(_) => CONF_APP_ID,
        ApiError::InvalidApplicationSecret(_) => CONF_APP_SECRET,
        ApiError::InvalidDeviceSerialNumber(_) => CONF_DEVICE_SERIAL_NUMBER,
        _ => BASE_ERROR,
    };
    let mut errors = FlowErrors::default();
    errors.insert(field, err.message());
    errors
}

/// The device serial is not editable during reauth, so its errors go to `base`.
pub fn reauth_step_errors(err: &ApiError) -> FlowErrors {
    let field = match err {
        ApiError::InvalidApplicationId(_) => CONF_APP_ID,
        ApiError::InvalidApplicationSecret(_) => CONF_APP_SECRET,
        _ => BASE_ERROR,
    };
    let mut errors = FlowErrors::default();
    errors.insert(field, err.message());
    errors
}
