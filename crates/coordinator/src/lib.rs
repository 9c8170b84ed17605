use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use metrics::{counter, histogram};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use solarman_client::{ApiError, SolarmanClient};
use types::{DeviceIdentity, DeviceInfo, TelemetryPayload};

pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub update_interval: Duration,
    /// Upper bound for one `get_data` call, token exchange included.
    pub request_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            update_interval: DEFAULT_UPDATE_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    Uninitialized,
    Refreshing,
    Ready,
    AuthFailed,
    UpdateFailed,
}

/// Host-facing outcome of a failed refresh.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    /// Stored credentials or device serial were rejected; the user has to re-enter them.
    #[error("authentication failed for {device}: {message}")]
    AuthFailed { device: String, message: String },
    /// Anything else; the next scheduled refresh is the retry.
    #[error("error communicating with API: {message}")]
    UpdateFailed { message: String },
}

impl RefreshError {
    pub fn from_api(err: &ApiError, device: &DeviceIdentity) -> Self {
        if err.requires_reauth() {
            Self::AuthFailed {
                device: device.name.clone(),
                message: err.message(),
            }
        } else {
            Self::UpdateFailed {
                message: err.message(),
            }
        }
    }

    pub fn requires_reauth(&self) -> bool {
        matches!(self, Self::AuthFailed { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::AuthFailed { message, .. } | Self::UpdateFailed { message } => message,
        }
    }
}

pub type SharedPayload = Arc<TelemetryPayload>;

/// Polls one device on a fixed interval and caches the last good payload.
///
/// Refreshes are serialized by whoever drives them (`run` awaits each one);
/// the cache and state live in watch channels so any number of readers can
/// observe them.
pub struct Coordinator {
    client: Arc<SolarmanClient>,
    device: DeviceIdentity,
    config: CoordinatorConfig,
    data: watch::Sender<Option<SharedPayload>>,
    state: watch::Sender<CoordinatorState>,
    last_error: Mutex<Option<RefreshError>>,
}

impl Coordinator {
    pub fn new(client: Arc<SolarmanClient>, device: DeviceIdentity, config: CoordinatorConfig) -> Self {
        let (data, _) = watch::channel(None);
        let (state, _) = watch::channel(CoordinatorState::Uninitialized);
        Self {
            client,
            device,
            config,
            data,
            state,
            last_error: Mutex::new(None),
        }
    }

    pub fn device(&self) -> &DeviceIdentity {
        &self.device
    }

    pub fn device_info(&self) -> DeviceInfo {
        self.device.device_info()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn data(&self) -> Option<SharedPayload> {
        self.data.borrow().clone()
    }

    pub fn state(&self) -> CoordinatorState {
        *self.state.borrow()
    }

    pub fn last_error(&self) -> Option<RefreshError> {
        lock(&self.last_error).clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<SharedPayload>> {
        self.data.subscribe()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CoordinatorState> {
        self.state.subscribe()
    }

    /// The refresh run during setup; callers abort setup on error.
    pub async fn first_refresh(&self) -> Result<SharedPayload, RefreshError> {
        let result = self.refresh().await;
        if let Err(err) = &result {
            warn!(
                device_sn = %self.device.serial_number,
                error = %err,
                "first refresh failed"
            );
        }
        result
    }

    pub async fn refresh(&self) -> Result<SharedPayload, RefreshError> {
        self.state.send_replace(CoordinatorState::Refreshing);
        let started = Instant::now();

        let request = self.client.get_data(&self.device.serial_number);
        let outcome = match timeout(self.config.request_timeout, request).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(err)) => Err(RefreshError::from_api(&err, &self.device)),
            Err(_) => {
                let err = ApiError::Timeout {
                    timeout_ms: u64::try_from(self.config.request_timeout.as_millis()).unwrap_or(u64::MAX),
                };
                Err(RefreshError::from_api(&err, &self.device))
            }
        };
        histogram!("solarman_refresh_duration_seconds").record(started.elapsed().as_secs_f64());

        match outcome {
            Ok(payload) => {
                let payload = Arc::new(payload);
                self.data.send_replace(Some(Arc::clone(&payload)));
                *lock(&self.last_error) = None;
                self.state.send_replace(CoordinatorState::Ready);
                counter!("solarman_refresh_total", "outcome" => "success").increment(1);
                debug!(
                    device_sn = %self.device.serial_number,
                    measurements = payload.data_list.len(),
                    "refresh succeeded"
                );
                Ok(payload)
            }
            Err(err) => {
                let (state, outcome) = if err.requires_reauth() {
                    (CoordinatorState::AuthFailed, "auth_failed")
                } else {
                    (CoordinatorState::UpdateFailed, "update_failed")
                };
                *lock(&self.last_error) = Some(err.clone());
                self.state.send_replace(state);
                counter!("solarman_refresh_total", "outcome" => outcome).increment(1);
                Err(err)
            }
        }
    }

    /// Refreshes every `update_interval` until `shutdown` flips to true.
    ///
    /// The first tick fires one interval after the call; run `first_refresh`
    /// beforehand. Failures never stop the loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut iteration = 0u64;

        loop {
            if *shutdown.borrow() {
                info!(device_sn = %self.device.serial_number, "coordinator shutdown requested");
                break;
            }

            tokio::select! {
                _ = sleep(self.config.update_interval) => {},
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(device_sn = %self.device.serial_number, "coordinator shutdown requested");
                        break;
                    }
                    continue;
                }
            }

            iteration = iteration.wrapping_add(1);
            match self.refresh().await {
                Ok(payload) => info!(
                    device_sn = %self.device.serial_number,
                    iteration,
                    measurements = payload.data_list.len(),
                    "refresh cycle complete"
                ),
                Err(err) if err.requires_reauth() => warn!(
                    device_sn = %self.device.serial_number,
                    device = %self.device.name,
                    iteration,
                    error = %err,
                    "refresh rejected, reauthentication required"
                ),
                Err(err) => warn!(
                    device_sn = %self.device.serial_number,
                    iteration,
                    error = %err,
                    next_delay_ms = self.config.update_interval.as_millis(),
                    "refresh failed"
                ),
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
