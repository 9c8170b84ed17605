use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use anyhow::Result;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use coordinator::{Coordinator, RefreshError};
use sensors::{build_entities, SensorEntity};
use solarman_client::{SolarmanClient, Transport};

use crate::config::CollectorConfig;
use crate::diagnostics::entry_diagnostics;
use crate::entry::ConfigEntry;

pub type SharedSensors = Arc<RwLock<Vec<SensorEntity>>>;

/// Everything running for one loaded config entry.
pub struct EntryRuntime {
    pub entry: ConfigEntry,
    pub coordinator: Arc<Coordinator>,
    pub sensors: SharedSensors,
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

impl EntryRuntime {
    pub fn diagnostics(&self) -> Result<Value> {
        let data = self.coordinator.data();
        Ok(entry_diagnostics(&self.entry, data.as_deref())?)
    }

    pub fn sensor_states(&self) -> Vec<SensorEntity> {
        read_sensors(&self.sensors).clone()
    }
}

/// Builds the client and coordinator for `entry`, runs the first refresh and
/// starts the polling loop. Nothing is spawned when the first refresh fails.
pub async fn setup_entry(
    entry: ConfigEntry,
    config: &CollectorConfig,
    transport: Arc<dyn Transport>,
) -> Result<EntryRuntime, RefreshError> {
    let client = SolarmanClient::new(transport, entry.data.credentials(), &config.api);
    let coordinator = Arc::new(Coordinator::new(
        Arc::new(client),
        entry.data.device(),
        config.coordinator.clone(),
    ));

    let payload = coordinator.first_refresh().await?;
    let sensors: SharedSensors = Arc::new(RwLock::new(build_entities(
        coordinator.device(),
        Some(payload.as_ref()),
    )));

    let (shutdown, shutdown_rx) = watch::channel(false);
    let mut tasks = JoinSet::new();

    let poller = Arc::clone(&coordinator);
    let poller_shutdown = shutdown_rx.clone();
    tasks.spawn(async move { poller.run(poller_shutdown).await });
    tasks.spawn(sensor_listener(
        Arc::clone(&coordinator),
        Arc::clone(&sensors),
        shutdown_rx,
    ));

    info!(
        title = %entry.title,
        device_sn = %entry.unique_id(),
        sensors = read_sensors(&sensors).len(),
        "config entry loaded"
    );

    Ok(EntryRuntime {
        entry,
        coordinator,
        sensors,
        shutdown,
        tasks,
    })
}

/// Stops the polling loop and the sensor listener. Returns true once both exited.
pub async fn unload_entry(mut runtime: EntryRuntime) -> bool {
    let _ = runtime.shutdown.send(true);

    let mut clean = true;
    while let Some(result) = runtime.tasks.join_next().await {
        if let Err(err) = result {
            warn!(error = %err, "entry task join failed");
            clean = false;
        }
    }

    info!(device_sn = %runtime.entry.unique_id(), clean, "config entry unloaded");
    clean
}

async fn sensor_listener(
    coordinator: Arc<Coordinator>,
    sensors: SharedSensors,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut updates = coordinator.subscribe();

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let payload = updates.borrow_and_update().clone();
                if let Some(payload) = payload {
                    let mut entities = sensors.write().unwrap_or_else(PoisonError::into_inner);
                    for entity in entities.iter_mut() {
                        entity.handle_update(&payload);
                    }
                    debug!(sensors = entities.len(), "sensors updated");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

pub(crate) fn read_sensors(sensors: &SharedSensors) -> RwLockReadGuard<'_, Vec<SensorEntity>> {
    sensors.read().unwrap_or_else(PoisonError::into_inner)
}
