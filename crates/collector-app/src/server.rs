use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use coordinator::{Coordinator, CoordinatorState};
use sensors::SensorEntity;

use crate::diagnostics::entry_diagnostics;
use crate::entry::ConfigEntry;
use crate::setup::{read_sensors, EntryRuntime, SharedSensors};

#[derive(Clone)]
pub struct AppState {
    entry: Arc<ConfigEntry>,
    coordinator: Arc<Coordinator>,
    sensors: SharedSensors,
    metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(runtime: &EntryRuntime, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            entry: Arc::new(runtime.entry.clone()),
            coordinator: Arc::clone(&runtime.coordinator),
            sensors: Arc::clone(&runtime.sensors),
            metrics,
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthBody {
    device_sn: String,
    state: CoordinatorState,
    last_error: Option<String>,
    reauth_required: bool,
}

#[derive(Debug, Serialize)]
struct SensorBody {
    unique_id: String,
    key: &'static str,
    translation_key: &'static str,
    enabled_by_default: bool,
    native_value: Option<f64>,
    display_value: Option<String>,
    unit: &'static str,
}

impl From<&SensorEntity> for SensorBody {
    fn from(entity: &SensorEntity) -> Self {
        Self {
            unique_id: entity.unique_id.clone(),
            key: entity.key(),
            translation_key: entity.description.translation_key,
            enabled_by_default: entity.description.enabled_by_default,
            native_value: entity.native_value(),
            display_value: entity.display_value(),
            unit: entity.description.unit,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sensors", get(list_sensors))
        .route("/diagnostics", get(diagnostics))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serves the router on `addr` until `shutdown` flips to true.
pub async fn serve(addr: SocketAddr, state: AppState, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind http listener on {addr}"))?;
    info!(%addr, "http server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .context("http server failed")
}

async fn health(State(state): State<AppState>) -> Response {
    let last_error = state.coordinator.last_error();
    let body = HealthBody {
        device_sn: state.coordinator.device().serial_number.clone(),
        state: state.coordinator.state(),
        reauth_required: last_error.as_ref().is_some_and(|err| err.requires_reauth()),
        last_error: last_error.map(|err| err.to_string()),
    };
    let status = if is_healthy(body.state, body.last_error.is_some()) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

/// A refresh in flight keeps the last outcome: healthy unless the previous one failed.
fn is_healthy(state: CoordinatorState, has_error: bool) -> bool {
    match state {
        CoordinatorState::Ready => true,
        CoordinatorState::Refreshing => !has_error,
        CoordinatorState::Uninitialized
        | CoordinatorState::AuthFailed
        | CoordinatorState::UpdateFailed => false,
    }
}

async fn list_sensors(State(state): State<AppState>) -> Json<Vec<SensorBody>> {
    let sensors = read_sensors(&state.sensors);
    Json(sensors.iter().map(SensorBody::from).collect())
}

async fn diagnostics(State(state): State<AppState>) -> Response {
    let data = state.coordinator.data();
    match entry_diagnostics(&state.entry, data.as_deref()) {
        Ok(body) => Json(body).into_response(),
        Err(err) => {
            warn!(error = %err, "diagnostics export failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
