use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};

use collector_app::config::{credentials_from_env, entry_input_from_env};
use collector_app::flow::{self, FlowError};
use collector_app::server::{self, AppState};
use collector_app::{setup_entry, unload_entry, CollectorConfig, EntryRuntime, EntryStore};
use coordinator::CoordinatorState;
use solarman_client::{HttpTransport, Transport};

const SETUP_RETRY_BASE_MS: u64 = 5_000;
const SETUP_RETRY_MAX_MS: u64 = 300_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Run,
    Setup,
    Reauth,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let (config_path, mode) = parse_args();
    let config = CollectorConfig::load_with_path(config_path).context("load config failed")?;
    config.validate().context("config validation failed")?;

    let transport: Arc<dyn Transport> =
        Arc::new(HttpTransport::new(&config.api).context("http client init failed")?);
    let store = EntryStore::new(&config.entry_path);

    match mode {
        Mode::Setup => run_setup(&store, transport, &config).await,
        Mode::Reauth => run_reauth(&store, transport, &config).await,
        Mode::Run => run_collector(&store, transport, &config).await,
    }
}

async fn run_setup(store: &EntryStore, transport: Arc<dyn Transport>, config: &CollectorConfig) -> Result<()> {
    match flow::create_entry(store, transport, &config.api, entry_input_from_env()).await {
        Ok(entry) => {
            info!(title = %entry.title, path = %store.path().display(), "setup complete");
            Ok(())
        }
        Err(FlowError::AlreadyConfigured(device_sn)) => {
            warn!(%device_sn, "already configured; use --reauth to replace credentials");
            Ok(())
        }
        Err(err) => Err(err).context("setup failed"),
    }
}

async fn run_reauth(store: &EntryStore, transport: Arc<dyn Transport>, config: &CollectorConfig) -> Result<()> {
    let entry = flow::reauthenticate(store, transport, &config.api, credentials_from_env())
        .await
        .context("reauthentication failed")?;
    info!(device_sn = %entry.unique_id(), "reauth successful");
    Ok(())
}

async fn run_collector(store: &EntryStore, transport: Arc<dyn Transport>, config: &CollectorConfig) -> Result<()> {
    let entry = store
        .load()
        .context("load config entry failed")?
        .with_context(|| {
            format!(
                "no config entry at {}; run with --setup first",
                store.path().display()
            )
        })?;

    let metrics = install_metrics();
    let mut shutdown_signal = std::pin::pin!(tokio::signal::ctrl_c());

    let mut attempt: u32 = 0;
    let runtime = loop {
        match setup_entry(entry.clone(), config, Arc::clone(&transport)).await {
            Ok(runtime) => break runtime,
            Err(err) if err.requires_reauth() => {
                error!(error = %err, "credentials rejected; run with --reauth");
                return Err(err).context("config entry setup failed");
            }
            Err(err) => {
                attempt = attempt.saturating_add(1);
                let delay = setup_retry_delay(attempt);
                warn!(error = %err, attempt, retry_ms = delay.as_millis(), "config entry not ready");
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = &mut shutdown_signal => {
                        info!("shutdown signal received");
                        return Ok(());
                    }
                }
            }
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_handle = start_http(config, &runtime, metrics, shutdown_rx.clone())?;
    let state_handle = tokio::spawn(watch_state(runtime_state(&runtime), shutdown_rx.clone()));

    notify_ready();
    let watchdog_handle = start_watchdog(shutdown_rx);

    let _ = (&mut shutdown_signal).await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    if !unload_entry(runtime).await {
        warn!("config entry did not unload cleanly");
    }
    if let Some(handle) = server_handle {
        match handle.await {
            Ok(Err(err)) => warn!(error = %err, "http server exited with error"),
            Err(err) => warn!(error = %err, "http server task failed"),
            Ok(Ok(())) => {}
        }
    }
    let _ = state_handle.await;
    if let Some(handle) = watchdog_handle {
        let _ = handle.await;
    }
    Ok(())
}

fn start_http(
    config: &CollectorConfig,
    runtime: &EntryRuntime,
    metrics: Option<PrometheusHandle>,
    shutdown: watch::Receiver<bool>,
) -> Result<Option<tokio::task::JoinHandle<Result<()>>>> {
    let Some(addr) = config.listen_addr()? else {
        return Ok(None);
    };
    let state = AppState::new(runtime, metrics);
    Ok(Some(tokio::spawn(server::serve(addr, state, shutdown))))
}

fn runtime_state(runtime: &EntryRuntime) -> (String, watch::Receiver<CoordinatorState>) {
    (
        runtime.entry.unique_id().to_string(),
        runtime.coordinator.subscribe_state(),
    )
}

/// Logs state transitions and asks for reauth once credentials are rejected.
async fn watch_state(
    (device_sn, mut state): (String, watch::Receiver<CoordinatorState>),
    mut shutdown: watch::Receiver<bool>,
) {
    let mut previous = *state.borrow_and_update();
    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                if current == previous || current == CoordinatorState::Refreshing {
                    continue;
                }
                match current {
                    CoordinatorState::AuthFailed => {
                        warn!(%device_sn, "credentials rejected; run with --reauth");
                    }
                    CoordinatorState::Ready if previous == CoordinatorState::UpdateFailed => {
                        info!(%device_sn, "data source recovered");
                    }
                    _ => {}
                }
                previous = current;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

fn install_metrics() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(err) => {
            warn!(error = %err, "prometheus recorder install failed");
            None
        }
    }
}

fn setup_retry_delay(attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(31);
    let delay = SETUP_RETRY_BASE_MS.saturating_mul(1u64 << shift);
    Duration::from_millis(delay.min(SETUP_RETRY_MAX_MS))
}

fn parse_args() -> (Option<String>, Mode) {
    let mut config_path = None;
    let mut mode = Mode::Run;
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config_path = args.next(),
            "--setup" => mode = Mode::Setup,
            "--reauth" => mode = Mode::Reauth,
            other => {
                if let Some(path) = other.strip_prefix("--config=") {
                    config_path = Some(path.to_string());
                } else {
                    warn!(arg = other, "ignoring unknown argument");
                }
            }
        }
    }
    (config_path, mode)
}

#[cfg(target_os = "linux")]
fn notify_ready() {
    if let Err(err) = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]) {
        warn!(error = %err, "systemd ready notify failed");
    }
}

#[cfg(not(target_os = "linux"))]
fn notify_ready() {}

#[cfg(target_os = "linux")]
fn start_watchdog(
    mut shutdown: watch::Receiver<bool>,
) -> Option<tokio::task::JoinHandle<()>> {
    let interval = watchdog_interval()?;
    Some(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sleep(interval) => {
                    if let Err(err) = sd_notify::notify(false, &[sd_notify::NotifyState::Watchdog]) {
                        warn!(error = %err, "systemd watchdog notify failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }))
}

#[cfg(not(target_os = "linux"))]
fn start_watchdog(_shutdown: watch::Receiver<bool>) -> Option<tokio::task::JoinHandle<()>> {
    None
}

#[cfg(target_os = "linux")]
fn watchdog_interval() -> Option<Duration> {
    let watchdog_usec = env::var("WATCHDOG_USEC").ok()?.parse::<u64>().ok()?;
    if let Some(pid) = env::var("WATCHDOG_PID")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
    {
        if pid != std::process::id() {
            return None;
        }
    }

    let interval = watchdog_usec.saturating_div(2).max(100_000);
    Some(Duration::from_micros(interval))
}
