use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;

use coordinator::{Coordinator, CoordinatorConfig, CoordinatorState, RefreshError};
use solarman_client::mock::{data_ok, failure, token_ok, MockTransport};
use solarman_client::{ClientConfig, Credentials, SolarmanClient};
use types::DeviceIdentity;

fn coordinator_with(transport: Arc<MockTransport>, config: CoordinatorConfig) -> Coordinator {
    let credentials = Credentials::new("owner@example.com", "hunter2", "app-123", "s3cret");
    let client = SolarmanClient::new(transport, credentials, &ClientConfig::default());
    Coordinator::new(
        Arc::new(client),
        DeviceIdentity::new("2306123456", "X"),
        config,
    )
}

#[tokio::test]
async fn successful_refresh_caches_payload_and_notifies() {
    let transport = Arc::new(MockTransport::new());
    transport.push_token(token_ok("tok-1", 7200));
    transport.push_data(data_ok(&[("APo_t1", json!("1200.5"))]));
    let coordinator = coordinator_with(transport, CoordinatorConfig::default());
    let mut updates = coordinator.subscribe();

    assert_eq!(coordinator.state(), CoordinatorState::Uninitialized);
    assert!(coordinator.data().is_none());

    let payload = coordinator.first_refresh().await.expect("first refresh");

    assert!(updates.has_changed().expect("sender alive"));
    let seen = updates.borrow_and_update().clone().expect("payload published");
    assert!(Arc::ptr_eq(&seen, &payload));
    assert_eq!(coordinator.state(), CoordinatorState::Ready);
    assert_eq!(
        coordinator.data().and_then(|data| data.value("APo_t1")),
        Some(1200.5)
    );
    assert!(coordinator.last_error().is_none());
}

#[tokio::test]
async fn auth_kinds_surface_as_auth_failed() {
    let token_failures = [
        ("2101021", "bad id"),
        ("2101019", "bad secret"),
        ("2101025", "invalid email or password"),
    ];

    for (code, message) in token_failures {
        let transport = Arc::new(MockTransport::new());
        transport.push_token(failure(code, message));
        let coordinator = coordinator_with(transport, CoordinatorConfig::default());

        let err = coordinator.refresh().await.expect_err("refresh must fail");
        assert_eq!(
            err,
            RefreshError::AuthFailed {
                device: "X".to_string(),
                message: message.to_string(),
            }
        );
        assert_eq!(coordinator.state(), CoordinatorState::AuthFailed);
    }
}

#[tokio::test]
async fn invalid_serial_surfaces_as_auth_failed() {
    let transport = Arc::new(MockTransport::new());
    transport.push_token(token_ok("tok-1", 7200));
    transport.push_data(failure("2101008", "no device"));
    let coordinator = coordinator_with(transport, CoordinatorConfig::default());

    let err = coordinator.first_refresh().await.expect_err("refresh must fail");

    assert_eq!(
        err,
        RefreshError::AuthFailed {
            device: "X".to_string(),
            message: "no device".to_string(),
        }
    );
    assert!(err.requires_reauth());
    assert_eq!(coordinator.last_error(), Some(err));
}

#[tokio::test]
async fn generic_api_error_surfaces_as_update_failed() {
    let transport = Arc::new(MockTransport::new());
    transport.push_token(token_ok("tok-1", 7200));
    transport.push_data(failure("2101999", "system busy"));
    let coordinator = coordinator_with(transport, CoordinatorConfig::default());

    let err = coordinator.refresh().await.expect_err("refresh must fail");

    assert_eq!(
        err,
        RefreshError::UpdateFailed {
            message: "system busy".to_string(),
        }
    );
    assert_eq!(coordinator.state(), CoordinatorState::UpdateFailed);
}

#[tokio::test]
async fn missing_token_surfaces_as_update_failed() {
    let transport = Arc::new(MockTransport::new());
    transport.push_token(json!({ "success": true }));
    let coordinator = coordinator_with(transport, CoordinatorConfig::default());

    let err = coordinator.refresh().await.expect_err("refresh must fail");
    assert!(!err.requires_reauth());
    assert_eq!(err.message(), "could not get access token");
}

#[tokio::test(start_paused = true)]
async fn slow_api_times_out_as_update_failed() {
    let transport = Arc::new(MockTransport::with_delay(Duration::from_secs(30)));
    transport.push_token(token_ok("tok-1", 7200));
    transport.push_data(data_ok(&[]));
    let coordinator = coordinator_with(transport, CoordinatorConfig::default());

    let err = coordinator.refresh().await.expect_err("refresh must time out");

    assert!(matches!(err, RefreshError::UpdateFailed { .. }));
    assert_eq!(err.message(), "request timed out after 10000ms");
    assert_eq!(coordinator.state(), CoordinatorState::UpdateFailed);
}

#[tokio::test(start_paused = true)]
async fn timeout_message_reports_configured_millis() {
    let transport = Arc::new(MockTransport::with_delay(Duration::from_secs(30)));
    transport.push_token(token_ok("tok-1", 7200));
    let config = CoordinatorConfig {
        request_timeout: Duration::from_micros(2_500_900),
        ..CoordinatorConfig::default()
    };
    let coordinator = coordinator_with(transport, config);

    let err = coordinator.refresh().await.expect_err("refresh must time out");

    assert_eq!(err.message(), "request timed out after 2500ms");
}

#[tokio::test]
async fn failure_keeps_last_good_payload_until_next_success() {
    let transport = Arc::new(MockTransport::new());
    transport.push_token(token_ok("tok-1", 7200));
    transport.push_data(data_ok(&[("Et_ge0", json!(100.0))]));
    transport.push_data(failure("2101999", "system busy"));
    transport.push_data(data_ok(&[("Et_ge0", json!(101.0))]));
    let coordinator = coordinator_with(transport, CoordinatorConfig::default());

    coordinator.first_refresh().await.expect("first refresh");
    assert!(coordinator.refresh().await.is_err());

    assert_eq!(coordinator.state(), CoordinatorState::UpdateFailed);
    assert!(coordinator.last_error().is_some());
    assert_eq!(
        coordinator.data().and_then(|data| data.value("Et_ge0")),
        Some(100.0)
    );

    coordinator.refresh().await.expect("recovery");
    assert_eq!(coordinator.state(), CoordinatorState::Ready);
    assert!(coordinator.last_error().is_none());
    assert_eq!(
        coordinator.data().and_then(|data| data.value("Et_ge0")),
        Some(101.0)
    );
}

#[tokio::test(start_paused = true)]
async fn run_loop_refreshes_each_interval_and_survives_failures() {
    let transport = Arc::new(MockTransport::new());
    transport.push_token(token_ok("tok-1", 7200));
    transport.push_data(data_ok(&[("AV1", json!("230.1"))]));
    transport.push_data(failure("2101999", "system busy"));
    transport.push_data(data_ok(&[("AV1", json!("231.4"))]));
    let coordinator = Arc::new(coordinator_with(
        transport.clone(),
        CoordinatorConfig::default(),
    ));

    coordinator.first_refresh().await.expect("first refresh");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = Arc::clone(&coordinator);
    let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

    tokio::time::sleep(Duration::from_secs(301)).await;
    assert_eq!(transport.data_calls(), 2);
    assert_eq!(coordinator.state(), CoordinatorState::UpdateFailed);

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(transport.data_calls(), 3);
    assert_eq!(coordinator.state(), CoordinatorState::Ready);
    assert_eq!(
        coordinator.data().and_then(|data| data.value("AV1")),
        Some(231.4)
    );

    shutdown_tx.send(true).expect("send shutdown");
    handle.await.expect("runner joins");
    assert_eq!(transport.token_calls(), 1);
}
