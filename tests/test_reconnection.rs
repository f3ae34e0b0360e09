//! Reconnection behavior
//!
//! Scripted handshake outcomes drive the supervisor through retries,
//! credential rejection and shutdown during backoff.


use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use test_helpers::*;
use wegnology_device::testing::{MockTransport, OpenBehavior};
use wegnology_device::{ClientError, ConnectionState, ReconnectConfig};

const COMMAND_TOPIC: &str = "my-device-id/command";

#[tokio::test]
async fn test_reconnects_after_lost_session_and_resubscribes_once() {
    let transport = MockTransport::new();
    let client = connected_client(&transport).await;

    client
        .on_message("fleet/+/announce", |_: &str, _: &[u8]| {})
        .await
        .unwrap();
    client
        .on_message("fleet/+/announce", |_: &str, _: &[u8]| {})
        .await
        .unwrap();

    eventually("initial subscriptions", || {
        transport.subscription_count(COMMAND_TOPIC) == 1
    })
    .await;
    assert_eq!(transport.subscription_count("fleet/+/announce"), 1);

    transport.inject_disconnect("connection reset by peer");

    eventually("second session established", || {
        transport.open_attempts() == 2 && client.is_connected()
    })
    .await;
    eventually("subscriptions re-established", || {
        transport.subscription_count(COMMAND_TOPIC) == 2
    })
    .await;

    // Exactly once per distinct pattern per session
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(transport.subscription_count(COMMAND_TOPIC), 2);
    assert_eq!(transport.subscription_count("fleet/+/announce"), 2);
    assert_eq!(transport.subscriptions().len(), 4);
    assert_eq!(client.health().reconnect_count, 1);
}

#[tokio::test]
async fn test_commands_flow_again_after_reconnect() {
    let transport = MockTransport::new();
    let client = connected_client(&transport).await;

    let commands = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&commands);
    client.on_command(move |_| {
        count.fetch_add(1, Ordering::SeqCst);
    });

    transport.inject_disconnect("keep-alive timeout");
    eventually("reconnected", || {
        transport.open_attempts() == 2 && client.is_connected()
    })
    .await;

    transport.inject_message(COMMAND_TOPIC, r#"{"name":"reboot"}"#);
    eventually("command after reconnect", || commands.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test]
async fn test_lifecycle_events_on_reconnect() {
    let transport = MockTransport::new();
    let client = mock_client(&transport);

    let connects = Arc::new(AtomicUsize::new(0));
    let reasons = Arc::new(Mutex::new(Vec::new()));

    let count = Arc::clone(&connects);
    client.on_connect(move || {
        count.fetch_add(1, Ordering::SeqCst);
    });
    let sink = Arc::clone(&reasons);
    client.on_disconnect(move |reason| sink.lock().unwrap().push(reason.to_string()));

    client.connect().unwrap();
    client.wait_until_connected(WAIT).await.unwrap();
    assert_eq!(connects.load(Ordering::SeqCst), 1);

    transport.inject_disconnect("network down");
    eventually("reconnected", || connects.load(Ordering::SeqCst) == 2).await;

    let reasons = reasons.lock().unwrap().clone();
    assert_eq!(reasons.len(), 1);
    assert!(reasons[0].contains("network down"), "reason was {}", reasons[0]);
}

#[tokio::test]
async fn test_unreachable_broker_is_retried_until_it_answers() {
    let transport = MockTransport::with_open_script([
        OpenBehavior::Fail("connection refused".to_string()),
        OpenBehavior::Fail("connection refused".to_string()),
    ]);
    let client = mock_client(&transport);

    client.connect().unwrap();
    client.wait_until_connected(WAIT).await.unwrap();

    assert_eq!(transport.open_attempts(), 3);
    eventually("subscribed after success", || {
        transport.subscription_count(COMMAND_TOPIC) == 1
    })
    .await;
}

#[tokio::test]
async fn test_backoff_grows_between_attempts() {
    let transport = MockTransport::with_open_script([
        OpenBehavior::Fail("down".to_string()),
        OpenBehavior::Fail("down".to_string()),
        OpenBehavior::Fail("down".to_string()),
    ]);
    let client = mock_client_with(
        &transport,
        ReconnectConfig {
            initial_delay_ms: 20,
            max_delay_ms: 1_000,
            multiplier: 2,
        },
    );

    let started = Instant::now();
    client.connect().unwrap();
    client.wait_until_connected(WAIT).await.unwrap();

    // 20ms + 40ms + 80ms of backoff before the fourth attempt
    assert!(started.elapsed() >= Duration::from_millis(140));
    assert_eq!(transport.open_attempts(), 4);
}

#[tokio::test]
async fn test_auth_rejection_fails_without_retry() {
    let transport =
        MockTransport::with_open_script([OpenBehavior::RejectAuth("BadUserNamePassword".to_string())]);
    let client = mock_client(&transport);

    let auth_errors = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&auth_errors);
    client.on_error(move |error| {
        if matches!(error, ClientError::Auth { .. }) {
            count.fetch_add(1, Ordering::SeqCst);
        }
    });

    client.connect().unwrap();
    let result = client.wait_until_connected(WAIT).await;
    assert!(matches!(result, Err(ClientError::Auth { ref reason }) if reason == "BadUserNamePassword"));

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(
        client.state(),
        ConnectionState::Failed {
            reason: "BadUserNamePassword".to_string()
        }
    );
    assert!(!client.is_connected());
    assert_eq!(transport.open_attempts(), 1);
    assert_eq!(auth_errors.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_connect_after_failure_starts_fresh() {
    let transport =
        MockTransport::with_open_script([OpenBehavior::RejectAuth("NotAuthorized".to_string())]);
    let client = mock_client(&transport);

    client.connect().unwrap();
    assert!(client.wait_until_connected(WAIT).await.is_err());

    // Credentials fixed on the platform side; the script is exhausted so the next handshake succeeds
    client.connect().unwrap();
    client.wait_until_connected(WAIT).await.unwrap();
    assert_eq!(transport.open_attempts(), 2);
}

#[tokio::test]
async fn test_disconnect_cancels_pending_backoff() {
    let transport = MockTransport::with_open_script([OpenBehavior::Fail("down".to_string())]);
    let client = mock_client_with(
        &transport,
        ReconnectConfig {
            initial_delay_ms: 60_000,
            max_delay_ms: 60_000,
            multiplier: 2,
        },
    );

    client.connect().unwrap();
    eventually("backoff pending", || {
        client.state() == ConnectionState::Reconnecting { attempt: 1 }
    })
    .await;

    let stopped = tokio::time::timeout(Duration::from_secs(1), client.disconnect()).await;
    assert!(stopped.is_ok(), "disconnect must not wait for the backoff timer");
    assert_eq!(client.state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(transport.open_attempts(), 1);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_disconnect_suppresses_reconnect() {
    let transport = MockTransport::new();
    let client = connected_client(&transport).await;

    client.disconnect().await;
    transport.inject_disconnect("late network error");

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(transport.open_attempts(), 1);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(transport.close_count() >= 1);
}
