//! Connection lifecycle integration tests
//!
//! Runs a client against an in-process mock device and checks:
//! - Idempotent connect and disconnect
//! - State change notifications
//! - Handshake and transport failures
//! - Manual and watchdog-driven reconnects

mod mock_device;

use denon_heos::{
    ConnectionState, EventReceiver, HeosClient, HeosConfig, HeosError, HeosEvent,
};
use futures_util::future::join_all;
use mock_device::MockDevice;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;

// =============================================================================
// Test utilities
// =============================================================================

/// Wait for a matching notification, skipping others
async fn expect_event<F>(rx: &mut EventReceiver, predicate: F, timeout_ms: u64) -> Option<HeosEvent>
where
    F: Fn(&HeosEvent) -> bool,
{
    timeout(Duration::from_millis(timeout_ms), async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return Some(event),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Drain the state changes currently queued
fn drain_states(rx: &mut EventReceiver) -> Vec<ConnectionState> {
    let mut states = Vec::new();
    while let Ok(Some(event)) = rx.try_recv() {
        if let HeosEvent::StateChanged(state) = event {
            states.push(state);
        }
    }
    states
}

async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

// =============================================================================
// Connect and disconnect
// =============================================================================

#[tokio::test]
async fn connect_registers_for_change_events() {
    let device = MockDevice::start().await;
    let client = device.client();
    assert_eq!(client.state().await, ConnectionState::Disconnected);

    client.connect().await.unwrap();
    assert_eq!(client.state().await, ConnectionState::Connected);
    assert_eq!(device.received(), vec!["system/register_for_change_events?enable=on"]);

    client.disconnect().await.unwrap();
    assert_eq!(client.state().await, ConnectionState::Disconnected);
}

#[tokio::test]
async fn concurrent_connects_share_one_socket() {
    let device = MockDevice::start().await;
    let client = device.client();

    let results = join_all((0..5).map(|_| {
        let client = client.clone();
        async move { client.connect().await }
    }))
    .await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(device.accepts(), 1);
    assert_eq!(device.commands(), vec!["system/register_for_change_events"]);
}

#[tokio::test]
async fn connect_when_connected_is_noop() {
    let device = MockDevice::start().await;
    let client = device.client();
    client.connect().await.unwrap();

    let mut events = client.subscribe();
    client.connect().await.unwrap();

    assert_eq!(device.accepts(), 1);
    assert!(drain_states(&mut events).is_empty());
}

#[tokio::test]
async fn disconnect_when_disconnected_is_noop() {
    let device = MockDevice::start().await;
    let client = device.client();
    let mut events = client.subscribe();

    client.disconnect().await.unwrap();

    assert_eq!(client.state().await, ConnectionState::Disconnected);
    assert!(drain_states(&mut events).is_empty());
    assert_eq!(device.accepts(), 0);
}

#[tokio::test]
async fn state_changes_are_announced_in_order() {
    let device = MockDevice::start().await;
    let client = device.client();
    let mut events = client.subscribe();

    client.connect().await.unwrap();
    client.disconnect().await.unwrap();

    assert_eq!(
        drain_states(&mut events),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnecting,
            ConnectionState::Disconnected,
        ]
    );
}

#[tokio::test]
async fn failed_handshake_leaves_client_disconnected() {
    let device = MockDevice::start().await;
    device.fail_handshake(true);
    let client = device.client();

    let err = client.connect().await.unwrap_err();
    match err {
        HeosError::Device { eid, text } => {
            assert_eq!(eid, Some(2));
            assert_eq!(text, "Invalid ID");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(client.state().await, ConnectionState::Disconnected);

    // The next attempt starts from scratch
    device.fail_handshake(false);
    client.connect().await.unwrap();
    assert_eq!(device.accepts(), 2);
}

#[tokio::test]
async fn silent_handshake_times_out() {
    let device = MockDevice::start().await;
    device.set_silent(true);
    let client = device.client();

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, HeosError::Timeout));
    assert_eq!(client.state().await, ConnectionState::Disconnected);
}

#[tokio::test]
async fn refused_connection_is_transport_error() {
    let port = unused_port().await;
    let config = HeosConfig::default().with_port(port);
    let client = HeosClient::with_config("127.0.0.1", config);

    let err = client.connect().await.unwrap_err();
    assert!(err.is_transport());
    assert_eq!(client.state().await, ConnectionState::Disconnected);
}

#[tokio::test]
async fn commands_fail_fast_without_connection() {
    let device = MockDevice::start().await;
    let client = device.client();

    let err = client.heart_beat().await.unwrap_err();
    assert!(matches!(err, HeosError::NotConnected));
    assert_eq!(device.accepts(), 0);
}

#[tokio::test]
async fn concurrent_disconnects_share_one_close() {
    let device = MockDevice::start().await;
    device.linger_on_close(Duration::from_millis(200));
    let client = device.client();
    client.connect().await.unwrap();
    let mut events = client.subscribe();

    let results = join_all((0..3).map(|_| {
        let client = client.clone();
        async move { client.disconnect().await }
    }))
    .await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(
        drain_states(&mut events),
        vec![ConnectionState::Disconnecting, ConnectionState::Disconnected]
    );
}

#[tokio::test]
async fn connect_while_disconnecting_waits_then_reopens() {
    let device = MockDevice::start().await;
    device.linger_on_close(Duration::from_millis(300));
    let client = device.client();
    client.connect().await.unwrap();
    let mut events = client.subscribe();

    let closer = {
        let client = client.clone();
        tokio::spawn(async move { client.disconnect().await })
    };
    let closing = expect_event(
        &mut events,
        |e| matches!(e, HeosEvent::StateChanged(ConnectionState::Disconnecting)),
        1000,
    )
    .await;
    assert!(closing.is_some());

    client.connect().await.unwrap();
    closer.await.unwrap().unwrap();

    assert_eq!(client.state().await, ConnectionState::Connected);
    assert_eq!(device.accepts(), 2);
    assert_eq!(
        drain_states(&mut events),
        vec![
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
        ]
    );
}

#[tokio::test]
async fn disconnect_while_connecting_waits_for_outcome() {
    let device = MockDevice::start().await;
    device.delay_next_reply(Duration::from_millis(300));
    let config = device.config().with_watchdog_interval(Duration::from_millis(50));
    let client = HeosClient::with_config("127.0.0.1", config);
    let mut events = client.subscribe();

    let opener = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };
    let connecting = expect_event(
        &mut events,
        |e| matches!(e, HeosEvent::StateChanged(ConnectionState::Connecting)),
        1000,
    )
    .await;
    assert!(connecting.is_some());

    client.disconnect().await.unwrap();
    opener.await.unwrap().unwrap();

    assert_eq!(client.state().await, ConnectionState::Disconnected);
    assert_eq!(
        drain_states(&mut events),
        vec![
            ConnectionState::Connected,
            ConnectionState::Disconnecting,
            ConnectionState::Disconnected,
        ]
    );

    // The watchdog started by that connect does not outlive the disconnect
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(device.accepts(), 1);
    assert_eq!(client.state().await, ConnectionState::Disconnected);
}

// =============================================================================
// Reconnect
// =============================================================================

#[tokio::test]
async fn reconnect_announces_progress() {
    let device = MockDevice::start().await;
    let client = device.client();
    client.connect().await.unwrap();
    let mut events = client.subscribe();

    client.reconnect().await.unwrap();

    let mut seen = Vec::new();
    while let Ok(Some(event)) = events.try_recv() {
        seen.push(event);
    }
    assert!(matches!(seen.first(), Some(HeosEvent::Reconnecting)));
    assert!(matches!(seen.last(), Some(HeosEvent::Reconnected)));
    assert_eq!(client.state().await, ConnectionState::Connected);
    assert_eq!(device.accepts(), 2);
}

#[tokio::test]
async fn concurrent_reconnects_share_one_attempt() {
    let device = MockDevice::start().await;
    let client = device.client();
    client.connect().await.unwrap();
    let mut events = client.subscribe();

    let results = join_all((0..3).map(|_| {
        let client = client.clone();
        async move { client.reconnect().await }
    }))
    .await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(device.accepts(), 2);

    let mut reconnecting = 0;
    let mut reconnected = 0;
    while let Ok(Some(event)) = events.try_recv() {
        match event {
            HeosEvent::Reconnecting => reconnecting += 1,
            HeosEvent::Reconnected => reconnected += 1,
            _ => {}
        }
    }
    assert_eq!((reconnecting, reconnected), (1, 1));
}

#[tokio::test]
async fn failed_reconnect_is_reported() {
    let device = MockDevice::start().await;
    let client = device.client();
    client.connect().await.unwrap();
    let mut events = client.subscribe();

    device.fail_handshake(true);
    assert!(client.reconnect().await.is_err());

    let event =
        expect_event(&mut events, |e| matches!(e, HeosEvent::ReconnectError(_)), 1000).await;
    assert!(event.is_some());
    assert_eq!(client.state().await, ConnectionState::Disconnected);
}

#[tokio::test]
async fn device_hangup_moves_to_disconnected() {
    let device = MockDevice::start().await;
    let client = device.client();
    client.connect().await.unwrap();
    let mut events = client.subscribe();

    device.hang_up();

    let event = expect_event(
        &mut events,
        |e| matches!(e, HeosEvent::StateChanged(ConnectionState::Disconnected)),
        1000,
    )
    .await;
    assert!(event.is_some());
    assert!(matches!(client.heart_beat().await, Err(HeosError::NotConnected)));
}

#[tokio::test]
async fn watchdog_reconnects_after_hangup() {
    let device = MockDevice::start().await;
    let config = device.config().with_watchdog_interval(Duration::from_millis(100));
    let client = HeosClient::with_config("127.0.0.1", config);
    client.connect().await.unwrap();
    let mut events = client.subscribe();

    device.hang_up();

    let event = expect_event(&mut events, |e| matches!(e, HeosEvent::Reconnected), 3000).await;
    assert!(event.is_some());
    assert_eq!(client.state().await, ConnectionState::Connected);
    assert_eq!(device.accepts(), 2);

    client.heart_beat().await.unwrap();
    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn watchdog_probes_while_connected() {
    let device = MockDevice::start().await;
    let config = device.config().with_watchdog_interval(Duration::from_millis(50));
    let client = HeosClient::with_config("127.0.0.1", config);
    client.connect().await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    let beats = device
        .commands()
        .iter()
        .filter(|c| *c == "system/heart_beat")
        .count();
    assert!(beats >= 2, "expected heartbeats, saw {}", beats);
    assert_eq!(device.accepts(), 1);
}

#[tokio::test]
async fn disconnect_stops_watchdog() {
    let device = MockDevice::start().await;
    let config = device.config().with_watchdog_interval(Duration::from_millis(50));
    let client = HeosClient::with_config("127.0.0.1", config);
    client.connect().await.unwrap();
    client.disconnect().await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(client.state().await, ConnectionState::Disconnected);
    assert_eq!(device.accepts(), 1);
}

#[tokio::test]
async fn set_address_applies_on_next_connect() {
    let device = MockDevice::start().await;
    let client = HeosClient::with_config("127.0.0.2", device.config());
    assert_eq!(client.address(), "127.0.0.2");

    client.set_address("127.0.0.1");
    assert_eq!(client.address(), "127.0.0.1");
    assert_eq!(client.telnet().address(), "127.0.0.1");

    client.connect().await.unwrap();
    assert_eq!(device.accepts(), 1);
}
