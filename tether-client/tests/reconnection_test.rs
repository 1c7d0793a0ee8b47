//! Client reconnection integration tests
//!
//! Abnormal closures, backoff and giving up, against a real socket.

mod common;

use common::{eventually, MockWsServer};
use serde_json::json;
use std::time::Duration;
use tether_client::{
    ClientBuilder, ClientEvent, ConnectionState, Error, ExponentialBackoff, FixedDelay,
    ReconnectionScheduler,
};

#[tokio::test]
async fn test_reconnect_after_connection_drop() {
    let server = MockWsServer::new().await;
    let client = ClientBuilder::new(server.url())
        .reconnect_base_delay(Duration::from_millis(50))
        .connect()
        .await
        .unwrap();
    let mut events = client.events();

    server.drop_connections();

    assert!(eventually(|| server.connections() == 2).await);
    assert!(eventually(|| client.is_connected()).await);
    assert_eq!(client.stats().await.reconnect_attempts, 0);

    let mut scheduled = None;
    while let Ok(event) = events.try_recv() {
        if let ClientEvent::ReconnectScheduled { attempt, delay } = event {
            scheduled = Some((attempt, delay));
        }
    }
    assert_eq!(scheduled, Some((1, Duration::from_millis(50))));

    // Requests flow over the new connection.
    assert!(client.send("system.health", ()).await.is_ok());

    server.shutdown().await;
}

#[tokio::test]
async fn test_pending_request_rejected_on_drop() {
    let mut server = MockWsServer::with_handler(|_| async { None }).await;
    let client = ClientBuilder::new(server.url())
        .reconnect_base_delay(Duration::from_millis(50))
        .connect()
        .await
        .unwrap();

    let caller = client.clone();
    let pending = tokio::spawn(async move { caller.send("chat.completion", json!({"prompt": "hi"})).await });
    assert!(server.wait_for_method("chat.completion").await.is_some());

    server.drop_connections();

    let err = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, Error::ClientClosed { .. }), "got {:?}", err);

    server.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_gives_up_after_max_attempts() {
    let server = MockWsServer::new().await;
    let client = ClientBuilder::new(server.url())
        .reconnect_base_delay(Duration::from_millis(20))
        .max_reconnect_attempts(2)
        .connect()
        .await
        .unwrap();
    let mut events = client.events();

    server.shutdown().await;

    assert!(eventually(|| client.state() == ConnectionState::Error).await);
    assert_eq!(client.stats().await.reconnect_attempts, 2);

    let mut delays = Vec::new();
    let mut exhausted = false;
    while let Ok(event) = events.try_recv() {
        match event {
            ClientEvent::ReconnectScheduled { delay, .. } => delays.push(delay),
            ClientEvent::Error(Error::ReconnectExhausted { attempts }) => {
                assert_eq!(attempts, 2);
                exhausted = true;
            }
            _ => {}
        }
    }
    assert_eq!(delays, vec![Duration::from_millis(20), Duration::from_millis(40)]);
    assert!(exhausted);
}

#[tokio::test]
async fn test_custom_strategy() {
    let server = MockWsServer::new().await;
    let client = ClientBuilder::new(server.url())
        .with_reconnect(Box::new(FixedDelay::new(Duration::from_millis(30)).with_max_attempts(1)))
        .connect()
        .await
        .unwrap();
    let mut events = client.events();

    server.drop_connections();
    assert!(eventually(|| server.connections() == 2).await);

    let delay = loop {
        match tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap() {
            ClientEvent::ReconnectScheduled { delay, .. } => break delay,
            _ => continue,
        }
    };
    assert_eq!(delay, Duration::from_millis(30));

    server.shutdown().await;
}

#[tokio::test]
async fn test_without_reconnect() {
    let server = MockWsServer::new().await;
    let client = ClientBuilder::new(server.url())
        .without_reconnect()
        .connect()
        .await
        .unwrap();

    server.drop_connections();

    assert!(eventually(|| client.state() == ConnectionState::Disconnected).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.connections(), 1);
    assert!(!client.is_connected());

    server.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_stops_reconnecting() {
    let server = MockWsServer::new().await;
    let client = ClientBuilder::new(server.url())
        .reconnect_base_delay(Duration::from_millis(300))
        .connect()
        .await
        .unwrap();

    server.drop_connections();
    assert!(eventually(|| client.state() == ConnectionState::Reconnecting).await);

    client.disconnect().await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(server.connections(), 1);

    server.shutdown().await;
}

#[test]
fn test_backoff_sequence() {
    let strategy = ExponentialBackoff::new(Duration::from_millis(1000)).with_max_attempts(3);
    let mut scheduler = ReconnectionScheduler::new(Box::new(strategy));

    let delays: Vec<_> = std::iter::from_fn(|| scheduler.schedule_next()).collect();
    assert_eq!(
        delays,
        vec![
            Duration::from_millis(1000),
            Duration::from_millis(2000),
            Duration::from_millis(4000),
        ]
    );
    assert_eq!(scheduler.attempts(), 3);

    scheduler.reset();
    assert_eq!(scheduler.attempts(), 0);
    assert_eq!(scheduler.schedule_next(), Some(Duration::from_millis(1000)));
}
