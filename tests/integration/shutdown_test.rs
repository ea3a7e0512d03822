// tests/integration/shutdown_test.rs

//! Graceful shutdown of a live server: in-flight handlers finish, late frames are turned
//! away, connections are closed last.

use super::test_helpers::*;
use bytes::Bytes;
use gatecore::core::protocol::ErrorCode;
use gatecore::core::shutdown::ShutdownState;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::net::TcpStream;

#[tokio::test]
async fn test_in_flight_handler_completes_and_reply_is_delivered() {
    let ts = TestServer::start().await;
    let mut client = ts.client().await;

    client.send(SLOW_MSG_ID, 1, Bytes::from_static(b"slow")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let slow_completed = ts.slow_completed.clone();
    let report = ts.server.shutdown().await.unwrap();
    assert!(report.is_clean(), "unexpected report: {report:?}");
    assert_eq!(slow_completed.load(Ordering::SeqCst), 1);

    let reply = client.expect_frame().await;
    assert_eq!(reply.msg_id, SLOW_MSG_ID);
    assert_eq!(&reply.payload[..], b"slow");
    assert!(client.is_closed_by_server().await);
}

#[tokio::test]
async fn test_frames_during_drain_get_shutting_down() {
    let ts = TestServer::start().await;
    let mut client = ts.client().await;

    client.send(SLOW_MSG_ID, 1, Bytes::new()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let coordinator = ts.server.coordinator().clone();
    let draining = tokio::spawn(async move { coordinator.shutdown().await });

    // Pools stop taking work shortly after the shutdown starts; until then echoes succeed.
    let mut saw_shutting_down = false;
    for sequence in 2..100 {
        client.send(ECHO_MSG_ID, sequence, Bytes::new()).await;
        let reply = client.expect_frame().await;
        if reply.msg_id == SLOW_MSG_ID {
            break;
        }
        if reply.msg_id != ECHO_MSG_ID {
            assert_eq!(reply.sequence, sequence);
            assert_eq!(error_reply(&reply).error_code(), Some(ErrorCode::ShuttingDown));
            saw_shutting_down = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(saw_shutting_down);

    let report = draining.await.unwrap();
    assert!(report.is_clean());
    assert_eq!(ts.server.coordinator().state(), ShutdownState::Stopped);

    // A second shutdown returns the same report.
    let again = ts.server.shutdown().await.unwrap();
    assert_eq!(again, report);
}

#[tokio::test]
async fn test_listener_stops_accepting() {
    let ts = TestServer::start().await;
    let addr = ts.addr();
    ts.server.shutdown().await.unwrap();

    // Either the connect is refused or the socket is closed straight away.
    if let Ok(stream) = TcpStream::connect(addr).await {
        let mut client = TestClient::from_stream(stream);
        assert!(client.is_closed_by_server().await);
    }
}

#[tokio::test]
async fn test_drain_timeout_abandons_stuck_handler() {
    let mut config = test_config();
    config.shutdown_drain_timeout_secs = 0;
    let ts = TestServer::with_config(config).await;
    let mut client = ts.client().await;

    client.send(SLOW_MSG_ID, 1, Bytes::new()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let report = ts.server.shutdown().await.unwrap();
    assert_eq!(report.abandoned(), 1);
    assert!(!report.is_clean());
    assert!(client.is_closed_by_server().await);
}
