// tests/integration/session_test.rs

//! Player binding over real connections: login, supersede, push and close cleanup.

use super::test_helpers::*;
use bytes::Bytes;
use gatecore::config::UnboundSessionPolicy;
use gatecore::core::protocol::{ErrorCode, Payload};
use std::time::Duration;

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached within two seconds");
}

#[tokio::test]
async fn test_login_binds_and_push_reaches_player() {
    let ts = TestServer::start().await;
    let mut client = ts.client().await;
    client.login(1001, 1).await;

    assert!(ts.server.sessions().is_online(1001));
    client.send(WHOAMI_MSG_ID, 2, Bytes::new()).await;
    let reply = client.expect_frame().await;
    assert_eq!(reply.sequence, 2);
    assert_eq!(Login::decode(reply.payload).unwrap().0, 1001);

    assert!(ts.server.sender().send_to_player(1001, 500, 0, Bytes::from_static(b"push")));
    let pushed = client.expect_frame().await;
    assert_eq!(pushed.msg_id, 500);
    assert_eq!(&pushed.payload[..], b"push");

    assert!(!ts.server.sender().send_to_player(4242, 500, 0, Bytes::new()));

    ts.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_second_login_supersedes_first_connection() {
    let mut config = test_config();
    config.unbound_session_policy = UnboundSessionPolicy::Reject;
    let ts = TestServer::with_config(config).await;

    let mut first = ts.client().await;
    first.login(77, 1).await;
    let first_conn = ts.server.sessions().get(77).unwrap();

    let mut second = ts.client().await;
    second.login(77, 1).await;
    let current = ts.server.sessions().get(77).unwrap();
    assert!(!current.same_connection(&first_conn));
    assert_eq!(ts.server.sessions().online_count(), 1);

    // The old connection is still open but no longer carries the player.
    first.send(WHOAMI_MSG_ID, 2, Bytes::new()).await;
    let reply = first.expect_frame().await;
    assert_eq!(error_reply(&reply).error_code(), Some(ErrorCode::NoSession));
    first.send(ECHO_MSG_ID, 3, Bytes::from_static(b"alive")).await;
    assert_eq!(first.expect_frame().await.msg_id, ECHO_MSG_ID);

    // Closing the superseded connection leaves the new session alone.
    drop(first);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(ts.server.sessions().is_online(77));

    second.send(WHOAMI_MSG_ID, 4, Bytes::new()).await;
    let reply = second.expect_frame().await;
    assert_eq!(Login::decode(reply.payload).unwrap().0, 77);

    ts.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_closing_connection_unbinds_player() {
    let ts = TestServer::start().await;
    let mut client = ts.client().await;
    client.login(5, 1).await;
    assert!(ts.server.sessions().is_online(5));

    drop(client);
    let sessions = ts.server.sessions().clone();
    wait_until(|| !sessions.is_online(5)).await;
    let connections = ts.server.connections().clone();
    wait_until(|| connections.is_empty()).await;

    ts.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_policy_closes_unbound_connection() {
    let mut config = test_config();
    config.unbound_session_policy = UnboundSessionPolicy::Disconnect;
    let ts = TestServer::with_config(config).await;

    let mut client = ts.client().await;
    client.send(WHOAMI_MSG_ID, 1, Bytes::new()).await;
    assert!(client.is_closed_by_server().await);

    ts.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_broadcast_reaches_every_bound_player() {
    let ts = TestServer::start().await;
    let mut a = ts.client().await;
    let mut b = ts.client().await;
    let mut anonymous = ts.client().await;
    a.login(1, 1).await;
    b.login(2, 1).await;

    assert_eq!(ts.server.sender().broadcast(600, Bytes::from_static(b"news")), 2);
    for client in [&mut a, &mut b] {
        let frame = client.expect_frame().await;
        assert_eq!(frame.msg_id, 600);
        assert_eq!(frame.sequence, 0);
    }

    // The anonymous connection got nothing: its next frame is the echo.
    anonymous.send(ECHO_MSG_ID, 9, Bytes::new()).await;
    assert_eq!(anonymous.expect_frame().await.sequence, 9);

    ts.server.shutdown().await.unwrap();
}
