// tests/integration/dispatch_test.rs

//! End-to-end dispatch over raw TCP: routing, error replies and fault isolation.

use super::test_helpers::*;
use bytes::Bytes;
use gatecore::core::protocol::ErrorCode;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

#[tokio::test]
async fn test_echo_preserves_sequence_and_payload() {
    let ts = TestServer::start().await;
    let mut client = ts.client().await;

    client.send(ECHO_MSG_ID, 17, Bytes::from_static(b"hello")).await;
    let reply = client.expect_frame().await;
    assert_eq!(reply.msg_id, ECHO_MSG_ID);
    assert_eq!(reply.sequence, 17);
    assert_eq!(&reply.payload[..], b"hello");

    ts.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_message_gets_error_reply_and_connection_stays_open() {
    let ts = TestServer::start().await;
    let mut client = ts.client().await;

    client.send(9999, 3, Bytes::new()).await;
    let reply = client.expect_frame().await;
    assert_eq!(reply.sequence, 3);
    let err = error_reply(&reply);
    assert_eq!(err.error_code(), Some(ErrorCode::UnknownMessage));

    client.send(ECHO_MSG_ID, 4, Bytes::from_static(b"still here")).await;
    let reply = client.expect_frame().await;
    assert_eq!(reply.msg_id, ECHO_MSG_ID);
    assert_eq!(reply.sequence, 4);

    ts.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_undecodable_payload_gets_decode_error() {
    let ts = TestServer::start().await;
    let mut client = ts.client().await;

    // A login body must be exactly eight bytes.
    client.send(LOGIN_MSG_ID, 5, Bytes::from_static(&[1, 2, 3])).await;
    let reply = client.expect_frame().await;
    assert_eq!(reply.sequence, 5);
    assert_eq!(error_reply(&reply).error_code(), Some(ErrorCode::PayloadDecode));
    assert_eq!(ts.server.sessions().online_count(), 0);

    ts.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_panicking_handler_is_isolated() {
    let ts = TestServer::start().await;
    let mut client = ts.client().await;

    client.send(PANIC_MSG_ID, 11, Bytes::new()).await;
    let reply = client.expect_frame().await;
    assert_eq!(reply.sequence, 11);
    assert_eq!(error_reply(&reply).error_code(), Some(ErrorCode::InternalError));

    // Same connection, and the pool worker survived.
    for sequence in 12..20 {
        client.send(ECHO_MSG_ID, sequence, Bytes::from_static(b"ok")).await;
        let reply = client.expect_frame().await;
        assert_eq!(reply.msg_id, ECHO_MSG_ID);
        assert_eq!(reply.sequence, sequence);
    }

    ts.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_frame_split_across_writes_is_reassembled() {
    let ts = TestServer::start().await;
    let frame = gatecore::core::protocol::Frame::new(ECHO_MSG_ID, 21, &b"fragmented"[..])
        .encode_to_vec(gatecore::core::protocol::DEFAULT_MAX_FRAME_SIZE)
        .unwrap();

    let mut raw = TcpStream::connect(ts.addr()).await.unwrap();
    raw.set_nodelay(true).unwrap();
    // Fewer bytes than the sniffer needs, then the rest in two pieces.
    raw.write_all(&frame[..2]).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    raw.write_all(&frame[2..9]).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    raw.write_all(&frame[9..]).await.unwrap();

    let mut client = TestClient::from_stream(raw);
    let reply = client.expect_frame().await;
    assert_eq!(reply.sequence, 21);
    assert_eq!(&reply.payload[..], b"fragmented");

    ts.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_oversized_frame_closes_connection() {
    let mut config = test_config();
    config.max_frame_size = 64;
    let ts = TestServer::with_config(config).await;

    let mut raw = TcpStream::connect(ts.addr()).await.unwrap();
    // Declares 1 MiB; the server must not wait for the body.
    raw.write_all(&[0, 0x10, 0, 0, 0, 42, 0, 0, 0, 1]).await.unwrap();

    let mut client = TestClient::from_stream(raw);
    assert!(client.is_closed_by_server().await);

    ts.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_oversized_reply_gets_internal_error_and_connection_stays_usable() {
    let mut config = test_config();
    config.max_frame_size = 64;
    let ts = TestServer::with_config(config).await;
    let mut client = ts.client().await;

    // 20 bytes in, 80 bytes out: over the limit on the way back only.
    client.send(INFLATE_MSG_ID, 1, vec![7u8; 20]).await;
    let reply = client.expect_frame().await;
    assert_eq!(reply.sequence, 1);
    assert_eq!(error_reply(&reply).error_code(), Some(ErrorCode::InternalError));

    client.send(INFLATE_MSG_ID, 2, vec![7u8; 10]).await;
    let reply = client.expect_frame().await;
    assert_eq!(reply.msg_id, INFLATE_MSG_ID);
    assert_eq!(reply.sequence, 2);
    assert_eq!(reply.payload.len(), 40);

    client.send(ECHO_MSG_ID, 3, Bytes::from_static(b"alive")).await;
    assert_eq!(client.expect_frame().await.sequence, 3);
    assert_eq!(ts.server.connections().len(), 1);

    ts.server.shutdown().await.unwrap();
}
