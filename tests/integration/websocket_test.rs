// tests/integration/websocket_test.rs

//! The same frames over a WebSocket upgrade on the shared port.

use super::test_helpers::*;
use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use gatecore::core::protocol::{ErrorCode, Frame, GameFrameCodec};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::codec::{Decoder, Encoder};

fn encode(frame: Frame) -> Bytes {
    let mut buf = BytesMut::new();
    GameFrameCodec::default().encode(frame, &mut buf).unwrap();
    buf.freeze()
}

fn decode(data: &[u8]) -> Frame {
    let mut buf = BytesMut::from(data);
    GameFrameCodec::default()
        .decode(&mut buf)
        .unwrap()
        .expect("one whole frame per message")
}

#[tokio::test]
async fn test_websocket_echo_and_error_reply() {
    let ts = TestServer::start().await;
    let url = format!("ws://{}/ws", ts.addr());
    let (mut ws, _response) = connect_async(url).await.expect("upgrade succeeds");

    ws.send(Message::Binary(encode(Frame::new(ECHO_MSG_ID, 8, &b"over ws"[..]))))
        .await
        .unwrap();
    let reply = loop {
        match ws.next().await.expect("message").unwrap() {
            Message::Binary(data) => break decode(&data),
            _ => continue,
        }
    };
    assert_eq!(reply.msg_id, ECHO_MSG_ID);
    assert_eq!(reply.sequence, 8);
    assert_eq!(&reply.payload[..], b"over ws");

    ws.send(Message::Binary(encode(Frame::new(PANIC_MSG_ID, 9, Bytes::new()))))
        .await
        .unwrap();
    let reply = loop {
        match ws.next().await.expect("message").unwrap() {
            Message::Binary(data) => break decode(&data),
            _ => continue,
        }
    };
    assert_eq!(reply.sequence, 9);
    assert_eq!(error_reply(&reply).error_code(), Some(ErrorCode::InternalError));

    ws.close(None).await.ok();
    ts.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_websocket_frame_split_across_messages() {
    let ts = TestServer::start().await;
    let url = format!("ws://{}/ws", ts.addr());
    let (mut ws, _) = connect_async(url).await.unwrap();

    let bytes = encode(Frame::new(ECHO_MSG_ID, 30, &b"two halves"[..]));
    ws.send(Message::Binary(bytes.slice(..7))).await.unwrap();
    ws.send(Message::Binary(bytes.slice(7..))).await.unwrap();

    let reply = loop {
        match ws.next().await.expect("message").unwrap() {
            Message::Binary(data) => break decode(&data),
            _ => continue,
        }
    };
    assert_eq!(reply.sequence, 30);
    assert_eq!(&reply.payload[..], b"two halves");

    ws.close(None).await.ok();
    ts.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_websocket_wrong_path_is_rejected() {
    let ts = TestServer::start().await;
    let url = format!("ws://{}/not-the-game", ts.addr());
    match connect_async(url).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 404),
        Err(other) => panic!("expected an HTTP 404, got {other:?}"),
        Ok(_) => panic!("upgrade on the wrong path must fail"),
    }
    ts.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_raw_and_websocket_clients_share_the_port() {
    let ts = TestServer::start().await;
    let mut raw = ts.client().await;
    let (mut ws, _) = connect_async(format!("ws://{}/ws", ts.addr())).await.unwrap();

    raw.send(ECHO_MSG_ID, 1, Bytes::from_static(b"raw")).await;
    ws.send(Message::Binary(encode(Frame::new(ECHO_MSG_ID, 2, &b"ws"[..]))))
        .await
        .unwrap();

    assert_eq!(&raw.expect_frame().await.payload[..], b"raw");
    let reply = loop {
        match ws.next().await.expect("message").unwrap() {
            Message::Binary(data) => break decode(&data),
            _ => continue,
        }
    };
    assert_eq!(&reply.payload[..], b"ws");

    ws.close(None).await.ok();
    ts.server.shutdown().await.unwrap();
}
