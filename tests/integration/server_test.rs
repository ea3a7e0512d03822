// tests/integration/server_test.rs

//! Embedding surface: custom parsers, session observers, write-behind stores, heartbeats.

use super::test_helpers::*;
use async_trait::async_trait;
use bytes::Bytes;
use gatecore::connection::ConnectionHandle;
use gatecore::core::handler::{HandlerContext, MessageHandler};
use gatecore::core::heartbeat::{HEARTBEAT_REQ_MSG_ID, HEARTBEAT_RES_MSG_ID, Heartbeat};
use gatecore::core::persistence::{Entity, EntityStore, Flushable, MemoryBackend, WriteBehindCache};
use gatecore::core::protocol::Payload;
use gatecore::core::session::SessionObserver;
use gatecore::core::{DecodeError, HandlerError};
use gatecore::server::ServerBuilder;
use parking_lot::Mutex;
use std::sync::Arc;

const SHOUT_MSG_ID: u16 = 400;
const SAVE_MSG_ID: u16 = 401;

#[derive(Debug, Clone, PartialEq)]
struct PlayerRecord {
    id: i64,
    gold: i64,
}

impl Entity for PlayerRecord {
    fn id(&self) -> i64 {
        self.id
    }
}

type RecordCache = WriteBehindCache<PlayerRecord, MemoryBackend<PlayerRecord>>;

/// Stores the calling player's record with the gold amount from the payload.
struct SaveHandler {
    cache: Arc<RecordCache>,
}

#[async_trait]
impl MessageHandler for SaveHandler {
    type Payload = Login;

    async fn handle(&self, ctx: HandlerContext, payload: Login) -> Result<(), HandlerError> {
        let player_id = ctx.require_player()?;
        self.cache.insert(PlayerRecord {
            id: player_id,
            gold: payload.0,
        });
        ctx.reply(SAVE_MSG_ID, Bytes::new())?;
        Ok(())
    }
}

#[derive(Default)]
struct BindLog {
    events: Mutex<Vec<String>>,
}

impl SessionObserver for BindLog {
    fn on_player_bound(&self, player_id: i64, _connection: &ConnectionHandle) {
        self.events.lock().push(format!("bound:{player_id}"));
    }

    fn on_player_unbound(&self, player_id: i64) {
        self.events.lock().push(format!("unbound:{player_id}"));
    }
}

fn shout(bytes: Bytes) -> Result<Bytes, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(Bytes::from(bytes.to_ascii_uppercase()))
}

#[tokio::test]
async fn test_embedded_server_wires_observers_stores_and_parsers() {
    init_tracing();
    let backend: Arc<MemoryBackend<PlayerRecord>> = Arc::new(MemoryBackend::new());
    let cache: Arc<RecordCache> = Arc::new(WriteBehindCache::new("players", backend.clone(), 10));
    let log = Arc::new(BindLog::default());
    let store: Arc<dyn Flushable> = cache.clone();

    let mut builder = ServerBuilder::new(test_config())
        .handle_signals(false)
        .with_session_observer(log.clone())
        .with_store(store)
        .register(LOGIN_MSG_ID, LoginHandler)
        .and_then(|b| {
            b.register(
                SAVE_MSG_ID,
                SaveHandler {
                    cache: cache.clone(),
                },
            )
        })
        .unwrap();
    builder
        .handlers_mut()
        .register_with_parser(SHOUT_MSG_ID, EchoHandler, shout)
        .unwrap();
    let server = builder.start().await.unwrap();

    let mut client = TestClient::connect(server.local_addr()).await;

    client.send(SHOUT_MSG_ID, 1, &b"hello"[..]).await;
    let reply = client.expect_frame().await;
    assert_eq!(&reply.payload[..], b"HELLO");

    client.login(9, 2).await;
    assert_eq!(*log.events.lock(), vec!["bound:9"]);
    assert!(server.sessions().is_online(9));

    let hb = Heartbeat {
        timestamp_ms: 1,
        message: "ping".into(),
    };
    client
        .send(HEARTBEAT_REQ_MSG_ID, 3, hb.encode().unwrap())
        .await;
    let pong = client.expect_frame().await;
    assert_eq!((pong.msg_id, pong.sequence), (HEARTBEAT_RES_MSG_ID, 3));
    assert_eq!(Heartbeat::decode(pong.payload).unwrap().message, "pong");

    client
        .send(SAVE_MSG_ID, 4, Login(250).encode().unwrap())
        .await;
    assert_eq!(client.expect_frame().await.sequence, 4);
    assert_eq!(cache.pending_count(), 1);
    assert!(backend.is_empty());

    let first = server.id_generator().next_id();
    assert!(server.id_generator().next_id() > first);

    let report = server.shutdown().await.unwrap();
    assert!(report.is_clean());

    // The final flush ran on shutdown.
    assert_eq!(backend.get(9), Some(PlayerRecord { id: 9, gold: 250 }));
    assert_eq!(cache.pending_count(), 0);
    assert!(client.is_closed_by_server().await);
    assert_eq!(log.events.lock().last().unwrap(), "unbound:9");
}

#[tokio::test]
async fn test_builder_cache_uses_configured_batch_size() {
    init_tracing();
    let mut config = test_config();
    config.persistence.batch_size = 2;
    let backend: Arc<MemoryBackend<PlayerRecord>> = Arc::new(MemoryBackend::new());

    let mut builder = ServerBuilder::new(config).handle_signals(false);
    assert_eq!(builder.config().persistence.batch_size, 2);
    let cache: Arc<RecordCache> = builder.write_behind_cache("players", backend.clone());
    assert_eq!(cache.batch_size(), 2);
    let server = builder.start().await.unwrap();

    for id in 1..=5 {
        cache.insert(PlayerRecord { id, gold: id * 10 });
    }
    let report = server.shutdown().await.unwrap();
    assert!(report.is_clean());

    // Registered as a store, so the final flush wrote it in batches of two.
    assert_eq!(backend.len(), 5);
    assert_eq!(backend.insert_calls(), 3);
}
