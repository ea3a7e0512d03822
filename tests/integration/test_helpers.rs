// tests/integration/test_helpers.rs

//! Test helpers: a server on an ephemeral port with a handful of game handlers, and a
//! raw TCP client speaking the frame protocol.

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use futures::{SinkExt, StreamExt};
use gatecore::config::{Config, PoolConfig};
use gatecore::core::handler::{HandlerContext, MessageHandler};
use gatecore::core::pool::TrafficClass;
use gatecore::core::protocol::{ERROR_REPLY_MSG_ID, ErrorReply, Frame, GameFrameCodec, Payload};
use gatecore::core::{DecodeError, GateError, HandlerError};
use gatecore::server::{RunningServer, ServerBuilder};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, reload};

pub const ECHO_MSG_ID: u16 = 42;
pub const PANIC_MSG_ID: u16 = 7;
pub const LOGIN_MSG_ID: u16 = 100;
pub const LOGIN_OK_MSG_ID: u16 = 101;
pub const WHOAMI_MSG_ID: u16 = 200;
pub const SLOW_MSG_ID: u16 = 300;
pub const INFLATE_MSG_ID: u16 = 301;

/// How long a client waits for a frame before a test fails.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

static TRACING: Once = Once::new();

/// Installs a test-writer subscriber once per test binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let (filter, _reload_handle) = reload::Layer::new(EnvFilter::new("warn"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}

/// Echoes the payload back on the same message id.
pub struct EchoHandler;

#[async_trait]
impl MessageHandler for EchoHandler {
    type Payload = Bytes;

    async fn handle(&self, ctx: HandlerContext, payload: Bytes) -> Result<(), HandlerError> {
        ctx.reply(ctx.msg_id(), payload)?;
        Ok(())
    }
}

/// Always panics.
pub struct PanicHandler;

#[async_trait]
impl MessageHandler for PanicHandler {
    type Payload = Bytes;

    async fn handle(&self, _ctx: HandlerContext, _payload: Bytes) -> Result<(), HandlerError> {
        panic!("handler exploded on purpose");
    }
}

/// Login body: the player id as a big-endian i64.
pub struct Login(pub i64);

impl Payload for Login {
    fn decode(mut bytes: Bytes) -> Result<Self, DecodeError> {
        if bytes.len() != 8 {
            return Err(DecodeError::Truncated {
                needed: 8,
                got: bytes.len(),
            });
        }
        Ok(Login(bytes.get_i64()))
    }

    fn encode(&self) -> Result<Bytes, GateError> {
        Ok(Bytes::copy_from_slice(&self.0.to_be_bytes()))
    }
}

/// Binds the connection to the player in the payload and acknowledges on 101.
pub struct LoginHandler;

#[async_trait]
impl MessageHandler for LoginHandler {
    type Payload = Login;

    fn traffic_class(&self) -> TrafficClass {
        TrafficClass::System
    }

    async fn handle(&self, ctx: HandlerContext, payload: Login) -> Result<(), HandlerError> {
        ctx.bind_player(payload.0);
        ctx.reply_with(LOGIN_OK_MSG_ID, &payload)?;
        Ok(())
    }
}

/// Replies with the bound player id, or applies the unbound-session policy.
pub struct WhoAmIHandler;

#[async_trait]
impl MessageHandler for WhoAmIHandler {
    type Payload = ();

    async fn handle(&self, ctx: HandlerContext, _payload: ()) -> Result<(), HandlerError> {
        let player_id = ctx.require_player()?;
        ctx.reply_with(WHOAMI_MSG_ID, &Login(player_id))?;
        Ok(())
    }
}

/// Sleeps before replying, counting completions.
pub struct SlowHandler {
    pub delay: Duration,
    pub completed: Arc<AtomicUsize>,
}

#[async_trait]
impl MessageHandler for SlowHandler {
    type Payload = Bytes;

    async fn handle(&self, ctx: HandlerContext, payload: Bytes) -> Result<(), HandlerError> {
        tokio::time::sleep(self.delay).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        ctx.reply(SLOW_MSG_ID, payload)?;
        Ok(())
    }
}

/// Replies with the payload repeated four times.
pub struct InflateHandler;

#[async_trait]
impl MessageHandler for InflateHandler {
    type Payload = Bytes;

    async fn handle(&self, ctx: HandlerContext, payload: Bytes) -> Result<(), HandlerError> {
        ctx.reply(INFLATE_MSG_ID, payload.repeat(4))?;
        Ok(())
    }
}

/// A config for tests: ephemeral port, small pools, idle checks off.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.idle.read_secs = 0;
    config.idle.write_secs = 0;
    config.idle.all_secs = 0;
    config.pools.player = PoolConfig {
        size: 2,
        queue_capacity: 64,
    };
    config.pools.system = PoolConfig {
        size: 1,
        queue_capacity: 64,
    };
    config.shutdown_drain_timeout_secs = 5;
    config
}

/// A running server with the test handlers registered.
pub struct TestServer {
    pub server: RunningServer,
    pub slow_completed: Arc<AtomicUsize>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: Config) -> Self {
        init_tracing();
        let slow_completed = Arc::new(AtomicUsize::new(0));
        let server = ServerBuilder::new(config)
            .handle_signals(false)
            .register(ECHO_MSG_ID, EchoHandler)
            .and_then(|b| b.register(PANIC_MSG_ID, PanicHandler))
            .and_then(|b| b.register(LOGIN_MSG_ID, LoginHandler))
            .and_then(|b| b.register(WHOAMI_MSG_ID, WhoAmIHandler))
            .and_then(|b| b.register(INFLATE_MSG_ID, InflateHandler))
            .and_then(|b| {
                b.register(
                    SLOW_MSG_ID,
                    SlowHandler {
                        delay: Duration::from_millis(300),
                        completed: slow_completed.clone(),
                    },
                )
            })
            .expect("test handlers register")
            .start()
            .await
            .expect("test server starts");
        Self {
            server,
            slow_completed,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub async fn client(&self) -> TestClient {
        TestClient::connect(self.addr()).await
    }
}

/// Raw TCP client using the server's own codec.
pub struct TestClient {
    framed: Framed<TcpStream, GameFrameCodec>,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect to test server");
        Self::from_stream(stream)
    }

    /// Wraps a stream the test has already written raw bytes to.
    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            framed: Framed::new(stream, GameFrameCodec::default()),
        }
    }

    pub async fn send(&mut self, msg_id: u16, sequence: i32, payload: impl Into<Bytes>) {
        self.framed
            .send(Frame::new(msg_id, sequence, payload))
            .await
            .expect("send frame");
    }

    /// The next frame, or `None` if the server closed the connection.
    pub async fn recv(&mut self) -> Option<Frame> {
        match tokio::time::timeout(RECV_TIMEOUT, self.framed.next()).await {
            Ok(Some(Ok(frame))) => Some(frame),
            Ok(Some(Err(_))) | Ok(None) => None,
            Err(_) => panic!("no frame within {RECV_TIMEOUT:?}"),
        }
    }

    pub async fn expect_frame(&mut self) -> Frame {
        self.recv().await.expect("connection closed while waiting for a frame")
    }

    /// Logs in as `player_id` and waits for the acknowledgement.
    pub async fn login(&mut self, player_id: i64, sequence: i32) {
        self.send(LOGIN_MSG_ID, sequence, Login(player_id).encode().unwrap())
            .await;
        let ack = self.expect_frame().await;
        assert_eq!(ack.msg_id, LOGIN_OK_MSG_ID);
        assert_eq!(ack.sequence, sequence);
    }

    /// True once the server has closed the connection.
    pub async fn is_closed_by_server(&mut self) -> bool {
        matches!(
            tokio::time::timeout(RECV_TIMEOUT, self.framed.next()).await,
            Ok(None) | Ok(Some(Err(_)))
        )
    }
}

/// Decodes an error reply frame.
pub fn error_reply(frame: &Frame) -> ErrorReply {
    assert_eq!(frame.msg_id, ERROR_REPLY_MSG_ID, "expected an error reply");
    ErrorReply::decode(frame.payload.clone()).expect("valid error reply")
}
