// tests/integration/mod.rs

//! Integration tests for gatecore
//!
//! These tests run a real server on an ephemeral port and talk to it over raw TCP and
//! WebSocket, checking dispatch, sessions and shutdown end to end.

pub mod backpressure_test;
pub mod dispatch_test;
pub mod server_test;
pub mod session_test;
pub mod shutdown_test;
pub mod test_helpers;
pub mod websocket_test;
