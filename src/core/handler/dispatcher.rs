// src/core/handler/dispatcher.rs

//! Routes decoded frames to their handlers.
//!
//! Dispatch happens on the connection's reader task, in arrival order. It resolves the
//! handler, parses the payload and hands the invocation to a worker pool; it never waits
//! for the handler unless the pool is saturated and runs the task on the caller.

use super::context::HandlerContext;
use super::registry::{HandlerFuture, HandlerRegistry};
use crate::config::UnboundSessionPolicy;
use crate::connection::ConnectionHandle;
use crate::core::errors::HandlerError;
use crate::core::pool::{Submission, WorkerPools, panic_message};
use crate::core::protocol::{ErrorCode, Frame};
use crate::core::session::{ResponseSender, SessionRegistry};
use crate::core::{GateError, metrics};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// What happened to one dispatched frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler was scheduled (or already ran on the caller).
    Submitted(Submission),
    /// The frame was answered with an error reply and never reached a handler.
    Rejected(ErrorCode),
}

/// Shared by all connections.
pub struct Dispatcher {
    registry: HandlerRegistry,
    pools: Arc<WorkerPools>,
    sessions: Arc<SessionRegistry>,
    sender: ResponseSender,
    unbound_policy: UnboundSessionPolicy,
}

impl Dispatcher {
    pub fn new(
        registry: HandlerRegistry,
        pools: Arc<WorkerPools>,
        sessions: Arc<SessionRegistry>,
        unbound_policy: UnboundSessionPolicy,
    ) -> Self {
        let sender = ResponseSender::new(sessions.clone());
        Self {
            registry,
            pools,
            sessions,
            sender,
            unbound_policy,
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn sender(&self) -> &ResponseSender {
        &self.sender
    }

    pub fn pools(&self) -> &Arc<WorkerPools> {
        &self.pools
    }

    /// Dispatches one frame received on `connection`.
    pub async fn dispatch(&self, connection: &ConnectionHandle, frame: Frame) -> DispatchOutcome {
        let Frame {
            msg_id,
            sequence,
            payload,
        } = frame;

        let Some(descriptor) = self.registry.resolve(msg_id) else {
            warn!(
                msg_id,
                sequence,
                conn = connection.id(),
                "{}",
                GateError::UnknownMessageId(msg_id)
            );
            return self.reject(
                connection,
                sequence,
                ErrorCode::UnknownMessage,
                format!("unknown message id {msg_id}"),
            );
        };

        let ctx = HandlerContext::new(
            connection.clone(),
            msg_id,
            sequence,
            self.sessions.clone(),
            self.sender.clone(),
            self.unbound_policy,
        );

        // Parsers are user code too; a panicking one must not take the reader down.
        let prepared =
            std::panic::catch_unwind(AssertUnwindSafe(|| descriptor.prepare(payload, ctx)));
        let invocation = match prepared {
            Ok(Ok(invocation)) => invocation,
            Ok(Err(source)) => {
                let err = GateError::PayloadDecode { msg_id, source };
                warn!(msg_id, sequence, conn = connection.id(), "{err}");
                return self.reject(connection, sequence, ErrorCode::PayloadDecode, err.to_string());
            }
            Err(panic) => {
                error!(
                    msg_id,
                    sequence,
                    conn = connection.id(),
                    "Payload parser for '{}' panicked: {}",
                    descriptor.name(),
                    panic_message(panic.as_ref())
                );
                return self.reject(
                    connection,
                    sequence,
                    ErrorCode::InternalError,
                    "internal error",
                );
            }
        };

        let pool = self.pools.get(descriptor.traffic_class());
        let task = guarded_invocation(
            invocation,
            connection.clone(),
            self.sender.clone(),
            msg_id,
            sequence,
            descriptor.traffic_class().to_string(),
        );

        match pool.submit(Box::pin(task)).await {
            Ok(submission) => {
                debug!(msg_id, sequence, conn = connection.id(), ?submission, "Frame dispatched.");
                DispatchOutcome::Submitted(submission)
            }
            Err(e) => {
                debug!(msg_id, sequence, conn = connection.id(), "Dispatch rejected: {e}");
                self.reject(
                    connection,
                    sequence,
                    ErrorCode::ShuttingDown,
                    "server is shutting down",
                )
            }
        }
    }

    fn reject(
        &self,
        connection: &ConnectionHandle,
        sequence: i32,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> DispatchOutcome {
        metrics::DISPATCH_REJECTED_TOTAL
            .with_label_values(&[&code.to_string()])
            .inc();
        if let Err(e) = self.sender.send_error(connection, sequence, code, message) {
            debug!(conn = connection.id(), "Error reply not delivered: {e}");
        }
        DispatchOutcome::Rejected(code)
    }
}

/// Wraps a handler invocation so that an error or a panic produces exactly one
/// `INTERNAL_ERROR` reply and never escapes into the worker.
async fn guarded_invocation(
    invocation: HandlerFuture,
    connection: ConnectionHandle,
    sender: ResponseSender,
    msg_id: u16,
    sequence: i32,
    pool: String,
) {
    let started = Instant::now();
    let outcome = AssertUnwindSafe(invocation).catch_unwind().await;
    metrics::HANDLER_LATENCY_SECONDS
        .with_label_values(&[pool.as_str()])
        .observe(started.elapsed().as_secs_f64());

    let failure = match outcome {
        Ok(Ok(())) => return,
        // The unbound-session policy has already been applied.
        Ok(Err(HandlerError::NoSession)) => return,
        Ok(Err(e)) => {
            metrics::HANDLER_FAILURES_TOTAL
                .with_label_values(&["error"])
                .inc();
            GateError::HandlerExecution {
                msg_id,
                reason: e.to_string(),
            }
        }
        Err(panic) => {
            metrics::HANDLER_FAILURES_TOTAL
                .with_label_values(&["panic"])
                .inc();
            GateError::HandlerExecution {
                msg_id,
                reason: format!("panicked: {}", panic_message(panic.as_ref())),
            }
        }
    };

    error!(
        msg_id,
        sequence,
        conn = connection.id(),
        peer = %connection.peer_addr(),
        "{failure}"
    );
    if let Err(e) = sender.send_error(&connection, sequence, ErrorCode::InternalError, "internal error") {
        debug!(conn = connection.id(), "Internal error reply not delivered: {e}");
    }
}
