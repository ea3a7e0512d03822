// src/core/handler/registry.rs

//! The message id to handler table.

use super::context::HandlerContext;
use crate::core::errors::{DecodeError, HandlerError};
use crate::core::pool::TrafficClass;
use crate::core::protocol::{ERROR_REPLY_MSG_ID, Payload};
use crate::core::GateError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tracing::debug;

/// The future a prepared handler invocation runs as.
pub type HandlerFuture = BoxFuture<'static, Result<(), HandlerError>>;

type Invoker =
    Box<dyn Fn(Bytes, HandlerContext) -> Result<HandlerFuture, DecodeError> + Send + Sync>;

/// Business logic for one message id.
///
/// The payload type is declared by the handler; the registry parses raw frame bytes into
/// it before the handler is scheduled, so a handler only ever sees well-formed input.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    type Payload: Send + 'static;

    /// Name used in logs and conflict errors.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// The pool this handler runs on.
    fn traffic_class(&self) -> TrafficClass {
        TrafficClass::Player
    }

    async fn handle(&self, ctx: HandlerContext, payload: Self::Payload)
    -> Result<(), HandlerError>;
}

/// A registered handler: immutable after `build`.
pub struct HandlerDescriptor {
    msg_id: u16,
    name: &'static str,
    traffic_class: TrafficClass,
    invoker: Invoker,
}

impl std::fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("msg_id", &self.msg_id)
            .field("name", &self.name)
            .field("traffic_class", &self.traffic_class)
            .finish_non_exhaustive()
    }
}

impl HandlerDescriptor {
    pub fn msg_id(&self) -> u16 {
        self.msg_id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn traffic_class(&self) -> TrafficClass {
        self.traffic_class
    }

    /// Parses `payload` and returns the handler invocation, ready to be scheduled.
    pub fn prepare(&self, payload: Bytes, ctx: HandlerContext) -> Result<HandlerFuture, DecodeError> {
        (self.invoker)(payload, ctx)
    }
}

/// Collects registrations during startup.
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<u16, HandlerDescriptor>,
}

impl HandlerRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler`, parsing payloads with `Payload::decode`.
    pub fn register<H>(&mut self, msg_id: u16, handler: H) -> Result<&mut Self, GateError>
    where
        H: MessageHandler,
        H::Payload: Payload,
    {
        self.register_with_parser(msg_id, handler, <H::Payload as Payload>::decode)
    }

    /// Registers `handler` with an explicit payload parser.
    ///
    /// Registering an id twice is an error, never last-wins.
    pub fn register_with_parser<H, F>(
        &mut self,
        msg_id: u16,
        handler: H,
        parser: F,
    ) -> Result<&mut Self, GateError>
    where
        H: MessageHandler,
        F: Fn(Bytes) -> Result<H::Payload, DecodeError> + Send + Sync + 'static,
    {
        if msg_id == ERROR_REPLY_MSG_ID {
            return Err(GateError::ReservedMessageId(msg_id));
        }

        let name = handler.name();
        let traffic_class = handler.traffic_class();
        let handler = Arc::new(handler);
        let invoker: Invoker = Box::new(move |bytes: Bytes, ctx: HandlerContext| {
            let payload = parser(bytes)?;
            let handler = handler.clone();
            let invocation: HandlerFuture =
                Box::pin(async move { handler.handle(ctx, payload).await });
            Ok(invocation)
        });

        match self.handlers.entry(msg_id) {
            Entry::Occupied(existing) => Err(GateError::RegistrationConflict {
                msg_id,
                existing: existing.get().name,
                incoming: name,
            }),
            Entry::Vacant(slot) => {
                debug!(msg_id, handler = name, pool = %traffic_class, "Handler registered.");
                slot.insert(HandlerDescriptor {
                    msg_id,
                    name,
                    traffic_class,
                    invoker,
                });
                Ok(self)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Freezes the table. Lookups afterwards need no locking.
    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: Arc::new(self.handlers),
        }
    }
}

/// Read-only message id lookup, shared by all connections.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<HashMap<u16, HandlerDescriptor>>,
}

impl HandlerRegistry {
    pub fn resolve(&self, msg_id: u16) -> Option<&HandlerDescriptor> {
        self.handlers.get(&msg_id)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Registered message ids in ascending order.
    pub fn message_ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.handlers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
