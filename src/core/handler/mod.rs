// src/core/handler/mod.rs

//! Handler registration and dispatch.
//!
//! Handlers are registered once at startup into a `HandlerRegistryBuilder`, frozen into
//! an immutable `HandlerRegistry`, and invoked by the `Dispatcher` on the worker pool of
//! their traffic class.

pub mod context;
pub mod dispatcher;
pub mod registry;

pub use context::HandlerContext;
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use registry::{
    HandlerDescriptor, HandlerFuture, HandlerRegistry, HandlerRegistryBuilder, MessageHandler,
};
