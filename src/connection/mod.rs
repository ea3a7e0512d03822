// src/connection/mod.rs

//! Manages the lifecycle of a single client connection: protocol sniffing, the
//! transport pipeline, idle detection, frame dispatch, and cleanup on close.

mod guard;
mod handle;
mod handler;
mod idle;
mod pipeline;
mod sniffer;
mod table;

pub use guard::ConnectionGuard;
pub use handle::{ConnectionHandle, Transport};
pub use handler::{ConnectionHandler, ConnectionServices, ConnectionSettings};
pub use idle::{IdleSettings, IdleState, IdleTracker};
pub use pipeline::{FrameReader, FrameWriter, PipelineSettings, establish};
pub use sniffer::{Protocol, ProtocolSniffer, SNIFF_MAX_BYTES, SNIFF_MIN_BYTES, SniffedStream};
pub use table::ConnectionTable;
