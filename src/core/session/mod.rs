// src/core/session/mod.rs

//! Player sessions: which connection each logged-in player is reachable on, and the
//! sender used to push frames to players.

mod registry;
mod sender;

pub use registry::{SessionObserver, SessionRegistry};
pub use sender::ResponseSender;
