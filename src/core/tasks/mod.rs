// src/core/tasks/mod.rs

//! Background tasks that run for the lifetime of the server.

mod flush;

pub use flush::FlushTask;
