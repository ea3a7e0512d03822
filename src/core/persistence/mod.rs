// src/core/persistence/mod.rs

//! The persistence contract exposed to game code.
//!
//! Game logic reads and writes entities through an [`EntityStore`]. The provided
//! [`WriteBehindCache`] keeps every entity in memory and records which ids need an
//! insert, an update or a delete; a [`FlushTask`](crate::core::tasks::FlushTask) pushes
//! those changes to a [`PersistenceBackend`] in batches.

mod memory;
mod write_behind;

pub use memory::MemoryBackend;
pub use write_behind::WriteBehindCache;

use crate::core::GateError;
use async_trait::async_trait;

/// A persistable record with a stable numeric id.
pub trait Entity: Clone + Send + Sync + 'static {
    fn id(&self) -> i64;
}

/// Storage the write-behind cache flushes into (a database table, a file, ...).
#[async_trait]
pub trait PersistenceBackend<E: Entity>: Send + Sync + 'static {
    async fn load(&self, id: i64) -> Result<Option<E>, GateError>;
    async fn insert_batch(&self, entities: &[E]) -> Result<(), GateError>;
    async fn update_batch(&self, entities: &[E]) -> Result<(), GateError>;
    async fn delete_batch(&self, ids: &[i64]) -> Result<(), GateError>;
}

/// Entity access used by handlers.
#[async_trait]
pub trait EntityStore<E: Entity>: Send + Sync {
    /// Returns the cached entity, loading it from the backend on a miss.
    async fn get(&self, id: i64) -> Result<Option<E>, GateError>;
    /// Stores an entity. An id already present is treated as an update.
    fn insert(&self, entity: E);
    fn update(&self, entity: E);
    /// Returns true if the entity was cached.
    fn delete(&self, id: i64) -> bool;
    /// Writes all pending changes to the backend.
    async fn flush(&self) -> FlushStats;
}

/// Counters for one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Entities that could not be written and were queued for the next flush.
    pub requeued: usize,
}

impl FlushStats {
    pub fn is_empty(&self) -> bool {
        self.inserted + self.updated + self.deleted + self.requeued == 0
    }
}

/// Type-erased flush hook so one task can drive stores of different entity types.
#[async_trait]
pub trait Flushable: Send + Sync {
    fn name(&self) -> &str;
    async fn flush_pending(&self) -> FlushStats;
}
