// src/core/persistence/memory.rs

//! A `DashMap`-backed [`PersistenceBackend`], used when no external database is wired in
//! and by tests.

use super::{Entity, PersistenceBackend};
use crate::core::GateError;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct MemoryBackend<E> {
    rows: DashMap<i64, E>,
    failing: DashSet<i64>,
    insert_calls: AtomicUsize,
}

impl<E: Entity> MemoryBackend<E> {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
            failing: DashSet::new(),
            insert_calls: AtomicUsize::new(0),
        }
    }

    pub fn get(&self, id: i64) -> Option<E> {
        self.rows.get(&id).map(|row| row.clone())
    }

    /// Stores a row directly, bypassing any cache.
    pub fn put(&self, entity: E) {
        self.rows.insert(entity.id(), entity);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Makes every batch touching `id` fail until [`clear_failures`](Self::clear_failures).
    pub fn fail_id(&self, id: i64) {
        self.failing.insert(id);
    }

    pub fn clear_failures(&self) {
        self.failing.clear();
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::Relaxed)
    }

    fn check(&self, ids: impl IntoIterator<Item = i64>) -> Result<(), GateError> {
        for id in ids {
            if self.failing.contains(&id) {
                return Err(GateError::Internal(format!("write of entity {id} rejected")));
            }
        }
        Ok(())
    }
}

impl<E: Entity> Default for MemoryBackend<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: Entity> PersistenceBackend<E> for MemoryBackend<E> {
    async fn load(&self, id: i64) -> Result<Option<E>, GateError> {
        Ok(self.get(id))
    }

    async fn insert_batch(&self, entities: &[E]) -> Result<(), GateError> {
        self.insert_calls.fetch_add(1, Ordering::Relaxed);
        self.check(entities.iter().map(Entity::id))?;
        for entity in entities {
            self.rows.insert(entity.id(), entity.clone());
        }
        Ok(())
    }

    async fn update_batch(&self, entities: &[E]) -> Result<(), GateError> {
        self.check(entities.iter().map(Entity::id))?;
        for entity in entities {
            self.rows.insert(entity.id(), entity.clone());
        }
        Ok(())
    }

    async fn delete_batch(&self, ids: &[i64]) -> Result<(), GateError> {
        self.check(ids.iter().copied())?;
        for id in ids {
            self.rows.remove(id);
        }
        Ok(())
    }
}
