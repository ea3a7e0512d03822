// src/core/persistence/write_behind.rs

//! An in-memory entity cache that persists changes lazily.
//!
//! Pending-change bookkeeping per id:
//! - insert: cached, marked for insert, any update or delete mark dropped;
//! - update: cached, marked for update unless an insert is still pending (the insert
//!   will carry the new value), any delete mark dropped;
//! - delete: evicted, insert and update marks dropped, marked for delete.
//!
//! A flush writes deletes, then inserts, then updates, each in batches. When a batch
//! fails every entity in it is retried on its own; entities that still fail are queued
//! again unless a newer change for the same id arrived in the meantime.

use super::{Entity, EntityStore, FlushStats, Flushable, PersistenceBackend};
use crate::core::{GateError, metrics};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

struct CacheState<E> {
    entries: HashMap<i64, E>,
    inserts: HashMap<i64, E>,
    updates: HashMap<i64, E>,
    deletes: HashSet<i64>,
}

impl<E> CacheState<E> {
    fn has_pending(&self, id: i64) -> bool {
        self.inserts.contains_key(&id) || self.updates.contains_key(&id) || self.deletes.contains(&id)
    }
}

/// Write-behind [`EntityStore`] over a [`PersistenceBackend`].
pub struct WriteBehindCache<E: Entity, B: PersistenceBackend<E>> {
    name: String,
    backend: Arc<B>,
    batch_size: usize,
    state: Mutex<CacheState<E>>,
    // Serializes flushes so a slow flush and the shutdown flush never interleave.
    flush_lock: tokio::sync::Mutex<()>,
}

impl<E: Entity, B: PersistenceBackend<E>> WriteBehindCache<E, B> {
    pub fn new(name: impl Into<String>, backend: Arc<B>, batch_size: usize) -> Self {
        Self {
            name: name.into(),
            backend,
            batch_size: batch_size.max(1),
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                inserts: HashMap::new(),
                updates: HashMap::new(),
                deletes: HashSet::new(),
            }),
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if the entity is cached and not marked for delete.
    pub fn contains(&self, id: i64) -> bool {
        let state = self.state.lock();
        !state.deletes.contains(&id) && state.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of ids with an unflushed change.
    pub fn pending_count(&self) -> usize {
        let state = self.state.lock();
        state.inserts.len() + state.updates.len() + state.deletes.len()
    }

    /// Replaces the cache contents with `entities` and forgets pending changes.
    pub fn preload(&self, entities: impl IntoIterator<Item = E>) -> usize {
        let mut state = self.state.lock();
        state.inserts.clear();
        state.updates.clear();
        state.deletes.clear();
        state.entries = entities.into_iter().map(|e| (e.id(), e)).collect();
        debug!(cache = %self.name, "Preloaded {} entities.", state.entries.len());
        state.entries.len()
    }

    fn mark_insert(state: &mut CacheState<E>, entity: E) {
        let id = entity.id();
        state.updates.remove(&id);
        state.deletes.remove(&id);
        state.inserts.insert(id, entity.clone());
        state.entries.insert(id, entity);
    }

    fn mark_update(state: &mut CacheState<E>, entity: E) {
        let id = entity.id();
        state.deletes.remove(&id);
        if let Some(pending) = state.inserts.get_mut(&id) {
            *pending = entity.clone();
        } else {
            state.updates.insert(id, entity.clone());
        }
        state.entries.insert(id, entity);
    }

    async fn flush_deletes(&self, ids: Vec<i64>, stats: &mut FlushStats) {
        for batch in ids.chunks(self.batch_size) {
            match self.backend.delete_batch(batch).await {
                Ok(()) => stats.deleted += batch.len(),
                Err(e) => {
                    warn!(cache = %self.name, "Delete batch of {} failed, retrying one by one: {e}", batch.len());
                    for &id in batch {
                        match self.backend.delete_batch(&[id]).await {
                            Ok(()) => stats.deleted += 1,
                            Err(e) => {
                                error!(cache = %self.name, id, "Failed to delete entity: {e}");
                                self.requeue_delete(id, stats);
                            }
                        }
                    }
                }
            }
        }
    }

    async fn flush_writes(&self, entities: Vec<E>, insert: bool, stats: &mut FlushStats) {
        let kind = if insert { "insert" } else { "update" };
        for batch in entities.chunks(self.batch_size) {
            let result = if insert {
                self.backend.insert_batch(batch).await
            } else {
                self.backend.update_batch(batch).await
            };
            match result {
                Ok(()) => Self::count(stats, insert, batch.len()),
                Err(e) => {
                    warn!(cache = %self.name, "{kind} batch of {} failed, retrying one by one: {e}", batch.len());
                    for entity in batch {
                        let single = std::slice::from_ref(entity);
                        let result = if insert {
                            self.backend.insert_batch(single).await
                        } else {
                            self.backend.update_batch(single).await
                        };
                        match result {
                            Ok(()) => Self::count(stats, insert, 1),
                            Err(e) => {
                                error!(cache = %self.name, id = entity.id(), "Failed to {kind} entity: {e}");
                                self.requeue_write(entity.clone(), insert, stats);
                            }
                        }
                    }
                }
            }
        }
    }

    fn count(stats: &mut FlushStats, insert: bool, n: usize) {
        if insert {
            stats.inserted += n;
        } else {
            stats.updated += n;
        }
    }

    fn requeue_write(&self, entity: E, insert: bool, stats: &mut FlushStats) {
        metrics::ENTITY_FLUSH_FAILURES_TOTAL.inc();
        stats.requeued += 1;
        let mut state = self.state.lock();
        let id = entity.id();
        if state.has_pending(id) {
            // A newer change supersedes the failed write, but a failed insert must stay an
            // insert so the row gets created.
            if insert && let Some(newer) = state.updates.remove(&id) {
                state.inserts.insert(id, newer);
            }
            return;
        }
        if insert {
            state.inserts.insert(id, entity);
        } else {
            state.updates.insert(id, entity);
        }
    }

    fn requeue_delete(&self, id: i64, stats: &mut FlushStats) {
        metrics::ENTITY_FLUSH_FAILURES_TOTAL.inc();
        stats.requeued += 1;
        let mut state = self.state.lock();
        if !state.has_pending(id) && !state.entries.contains_key(&id) {
            state.deletes.insert(id);
        }
    }
}

#[async_trait]
impl<E: Entity, B: PersistenceBackend<E>> EntityStore<E> for WriteBehindCache<E, B> {
    async fn get(&self, id: i64) -> Result<Option<E>, GateError> {
        {
            let state = self.state.lock();
            if let Some(entity) = state.entries.get(&id) {
                return Ok(Some(entity.clone()));
            }
            if state.deletes.contains(&id) {
                return Ok(None);
            }
        }

        let loaded = self.backend.load(id).await?;
        let Some(entity) = loaded else {
            return Ok(None);
        };

        let mut state = self.state.lock();
        // A write or delete that raced with the load wins.
        if state.deletes.contains(&id) {
            return Ok(None);
        }
        Ok(Some(state.entries.entry(id).or_insert(entity).clone()))
    }

    fn insert(&self, entity: E) {
        let mut state = self.state.lock();
        if state.entries.contains_key(&entity.id()) && !state.deletes.contains(&entity.id()) {
            Self::mark_update(&mut state, entity);
        } else {
            Self::mark_insert(&mut state, entity);
        }
    }

    fn update(&self, entity: E) {
        let mut state = self.state.lock();
        Self::mark_update(&mut state, entity);
    }

    fn delete(&self, id: i64) -> bool {
        let mut state = self.state.lock();
        let cached = state.entries.remove(&id).is_some();
        state.inserts.remove(&id);
        state.updates.remove(&id);
        state.deletes.insert(id);
        cached
    }

    async fn flush(&self) -> FlushStats {
        let _flushing = self.flush_lock.lock().await;
        let started = Instant::now();

        let (deletes, inserts, updates) = {
            let mut state = self.state.lock();
            (
                state.deletes.drain().collect::<Vec<_>>(),
                state.inserts.drain().map(|(_, e)| e).collect::<Vec<_>>(),
                state.updates.drain().map(|(_, e)| e).collect::<Vec<_>>(),
            )
        };

        let mut stats = FlushStats::default();
        if !deletes.is_empty() {
            self.flush_deletes(deletes, &mut stats).await;
        }
        if !inserts.is_empty() {
            self.flush_writes(inserts, true, &mut stats).await;
        }
        if !updates.is_empty() {
            self.flush_writes(updates, false, &mut stats).await;
        }

        metrics::ENTITY_FLUSH_SECONDS.observe(started.elapsed().as_secs_f64());
        if !stats.is_empty() {
            debug!(
                cache = %self.name,
                inserted = stats.inserted,
                updated = stats.updated,
                deleted = stats.deleted,
                requeued = stats.requeued,
                "Flush completed."
            );
        }
        stats
    }
}

#[async_trait]
impl<E: Entity, B: PersistenceBackend<E>> Flushable for WriteBehindCache<E, B> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn flush_pending(&self) -> FlushStats {
        self.flush().await
    }
}
