use lru::LruCache;
use std::num::NonZeroUsize;

use super::{DataMapper, IdGenerator, WriteThroughCache};
use crate::connection::Connection;
use crate::core::{EntityId, Result};
use crate::entity::Entity;

enum PendingWrite<T> {
    Put(T),
    Evict(EntityId),
}

/// Wraps a mapper with an LRU read cache.
///
/// Writes are recorded as pending and only reach the cache when the unit of
/// work flushes it after a successful commit; a rollback discards them.
pub struct CachedDataMapper<M: DataMapper> {
    inner: M,
    cache: LruCache<EntityId, M::Entity>,
    pending: Vec<PendingWrite<M::Entity>>,
    /// Empty id of the inner generator, captured once since reading it needs `&mut`.
    empty_id: Option<EntityId>,
}

impl<M: DataMapper> CachedDataMapper<M> {
    pub fn new(mut inner: M, capacity: NonZeroUsize) -> Self {
        let empty_id = inner.id_generator().map(|generator| generator.empty_value());
        Self {
            inner,
            cache: LruCache::new(capacity),
            pending: Vec::new(),
            empty_id,
        }
    }

    /// Looks at a cached entry without touching its recency.
    pub fn peek(&self, id: &EntityId) -> Option<&M::Entity> {
        self.cache.peek(id)
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }
}

impl<M: DataMapper> DataMapper for CachedDataMapper<M> {
    type Entity = M::Entity;

    fn add(&mut self, entity: &M::Entity, conn: &mut dyn Connection) -> Result<()> {
        self.inner.add(entity, conn)?;
        self.pending.push(PendingWrite::Put(entity.clone()));
        Ok(())
    }

    fn update(&mut self, entity: &M::Entity, conn: &mut dyn Connection) -> Result<()> {
        self.inner.update(entity, conn)?;
        self.pending.push(PendingWrite::Put(entity.clone()));
        Ok(())
    }

    fn delete(&mut self, entity: &M::Entity, conn: &mut dyn Connection) -> Result<()> {
        self.inner.delete(entity, conn)?;
        self.pending.push(PendingWrite::Evict(entity.id()));
        Ok(())
    }

    fn get_by_id(
        &mut self,
        id: &EntityId,
        conn: &mut dyn Connection,
    ) -> Result<Option<M::Entity>> {
        if let Some(hit) = self.cache.get(id) {
            return Ok(Some(hit.clone()));
        }
        let loaded = self.inner.get_by_id(id, conn)?;
        if let Some(entity) = &loaded {
            self.cache.put(id.clone(), entity.clone());
        }
        Ok(loaded)
    }

    fn id_generator(&mut self) -> Option<&mut dyn IdGenerator<M::Entity>> {
        if self.empty_id.is_some() {
            Some(self as &mut dyn IdGenerator<M::Entity>)
        } else {
            None
        }
    }

    fn write_through_cache(&mut self) -> Option<&mut dyn WriteThroughCache> {
        Some(self as &mut dyn WriteThroughCache)
    }
}

impl<M: DataMapper> IdGenerator<M::Entity> for CachedDataMapper<M> {
    /// Delegates to the inner generator and patches the pending clone of the
    /// entity that was just added, so the cache sees the final id.
    fn generate(&mut self, entity: &M::Entity, conn: &mut dyn Connection) -> Result<EntityId> {
        let id = match self.inner.id_generator() {
            Some(generator) => generator.generate(entity, conn)?,
            None => entity.id(),
        };
        if let Some(PendingWrite::Put(last)) = self.pending.last_mut() {
            if last.id() == entity.id() {
                last.set_id(id.clone())?;
            }
        }
        Ok(id)
    }

    fn empty_value(&self) -> EntityId {
        self.empty_id.clone().unwrap_or(EntityId::Int(0))
    }
}

impl<M: DataMapper> WriteThroughCache for CachedDataMapper<M> {
    fn flush_to_cache(&mut self) -> Result<usize> {
        let flushed = self.pending.len();
        for write in self.pending.drain(..) {
            match write {
                PendingWrite::Put(entity) => {
                    self.cache.put(entity.id(), entity);
                }
                PendingWrite::Evict(id) => {
                    self.cache.pop(&id);
                }
            }
        }
        Ok(flushed)
    }

    fn discard_pending(&mut self) {
        self.pending.clear();
    }
}
