//! Persistence collaborators driven by the unit of work.
//!
//! A [`DataMapper`] writes one entity type. It may expose an
//! [`IdGenerator`] (ids assigned after `add`) and a [`WriteThroughCache`]
//! (flushed after a successful commit).

mod cache;
mod memory;

pub use cache::CachedDataMapper;
pub use memory::{LastInsertIdGenerator, MemoryDataMapper};

use crate::connection::Connection;
use crate::core::{EntityId, OrmError, Result};
use crate::entity::{AnyEntity, Entity};
use std::any::Any;

pub trait DataMapper: Send + 'static {
    type Entity: Entity;

    fn add(&mut self, entity: &Self::Entity, conn: &mut dyn Connection) -> Result<()>;
    fn update(&mut self, entity: &Self::Entity, conn: &mut dyn Connection) -> Result<()>;
    fn delete(&mut self, entity: &Self::Entity, conn: &mut dyn Connection) -> Result<()>;
    fn get_by_id(
        &mut self,
        id: &EntityId,
        conn: &mut dyn Connection,
    ) -> Result<Option<Self::Entity>>;

    /// Id generator invoked right after `add`, if the type has one.
    fn id_generator(&mut self) -> Option<&mut dyn IdGenerator<Self::Entity>> {
        None
    }

    /// Write-through cache flushed after a successful commit, if any.
    fn write_through_cache(&mut self) -> Option<&mut dyn WriteThroughCache> {
        None
    }
}

pub trait IdGenerator<T>: Send {
    /// Produces the business id of a freshly added entity.
    fn generate(&mut self, entity: &T, conn: &mut dyn Connection) -> Result<EntityId>;

    /// Sentinel id restored on entities whose insertion was rolled back.
    fn empty_value(&self) -> EntityId;
}

pub trait WriteThroughCache: Send {
    /// Pushes writes recorded since the last flush into the cache.
    fn flush_to_cache(&mut self) -> Result<usize>;

    /// Drops writes recorded since the last flush.
    fn discard_pending(&mut self);
}

/// Type-erased mapper stored in the unit of work's mapper table.
pub(crate) trait AnyDataMapper: Send {
    fn add(&mut self, entity: &dyn AnyEntity, conn: &mut dyn Connection) -> Result<()>;
    fn update(&mut self, entity: &dyn AnyEntity, conn: &mut dyn Connection) -> Result<()>;
    fn delete(&mut self, entity: &dyn AnyEntity, conn: &mut dyn Connection) -> Result<()>;
    fn generate_id(
        &mut self,
        entity: &dyn AnyEntity,
        conn: &mut dyn Connection,
    ) -> Result<Option<EntityId>>;
    fn empty_id(&mut self) -> Option<EntityId>;
    fn load(&mut self, id: &EntityId, conn: &mut dyn Connection)
    -> Result<Option<Box<dyn AnyEntity>>>;
    fn cache(&mut self) -> Option<&mut dyn WriteThroughCache>;
    fn as_any(&self) -> &dyn Any;
}

pub(crate) struct MapperSlot<M>(pub(crate) M);

fn typed<T: Entity>(entity: &dyn AnyEntity) -> Result<&T> {
    entity
        .downcast_ref::<T>()
        .ok_or_else(|| {
            OrmError::EntityTypeMismatch(entity.entity_type_name().to_string(), T::TYPE_NAME)
        })
}

impl<M: DataMapper> AnyDataMapper for MapperSlot<M> {
    fn add(&mut self, entity: &dyn AnyEntity, conn: &mut dyn Connection) -> Result<()> {
        self.0.add(typed::<M::Entity>(entity)?, conn)
    }

    fn update(&mut self, entity: &dyn AnyEntity, conn: &mut dyn Connection) -> Result<()> {
        self.0.update(typed::<M::Entity>(entity)?, conn)
    }

    fn delete(&mut self, entity: &dyn AnyEntity, conn: &mut dyn Connection) -> Result<()> {
        self.0.delete(typed::<M::Entity>(entity)?, conn)
    }

    fn generate_id(
        &mut self,
        entity: &dyn AnyEntity,
        conn: &mut dyn Connection,
    ) -> Result<Option<EntityId>> {
        let entity = typed::<M::Entity>(entity)?;
        match self.0.id_generator() {
            Some(generator) => generator.generate(entity, conn).map(Some),
            None => Ok(None),
        }
    }

    fn empty_id(&mut self) -> Option<EntityId> {
        self.0.id_generator().map(|generator| generator.empty_value())
    }

    fn load(
        &mut self,
        id: &EntityId,
        conn: &mut dyn Connection,
    ) -> Result<Option<Box<dyn AnyEntity>>> {
        Ok(self
            .0
            .get_by_id(id, conn)?
            .map(|entity| Box::new(entity) as Box<dyn AnyEntity>))
    }

    fn cache(&mut self) -> Option<&mut dyn WriteThroughCache> {
        self.0.write_through_cache()
    }

    fn as_any(&self) -> &dyn Any {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FieldMap;
    use crate::entity::{Diffable, IdValue};

    #[derive(Debug, Clone)]
    struct Invoice {
        id: i64,
    }

    #[derive(Debug, Clone)]
    struct Receipt {
        id: i64,
    }

    macro_rules! bare_entity {
        ($ty:ident) => {
            impl Diffable for $ty {
                fn fields(&self) -> FieldMap {
                    FieldMap::new()
                }
            }

            impl Entity for $ty {
                const TYPE_NAME: &'static str = stringify!($ty);

                fn id(&self) -> EntityId {
                    EntityId::Int(self.id)
                }

                fn set_id(&mut self, id: EntityId) -> Result<()> {
                    self.id = i64::from_entity_id(id)?;
                    Ok(())
                }
            }
        };
    }

    bare_entity!(Invoice);
    bare_entity!(Receipt);

    #[test]
    fn test_typed_rejects_foreign_entity() {
        let receipt = Receipt { id: 2 };
        match typed::<Invoice>(&receipt) {
            Err(OrmError::EntityTypeMismatch(found, expected)) => {
                assert_eq!(found, "Receipt");
                assert_eq!(expected, "Invoice");
            }
            other => panic!("unexpected result: {:?}", other.map(|i| i.id)),
        }
        assert_eq!(typed::<Receipt>(&receipt).unwrap().id, 2);
    }
}
