use std::marker::PhantomData;

use super::{DataMapper, IdGenerator};
use crate::connection::Connection;
use crate::core::{EntityId, Result};
use crate::entity::Entity;
use crate::storage::SharedDatabase;

/// Reads the id the database assigned to the last row inserted into the
/// entity's table, like `LAST_INSERT_ID()`.
pub struct LastInsertIdGenerator {
    db: SharedDatabase,
}

impl LastInsertIdGenerator {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }
}

impl<T: Entity> IdGenerator<T> for LastInsertIdGenerator {
    fn generate(&mut self, entity: &T, _conn: &mut dyn Connection) -> Result<EntityId> {
        let db = self.db.read()?;
        Ok(db
            .last_insert_id(T::TYPE_NAME)
            .unwrap_or_else(|| entity.id()))
    }

    fn empty_value(&self) -> EntityId {
        EntityId::Int(0)
    }
}

/// Data mapper storing whole entity clones in a [`MemoryDatabase`](crate::storage::MemoryDatabase).
pub struct MemoryDataMapper<T> {
    db: SharedDatabase,
    generator: Option<LastInsertIdGenerator>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> MemoryDataMapper<T> {
    /// Mapper with database-assigned integer ids.
    pub fn new(db: SharedDatabase) -> Self {
        Self {
            generator: Some(LastInsertIdGenerator::new(db.clone())),
            db,
            _marker: PhantomData,
        }
    }

    /// Mapper for entities that carry their own ids.
    pub fn with_explicit_ids(db: SharedDatabase) -> Self {
        Self {
            db,
            generator: None,
            _marker: PhantomData,
        }
    }

    pub fn database(&self) -> SharedDatabase {
        self.db.clone()
    }
}

impl<T: Entity> DataMapper for MemoryDataMapper<T> {
    type Entity = T;

    fn add(&mut self, entity: &T, _conn: &mut dyn Connection) -> Result<()> {
        self.db.write()?.insert(Box::new(entity.clone()))?;
        Ok(())
    }

    fn update(&mut self, entity: &T, _conn: &mut dyn Connection) -> Result<()> {
        self.db.write()?.update(Box::new(entity.clone()))
    }

    fn delete(&mut self, entity: &T, _conn: &mut dyn Connection) -> Result<()> {
        self.db.write()?.delete(T::TYPE_NAME, &entity.id())
    }

    fn get_by_id(&mut self, id: &EntityId, _conn: &mut dyn Connection) -> Result<Option<T>> {
        Ok(self.db.read()?.fetch::<T>(id))
    }

    fn id_generator(&mut self) -> Option<&mut dyn IdGenerator<T>> {
        self.generator
            .as_mut()
            .map(|generator| generator as &mut dyn IdGenerator<T>)
    }
}
