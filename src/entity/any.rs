use std::any::Any;

use super::Entity;
use crate::core::{EntityId, FieldMap, Result};

/// Type-erased view of an [`Entity`], used by the arena and the mapper table.
pub trait AnyEntity: Send + Sync {
    fn entity_type_name(&self) -> &'static str;
    fn entity_id(&self) -> EntityId;
    fn assign_id(&mut self, id: EntityId) -> Result<()>;
    fn field_values(&self) -> FieldMap;
    fn clone_entity(&self) -> Box<dyn AnyEntity>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Entity> AnyEntity for T {
    fn entity_type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn entity_id(&self) -> EntityId {
        self.id()
    }

    fn assign_id(&mut self, id: EntityId) -> Result<()> {
        self.set_id(id)
    }

    fn field_values(&self) -> FieldMap {
        self.fields()
    }

    fn clone_entity(&self) -> Box<dyn AnyEntity> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl Clone for Box<dyn AnyEntity> {
    fn clone(&self) -> Self {
        self.as_ref().clone_entity()
    }
}

impl dyn AnyEntity + '_ {
    pub fn downcast_ref<T: Entity>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Entity>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}
