//! Entity contracts consumed by the registry and the unit of work.
//!
//! An entity exposes a business id and an enumeration of its fields. The
//! field enumeration is what dirty checking compares against the snapshot
//! taken at registration time; `#[derive(Entity)]` generates it from the
//! struct definition.

mod any;
mod handle;

pub use any::AnyEntity;
pub use handle::EntityRef;

use crate::core::{EntityId, FieldMap, OrmError, Result};

/// Enumeration of an entity's comparable field values.
pub trait Diffable {
    fn fields(&self) -> FieldMap;
}

/// A domain object with a business identifier that can be tracked.
pub trait Entity: Diffable + Clone + Send + Sync + 'static {
    /// Logical type name used for identity-map keys and mapper lookup.
    const TYPE_NAME: &'static str;

    fn id(&self) -> EntityId;

    /// Assigns a business id, failing when the id kind does not fit the field.
    fn set_id(&mut self, id: EntityId) -> Result<()>;
}

/// Conversion between an id field's Rust type and [`EntityId`].
pub trait IdValue: Sized {
    fn to_entity_id(&self) -> EntityId;
    fn from_entity_id(id: EntityId) -> Result<Self>;
}

fn id_mismatch(expected: &str, id: &EntityId) -> OrmError {
    OrmError::IdTypeMismatch(format!(
        "expected {} id, got {} id '{}'",
        expected,
        id.kind(),
        id
    ))
}

impl IdValue for i64 {
    fn to_entity_id(&self) -> EntityId {
        EntityId::Int(*self)
    }

    fn from_entity_id(id: EntityId) -> Result<Self> {
        id.as_i64().ok_or_else(|| id_mismatch("integer", &id))
    }
}

// Only types that widen losslessly into i64; u64 and usize ids would wrap.
macro_rules! narrow_id_value {
    ($($ty:ty),*) => {
        $(
            impl IdValue for $ty {
                fn to_entity_id(&self) -> EntityId {
                    EntityId::Int(i64::from(*self))
                }

                fn from_entity_id(id: EntityId) -> Result<Self> {
                    let raw = id.as_i64().ok_or_else(|| id_mismatch("integer", &id))?;
                    <$ty>::try_from(raw).map_err(|_| {
                        OrmError::IdTypeMismatch(format!(
                            "id {} does not fit into {}",
                            raw,
                            stringify!($ty)
                        ))
                    })
                }
            }
        )*
    };
}

narrow_id_value!(i32, u32);

impl IdValue for String {
    fn to_entity_id(&self) -> EntityId {
        EntityId::Text(self.clone())
    }

    fn from_entity_id(id: EntityId) -> Result<Self> {
        match id {
            EntityId::Text(s) => Ok(s),
            other => Err(id_mismatch("text", &other)),
        }
    }
}

impl IdValue for EntityId {
    fn to_entity_id(&self) -> EntityId {
        self.clone()
    }

    fn from_entity_id(id: EntityId) -> Result<Self> {
        Ok(id)
    }
}
