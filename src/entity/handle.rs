use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::core::ObjectIdentity;

/// Typed handle to an entity instance living in a registry arena.
///
/// Handles are `Copy`: every copy refers to the same instance, so a mutation
/// made through one copy is visible through all of them.
pub struct EntityRef<T> {
    identity: ObjectIdentity,
    _marker: PhantomData<fn() -> T>,
}

impl<T> EntityRef<T> {
    pub(crate) fn new(identity: ObjectIdentity) -> Self {
        Self {
            identity,
            _marker: PhantomData,
        }
    }

    pub fn identity(&self) -> ObjectIdentity {
        self.identity
    }
}

impl<T> Clone for EntityRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for EntityRef<T> {}

impl<T> PartialEq for EntityRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}

impl<T> Eq for EntityRef<T> {}

impl<T> Hash for EntityRef<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.hash(state);
    }
}

impl<T> fmt::Debug for EntityRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EntityRef").field(&self.identity).finish()
    }
}

impl<T> From<EntityRef<T>> for ObjectIdentity {
    fn from(handle: EntityRef<T>) -> Self {
        handle.identity
    }
}
