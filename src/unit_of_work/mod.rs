// ============================================================================
// Unit of Work
// ============================================================================
//
// Collects pending inserts, updates and deletes for entities held in the
// registry and writes them through per-type data mappers inside a single
// connection transaction (see `commit.rs`).
//
// Design Patterns Used:
// - Unit of Work: batched, ordered persistence of scheduled changes
// - Identity Map: the owned `EntityRegistry`
// - Strategy: pluggable `DataMapper` per entity type
//
// ============================================================================

mod commit;
pub mod hooks;
mod schedule;

pub use hooks::{CommitListener, CommitReport};

use crate::config::UnitOfWorkConfig;
use crate::connection::Connection;
use crate::core::{EntityId, ObjectIdentity, OrmError, Result};
use crate::entity::{Entity, EntityRef};
use crate::mapper::{AnyDataMapper, DataMapper, MapperSlot};
use crate::registry::{EntityRegistry, EntityState};
use schedule::ScheduleSet;
use std::collections::HashMap;
use tracing::{Level, event};

pub struct UnitOfWork {
    registry: EntityRegistry,
    mappers: HashMap<&'static str, Box<dyn AnyDataMapper>>,
    connection: Option<Box<dyn Connection>>,
    insertions: ScheduleSet,
    updates: ScheduleSet,
    deletions: ScheduleSet,
    listeners: Vec<Box<dyn CommitListener>>,
    config: UnitOfWorkConfig,
}

impl Default for UnitOfWork {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::with_config(UnitOfWorkConfig::default())
    }

    pub fn with_config(config: UnitOfWorkConfig) -> Self {
        Self {
            registry: EntityRegistry::new(),
            mappers: HashMap::new(),
            connection: None,
            insertions: ScheduleSet::default(),
            updates: ScheduleSet::default(),
            deletions: ScheduleSet::default(),
            listeners: Vec::new(),
            config,
        }
    }

    pub fn config(&self) -> &UnitOfWorkConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------

    pub fn set_connection(&mut self, connection: impl Connection + 'static) {
        self.connection = Some(Box::new(connection));
    }

    /// Builder form of [`UnitOfWork::set_connection`].
    pub fn with_connection(mut self, connection: impl Connection + 'static) -> Self {
        self.set_connection(connection);
        self
    }

    pub fn take_connection(&mut self) -> Option<Box<dyn Connection>> {
        self.connection.take()
    }

    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    // ------------------------------------------------------------------
    // Registry access
    // ------------------------------------------------------------------

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut EntityRegistry {
        &mut self.registry
    }

    pub fn attach<T: Entity>(&mut self, entity: T) -> EntityRef<T> {
        self.registry.attach(entity)
    }

    pub fn get<T: Entity>(&self, handle: &EntityRef<T>) -> Result<&T> {
        self.registry.get(handle)
    }

    pub fn get_mut<T: Entity>(&mut self, handle: &EntityRef<T>) -> Result<&mut T> {
        self.registry.get_mut(handle)
    }

    /// Registers an instance with the identity map, returning the canonical handle.
    pub fn register<T: Entity>(&mut self, handle: EntityRef<T>) -> Result<EntityRef<T>> {
        self.registry.register(handle)
    }

    // ------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------

    pub fn schedule_for_insertion<T: Entity>(&mut self, handle: EntityRef<T>) {
        let identity = handle.identity();
        self.insertions.insert(identity);
        self.registry.set_state_of(identity, EntityState::Queued);
    }

    pub fn schedule_for_update<T: Entity>(&mut self, handle: EntityRef<T>) {
        self.updates.insert(handle.identity());
    }

    pub fn schedule_for_deletion<T: Entity>(&mut self, handle: EntityRef<T>) {
        self.deletions.insert(handle.identity());
    }

    /// Moves `entity` into the arena and schedules it for insertion.
    pub fn persist<T: Entity>(&mut self, entity: T) -> EntityRef<T> {
        let handle = self.registry.attach(entity);
        self.schedule_for_insertion(handle);
        handle
    }

    pub fn is_scheduled<T: Entity>(&self, handle: EntityRef<T>) -> bool {
        self.is_scheduled_identity(handle.identity())
    }

    pub(crate) fn is_scheduled_identity(&self, identity: ObjectIdentity) -> bool {
        self.insertions.contains(identity)
            || self.updates.contains(identity)
            || self.deletions.contains(identity)
    }

    pub fn scheduled_insertions(&self) -> &[ObjectIdentity] {
        self.insertions.as_slice()
    }

    pub fn scheduled_updates(&self) -> &[ObjectIdentity] {
        self.updates.as_slice()
    }

    pub fn scheduled_deletions(&self) -> &[ObjectIdentity] {
        self.deletions.as_slice()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Stops tracking an entity and cancels any write scheduled for it.
    pub fn detach<T: Entity>(&mut self, handle: EntityRef<T>) {
        self.detach_identity(handle.identity());
    }

    pub(crate) fn detach_identity(&mut self, identity: ObjectIdentity) {
        self.registry.deregister_identity(identity);
        self.insertions.remove(identity);
        self.updates.remove(identity);
        self.deletions.remove(identity);
        self.registry.remove_callbacks_involving(identity);
    }

    /// Drops all scheduling, callbacks and tracking data.
    pub fn dispose(&mut self) {
        self.clear_schedule();
        self.registry.clear();
        event!(Level::DEBUG, label = %self.config.label, "unit of work disposed");
    }

    pub(crate) fn clear_schedule(&mut self) {
        self.insertions.clear();
        self.updates.clear();
        self.deletions.clear();
        self.registry.clear_callbacks();
    }

    // ------------------------------------------------------------------
    // Collaborators
    // ------------------------------------------------------------------

    /// Registers the mapper for `M::Entity`, replacing any previous one.
    pub fn register_data_mapper<M: DataMapper>(&mut self, mapper: M) {
        let type_name = <M::Entity as Entity>::TYPE_NAME;
        if self
            .mappers
            .insert(type_name, Box::new(MapperSlot(mapper)))
            .is_some()
        {
            event!(Level::DEBUG, type_name, "data mapper replaced");
        }
    }

    pub fn has_data_mapper(&self, type_name: &str) -> bool {
        self.mappers.contains_key(type_name)
    }

    /// The registered mapper for `M::Entity`, if it is of type `M`.
    pub fn data_mapper<M: DataMapper>(&self) -> Option<&M> {
        self.mappers
            .get(<M::Entity as Entity>::TYPE_NAME)?
            .as_any()
            .downcast_ref::<M>()
    }

    pub fn register_aggregate_root_child<R, C, F>(
        &mut self,
        root: EntityRef<R>,
        child: EntityRef<C>,
        apply: F,
    ) where
        R: Entity,
        C: Entity,
        F: Fn(&R, &mut C) + Send + 'static,
    {
        self.registry
            .register_aggregate_root_callback(root, child, apply);
    }

    pub fn add_listener(&mut self, listener: impl CommitListener + 'static) {
        self.listeners.push(Box::new(listener));
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Identity-map read-through: returns the indexed instance when present,
    /// otherwise fetches through the type's mapper and registers the result.
    pub fn load<T: Entity>(&mut self, id: impl Into<EntityId>) -> Result<Option<EntityRef<T>>> {
        let id = id.into();
        if let Some(handle) = self.registry.get_entity::<T>(id.clone()) {
            return Ok(Some(handle));
        }

        let conn = self.connection.as_deref_mut().ok_or(OrmError::NoConnection)?;
        let mapper = self
            .mappers
            .get_mut(T::TYPE_NAME)
            .ok_or_else(|| OrmError::MissingDataMapper(T::TYPE_NAME.to_string()))?;

        let Some(row) = mapper.load(&id, conn)? else {
            return Ok(None);
        };
        let row_type = row.entity_type_name();
        let entity = row
            .into_any()
            .downcast::<T>()
            .map_err(|_| OrmError::EntityTypeMismatch(row_type.to_string(), T::TYPE_NAME))?;

        let handle = self.registry.attach(*entity);
        event!(Level::DEBUG, type_name = T::TYPE_NAME, id = %id, "loaded");
        self.registry.register(handle).map(Some)
    }
}
