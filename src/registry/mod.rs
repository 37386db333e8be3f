// ============================================================================
// Entity Registry (identity map)
// ============================================================================
//
// Owns the arena of entity instances, one record per tracked identity
// (state + snapshot), the (type, business id) index, per-type comparators
// and aggregate-root callbacks.
//
// ============================================================================

mod callbacks;
pub mod state;

pub use state::EntityState;

use crate::core::{EntityId, EntityKey, ObjectIdentity, OrmError, Result};
use crate::entity::{AnyEntity, Entity, EntityRef};
use callbacks::AggregateCallbacks;
use std::collections::{BTreeMap, HashMap};
use tracing::{Level, event};

type Comparator = Box<dyn Fn(&dyn AnyEntity, &dyn AnyEntity) -> bool + Send>;

#[derive(Clone, Default)]
struct RegistryRecord {
    state: EntityState,
    /// Owned clone taken at registration; never aliases the arena instance.
    snapshot: Option<Box<dyn AnyEntity>>,
    /// Key this identity is indexed under, if any.
    key: Option<EntityKey>,
}

/// Prior values of the records and index entries changed since the
/// savepoint began. The first write to an entry wins.
#[derive(Default)]
pub(crate) struct RegistrySavepoint {
    records: HashMap<ObjectIdentity, Option<RegistryRecord>>,
    index: HashMap<EntityKey, Option<ObjectIdentity>>,
}

#[derive(Default)]
pub struct EntityRegistry {
    arena: HashMap<ObjectIdentity, Box<dyn AnyEntity>>,
    records: BTreeMap<ObjectIdentity, RegistryRecord>,
    index: HashMap<EntityKey, ObjectIdentity>,
    comparators: HashMap<&'static str, Comparator>,
    callbacks: AggregateCallbacks,
    savepoint: Option<RegistrySavepoint>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Arena
    // ------------------------------------------------------------------

    /// Moves an instance into the arena. It starts out `NeverTracked`.
    pub fn attach<T: Entity>(&mut self, entity: T) -> EntityRef<T> {
        let identity = ObjectIdentity::next();
        self.arena.insert(identity, Box::new(entity));
        EntityRef::new(identity)
    }

    pub fn contains(&self, identity: ObjectIdentity) -> bool {
        self.arena.contains_key(&identity)
    }

    pub fn get<T: Entity>(&self, handle: &EntityRef<T>) -> Result<&T> {
        let identity = handle.identity();
        self.arena
            .get(&identity)
            .and_then(|entity| entity.as_ref().downcast_ref::<T>())
            .ok_or(OrmError::UnknownEntity(identity))
    }

    pub fn get_mut<T: Entity>(&mut self, handle: &EntityRef<T>) -> Result<&mut T> {
        let identity = handle.identity();
        self.arena
            .get_mut(&identity)
            .and_then(|entity| entity.as_mut().downcast_mut::<T>())
            .ok_or(OrmError::UnknownEntity(identity))
    }

    /// Recovers a typed handle for an identity held in this arena.
    pub fn handle<T: Entity>(&self, identity: ObjectIdentity) -> Option<EntityRef<T>> {
        self.arena
            .get(&identity)
            .filter(|entity| entity.as_any().is::<T>())
            .map(|_| EntityRef::new(identity))
    }

    /// Deregisters the instance and hands ownership back to the caller.
    pub fn take<T: Entity>(&mut self, handle: EntityRef<T>) -> Result<T> {
        let identity = handle.identity();
        self.get(&handle)?;
        self.deregister_identity(identity);
        self.callbacks.remove_root(identity);
        self.save_record(identity);
        self.records.remove(&identity);
        let entity = self
            .arena
            .remove(&identity)
            .ok_or(OrmError::UnknownEntity(identity))?;
        entity
            .into_any()
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|_| OrmError::UnknownEntity(identity))
    }

    pub(crate) fn entity(&self, identity: ObjectIdentity) -> Result<&dyn AnyEntity> {
        self.arena
            .get(&identity)
            .map(|entity| entity.as_ref())
            .ok_or(OrmError::UnknownEntity(identity))
    }

    pub(crate) fn entity_mut(&mut self, identity: ObjectIdentity) -> Result<&mut dyn AnyEntity> {
        match self.arena.get_mut(&identity) {
            Some(entity) => Ok(entity.as_mut()),
            None => Err(OrmError::UnknownEntity(identity)),
        }
    }

    // ------------------------------------------------------------------
    // Identity map
    // ------------------------------------------------------------------

    /// Registers an instance under its `(type, id)` key.
    ///
    /// When a different instance is already indexed under the key, that
    /// instance is canonical: its handle is returned and the argument is left
    /// untouched. Registering the same instance again is a no-op.
    pub fn register<T: Entity>(&mut self, handle: EntityRef<T>) -> Result<EntityRef<T>> {
        let canonical = self.register_identity(handle.identity())?;
        Ok(EntityRef::new(canonical))
    }

    pub(crate) fn register_identity(&mut self, identity: ObjectIdentity) -> Result<ObjectIdentity> {
        let key = self.current_key(identity)?;

        if let Some(&existing) = self.index.get(&key) {
            if existing != identity {
                event!(
                    Level::DEBUG,
                    key = %key,
                    canonical = %existing,
                    superseded = %identity,
                    "identity map already holds an instance for key"
                );
                return Ok(existing);
            }

            let registered = self.records.get(&identity).is_some_and(|record| {
                record.state == EntityState::Registered && record.snapshot.is_some()
            });
            if registered {
                return Ok(identity);
            }
        }

        self.track(identity, key)?;
        Ok(identity)
    }

    /// Re-keys and re-snapshots an instance after its row was written.
    pub fn refresh<T: Entity>(&mut self, handle: EntityRef<T>) -> Result<()> {
        self.refresh_identity(handle.identity())
    }

    pub(crate) fn refresh_identity(&mut self, identity: ObjectIdentity) -> Result<()> {
        let key = self.current_key(identity)?;
        if let Some(&existing) = self.index.get(&key) {
            if existing != identity {
                event!(
                    Level::WARN,
                    key = %key,
                    previous = %existing,
                    replacement = %identity,
                    "written entity replaces another instance in the identity map"
                );
                if self.records.contains_key(&existing) {
                    self.record_mut(existing).key = None;
                }
            }
        }
        self.track(identity, key)
    }

    fn track(&mut self, identity: ObjectIdentity, key: EntityKey) -> Result<()> {
        let snapshot = self.entity(identity)?.clone_entity();
        self.unindex(identity);
        self.save_key(&key);
        self.index.insert(key.clone(), identity);

        let record = self.record_mut(identity);
        record.state = EntityState::Registered;
        record.snapshot = Some(snapshot);
        record.key = Some(key);
        Ok(())
    }

    fn current_key(&self, identity: ObjectIdentity) -> Result<EntityKey> {
        let entity = self.entity(identity)?;
        Ok(EntityKey::new(entity.entity_type_name(), entity.entity_id()))
    }

    fn unindex(&mut self, identity: ObjectIdentity) {
        let Some(key) = self.records.get(&identity).and_then(|r| r.key.clone()) else {
            return;
        };
        self.record_mut(identity).key = None;
        if self.index.get(&key) == Some(&identity) {
            self.save_key(&key);
            self.index.remove(&key);
        }
    }

    /// Whether the index still maps this identity's recorded key to it.
    pub(crate) fn is_indexed(&self, identity: ObjectIdentity) -> bool {
        self.records
            .get(&identity)
            .and_then(|record| record.key.as_ref())
            .is_some_and(|key| self.index.get(key) == Some(&identity))
    }

    fn record_mut(&mut self, identity: ObjectIdentity) -> &mut RegistryRecord {
        self.save_record(identity);
        self.records.entry(identity).or_default()
    }

    fn save_record(&mut self, identity: ObjectIdentity) {
        if let Some(savepoint) = self.savepoint.as_mut() {
            savepoint
                .records
                .entry(identity)
                .or_insert_with(|| self.records.get(&identity).cloned());
        }
    }

    fn save_key(&mut self, key: &EntityKey) {
        if let Some(savepoint) = self.savepoint.as_mut() {
            if !savepoint.index.contains_key(key) {
                savepoint.index.insert(key.clone(), self.index.get(key).copied());
            }
        }
    }

    /// Detaches a `Queued` or `Registered` instance from tracking.
    pub fn deregister<T: Entity>(&mut self, handle: EntityRef<T>) {
        self.deregister_identity(handle.identity());
    }

    pub(crate) fn deregister_identity(&mut self, identity: ObjectIdentity) {
        if !self.get_state_of(identity).is_tracked() {
            return;
        }

        self.unindex(identity);
        if self.records.contains_key(&identity) {
            let record = self.record_mut(identity);
            record.state = EntityState::Unregistered;
            record.snapshot = None;
        }
        self.callbacks.remove_child(identity);
    }

    pub fn is_registered<T: Entity>(&self, handle: EntityRef<T>) -> bool {
        self.is_registered_identity(handle.identity())
    }

    pub(crate) fn is_registered_identity(&self, identity: ObjectIdentity) -> bool {
        if self.get_state_of(identity) == EntityState::Registered {
            return true;
        }
        // Stale state flags: trust the index if it still points here.
        match self.current_key(identity) {
            Ok(key) => self.index.get(&key) == Some(&identity),
            Err(_) => false,
        }
    }

    // ------------------------------------------------------------------
    // Dirty checking
    // ------------------------------------------------------------------

    /// Compares the instance with the snapshot taken when it was registered.
    pub fn has_changed<T: Entity>(&self, handle: EntityRef<T>) -> Result<bool> {
        self.has_changed_identity(handle.identity())
    }

    pub(crate) fn has_changed_identity(&self, identity: ObjectIdentity) -> Result<bool> {
        let snapshot = self
            .records
            .get(&identity)
            .and_then(|record| record.snapshot.as_deref())
            .ok_or(OrmError::NotTracked(identity))?;
        let current = self.entity(identity)?;

        if let Some(comparator) = self.comparators.get(current.entity_type_name()) {
            return Ok(!comparator(snapshot, current));
        }

        let original = snapshot.field_values();
        let live = current.field_values();
        if original.len() != live.len() {
            return Ok(true);
        }
        Ok(original
            .iter()
            .any(|(field, value)| live.get(field) != Some(value)))
    }

    /// Overrides structural comparison for `T`. The comparator returns
    /// `true` when `original` and `current` are considered identical.
    pub fn register_comparison_function<T, F>(&mut self, comparator: F)
    where
        T: Entity,
        F: Fn(&T, &T) -> bool + Send + 'static,
    {
        let erased: Comparator = Box::new(move |original, current| {
            match (
                original.downcast_ref::<T>(),
                current.downcast_ref::<T>(),
            ) {
                (Some(original), Some(current)) => comparator(original, current),
                _ => false,
            }
        });
        self.comparators.insert(T::TYPE_NAME, erased);
    }

    // ------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------

    pub fn set_state<T: Entity>(&mut self, handle: EntityRef<T>, state: EntityState) {
        self.set_state_of(handle.identity(), state);
    }

    pub fn get_state<T: Entity>(&self, handle: EntityRef<T>) -> EntityState {
        self.get_state_of(handle.identity())
    }

    pub(crate) fn set_state_of(&mut self, identity: ObjectIdentity, state: EntityState) {
        self.record_mut(identity).state = state;
    }

    pub fn get_state_of(&self, identity: ObjectIdentity) -> EntityState {
        self.records
            .get(&identity)
            .map(|record| record.state)
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Aggregate roots
    // ------------------------------------------------------------------

    /// Registers `apply` to run right before `child` is written, with `root`
    /// passed in. Several roots may target the same child.
    pub fn register_aggregate_root_callback<R, C, F>(
        &mut self,
        root: EntityRef<R>,
        child: EntityRef<C>,
        apply: F,
    ) where
        R: Entity,
        C: Entity,
        F: Fn(&R, &mut C) + Send + 'static,
    {
        let (root_id, child_id) = (root.identity(), child.identity());
        self.callbacks.register(
            root_id,
            child_id,
            Box::new(move |root, child| {
                let root = root
                    .downcast_ref::<R>()
                    .ok_or(OrmError::UnknownEntity(root_id))?;
                let child = child
                    .downcast_mut::<C>()
                    .ok_or(OrmError::UnknownEntity(child_id))?;
                apply(root, child);
                Ok(())
            }),
        );
    }

    pub fn run_aggregate_root_callbacks<C: Entity>(&mut self, child: EntityRef<C>) -> Result<()> {
        self.run_callbacks_for(child.identity()).map(|_| ())
    }

    /// Runs every callback registered for `child`, returning how many ran.
    pub(crate) fn run_callbacks_for(&mut self, child: ObjectIdentity) -> Result<usize> {
        let Some(callbacks) = self.callbacks.for_child(child) else {
            return Ok(0);
        };
        let mut child_entity = self
            .arena
            .remove(&child)
            .ok_or(OrmError::UnknownEntity(child))?;

        let mut outcome = Ok(callbacks.len());
        for callback in callbacks {
            let result = if callback.root == child {
                let root = child_entity.clone_entity();
                (callback.apply)(root.as_ref(), child_entity.as_mut())
            } else {
                match self.arena.get(&callback.root) {
                    Some(root) => (callback.apply)(root.as_ref(), child_entity.as_mut()),
                    None => Err(OrmError::UnknownEntity(callback.root)),
                }
            };
            if let Err(err) = result {
                outcome = Err(err);
                break;
            }
        }

        self.arena.insert(child, child_entity);
        outcome
    }

    pub(crate) fn remove_callbacks_involving(&mut self, identity: ObjectIdentity) {
        self.callbacks.remove_child(identity);
        self.callbacks.remove_root(identity);
    }

    pub(crate) fn clear_callbacks(&mut self) {
        self.callbacks.clear();
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.count()
    }

    // ------------------------------------------------------------------
    // Index access
    // ------------------------------------------------------------------

    /// All indexed entries, ordered by instance identity.
    pub fn get_entities(&self) -> Vec<(EntityKey, ObjectIdentity)> {
        let mut entries: Vec<_> = self
            .index
            .iter()
            .map(|(key, identity)| (key.clone(), *identity))
            .collect();
        entries.sort_by_key(|(_, identity)| *identity);
        entries
    }

    pub fn get_entity<T: Entity>(&self, id: impl Into<EntityId>) -> Option<EntityRef<T>> {
        let identity = self.lookup(T::TYPE_NAME, id)?;
        self.handle::<T>(identity)
    }

    pub fn lookup(&self, type_name: &'static str, id: impl Into<EntityId>) -> Option<ObjectIdentity> {
        self.index
            .get(&EntityKey::new(type_name, id.into()))
            .copied()
    }

    /// Identities currently in `Registered` state, in identity order.
    pub(crate) fn registered_identities(&self) -> Vec<ObjectIdentity> {
        self.records
            .iter()
            .filter(|(_, record)| record.state == EntityState::Registered)
            .map(|(identity, _)| *identity)
            .collect()
    }

    /// Wipes indices, snapshots, states and callbacks. Arena instances survive.
    pub fn clear(&mut self) {
        self.records.clear();
        self.index.clear();
        self.callbacks.clear();
    }

    // ------------------------------------------------------------------
    // Savepoints
    // ------------------------------------------------------------------

    /// Starts journaling tracking changes so they can be undone.
    pub(crate) fn begin_savepoint(&mut self) {
        self.savepoint = Some(RegistrySavepoint::default());
    }

    pub(crate) fn release_savepoint(&mut self) {
        self.savepoint = None;
    }

    /// Puts back every record and index entry touched since the savepoint.
    pub(crate) fn rollback_to_savepoint(&mut self) {
        let Some(savepoint) = self.savepoint.take() else {
            return;
        };
        for (identity, record) in savepoint.records {
            match record {
                Some(record) => self.records.insert(identity, record),
                None => self.records.remove(&identity),
            };
        }
        for (key, identity) in savepoint.index {
            match identity {
                Some(identity) => self.index.insert(key, identity),
                None => self.index.remove(&key),
            };
        }
        event!(Level::DEBUG, "registry rolled back to savepoint");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FieldMap, Value};
    use crate::entity::Diffable;

    #[derive(Debug, Clone)]
    struct Note {
        id: i64,
        body: String,
        extra: Vec<(String, Value)>,
    }

    impl Note {
        fn new(id: i64, body: &str) -> Self {
            Self {
                id,
                body: body.to_string(),
                extra: Vec::new(),
            }
        }
    }

    impl Diffable for Note {
        fn fields(&self) -> FieldMap {
            let mut fields = FieldMap::new();
            fields.insert("id".into(), Value::Integer(self.id));
            fields.insert("body".into(), Value::Text(self.body.clone()));
            for (name, value) in &self.extra {
                fields.insert(name.clone(), value.clone());
            }
            fields
        }
    }

    impl Entity for Note {
        const TYPE_NAME: &'static str = "Note";

        fn id(&self) -> EntityId {
            EntityId::Int(self.id)
        }

        fn set_id(&mut self, id: EntityId) -> Result<()> {
            self.id = crate::entity::IdValue::from_entity_id(id)?;
            Ok(())
        }
    }

    #[test]
    fn test_register_indexes_and_snapshots() {
        let mut registry = EntityRegistry::new();
        let note = registry.attach(Note::new(1, "a"));
        assert_eq!(registry.get_state(note), EntityState::NeverTracked);

        let canonical = registry.register(note).unwrap();
        assert_eq!(canonical, note);
        assert_eq!(registry.get_state(note), EntityState::Registered);
        assert_eq!(registry.get_entity::<Note>(1), Some(note));
        assert!(!registry.has_changed(note).unwrap());
    }

    #[test]
    fn test_register_twice_keeps_original_snapshot() {
        let mut registry = EntityRegistry::new();
        let note = registry.attach(Note::new(1, "a"));
        registry.register(note).unwrap();
        registry.get_mut(&note).unwrap().body = "b".into();

        registry.register(note).unwrap();
        assert!(registry.has_changed(note).unwrap());
        assert_eq!(registry.get_entities().len(), 1);
    }

    #[test]
    fn test_refresh_rekeys_after_id_change() {
        let mut registry = EntityRegistry::new();
        let note = registry.attach(Note::new(0, "a"));
        registry.register(note).unwrap();
        registry.get_mut(&note).unwrap().id = 9;

        registry.refresh(note).unwrap();
        assert_eq!(registry.get_entity::<Note>(9), Some(note));
        assert_eq!(registry.get_entity::<Note>(0), None);
        assert!(!registry.has_changed(note).unwrap());
    }

    #[test]
    fn test_field_count_difference_is_a_change() {
        let mut registry = EntityRegistry::new();
        let note = registry.attach(Note::new(1, "a"));
        registry.register(note).unwrap();
        registry
            .get_mut(&note)
            .unwrap()
            .extra
            .push(("tag".into(), Value::Null));
        assert!(registry.has_changed(note).unwrap());
    }

    #[test]
    fn test_has_changed_requires_snapshot() {
        let mut registry = EntityRegistry::new();
        let note = registry.attach(Note::new(1, "a"));
        assert!(matches!(
            registry.has_changed(note),
            Err(OrmError::NotTracked(id)) if id == note.identity()
        ));
    }

    #[test]
    fn test_deregister_only_from_tracked_states() {
        let mut registry = EntityRegistry::new();
        let note = registry.attach(Note::new(1, "a"));
        registry.deregister(note);
        assert_eq!(registry.get_state(note), EntityState::NeverTracked);

        registry.register(note).unwrap();
        registry.deregister(note);
        assert_eq!(registry.get_state(note), EntityState::Unregistered);
        assert!(!registry.is_registered(note));
        assert!(registry.get_entities().is_empty());
    }

    #[test]
    fn test_is_registered_trusts_index_over_state() {
        let mut registry = EntityRegistry::new();
        let note = registry.attach(Note::new(1, "a"));
        registry.register(note).unwrap();
        registry.set_state(note, EntityState::Queued);
        assert!(registry.is_registered(note));
    }

    #[test]
    fn test_callbacks_run_with_self_root() {
        let mut registry = EntityRegistry::new();
        let note = registry.attach(Note::new(4, "a"));
        registry.register_aggregate_root_callback(note, note, |root: &Note, child: &mut Note| {
            child.body = format!("{}-{}", root.body, root.id);
        });
        registry.run_aggregate_root_callbacks(note).unwrap();
        assert_eq!(registry.get(&note).unwrap().body, "a-4");
    }

    #[test]
    fn test_take_drops_callbacks_of_root() {
        let mut registry = EntityRegistry::new();
        let root = registry.attach(Note::new(1, "root"));
        let child = registry.attach(Note::new(2, "child"));
        registry.register_aggregate_root_callback(root, child, |_: &Note, _: &mut Note| {});
        registry.take(root).unwrap();

        assert_eq!(registry.callback_count(), 0);
        registry.run_aggregate_root_callbacks(child).unwrap();
    }

    #[test]
    fn test_take_returns_owned_instance() {
        let mut registry = EntityRegistry::new();
        let note = registry.attach(Note::new(3, "x"));
        registry.register(note).unwrap();

        let owned = registry.take(note).unwrap();
        assert_eq!(owned.body, "x");
        assert!(registry.get_entity::<Note>(3).is_none());
        assert!(matches!(registry.get(&note), Err(OrmError::UnknownEntity(_))));
    }

    #[test]
    fn test_clear_keeps_arena() {
        let mut registry = EntityRegistry::new();
        let note = registry.attach(Note::new(1, "a"));
        registry.register(note).unwrap();
        registry.clear();

        assert_eq!(registry.get_state(note), EntityState::NeverTracked);
        assert!(registry.get_entities().is_empty());
        assert_eq!(registry.get(&note).unwrap().body, "a");
    }

    #[test]
    fn test_savepoint_restores_tracking() {
        let mut registry = EntityRegistry::new();
        let note = registry.attach(Note::new(1, "a"));
        registry.register(note).unwrap();
        registry.begin_savepoint();

        registry.get_mut(&note).unwrap().body = "b".into();
        registry.refresh(note).unwrap();
        assert!(!registry.has_changed(note).unwrap());

        registry.rollback_to_savepoint();
        assert!(registry.has_changed(note).unwrap());
    }

    #[test]
    fn test_savepoint_journals_only_touched_records() {
        let mut registry = EntityRegistry::new();
        let notes: Vec<_> = (1..=5)
            .map(|id| {
                let note = registry.attach(Note::new(id, "n"));
                registry.register(note).unwrap()
            })
            .collect();
        registry.begin_savepoint();

        registry.get_mut(&notes[0]).unwrap().id = 50;
        registry.refresh(notes[0]).unwrap();

        let journaled = registry.savepoint.as_ref().map(|s| s.records.len());
        assert_eq!(journaled, Some(1));
        registry.release_savepoint();
        assert_eq!(registry.get_entity::<Note>(50), Some(notes[0]));
    }

    #[test]
    fn test_savepoint_undoes_rekey_and_displacement() {
        let mut registry = EntityRegistry::new();
        let first = registry.attach(Note::new(1, "first"));
        let second = registry.attach(Note::new(2, "second"));
        registry.register(first).unwrap();
        registry.register(second).unwrap();
        registry.begin_savepoint();

        // second takes over key 1, first loses its index entry
        registry.get_mut(&second).unwrap().id = 1;
        registry.refresh(second).unwrap();
        assert_eq!(registry.get_entity::<Note>(1), Some(second));
        assert!(!registry.is_indexed(first.identity()));

        registry.rollback_to_savepoint();
        assert_eq!(registry.get_entity::<Note>(1), Some(first));
        assert_eq!(registry.get_entity::<Note>(2), Some(second));
        assert!(registry.is_indexed(first.identity()));
        assert!(registry.savepoint.is_none());
    }
}
