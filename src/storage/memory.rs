use super::change::Change;
use crate::core::{EntityId, OrmError, Result};
use crate::entity::{AnyEntity, Entity};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

/// Database handle shared between a connection and the mappers using it.
pub type SharedDatabase = Arc<RwLock<MemoryDatabase>>;

pub(crate) struct MemoryTable {
    pub(crate) rows: BTreeMap<EntityId, Box<dyn AnyEntity>>,
    /// `None` once an explicit `i64::MAX` id used up the sequence.
    next_id: Option<i64>,
    last_insert_id: Option<EntityId>,
}

impl Default for MemoryTable {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            next_id: Some(1),
            last_insert_id: None,
        }
    }
}

/// In-memory table store keyed by entity type name and business id.
///
/// Rows are whole entity clones. Writes made between `begin` and
/// `commit`/`rollback` are journaled so a rollback restores the previous
/// rows. Id sequences are not rolled back.
#[derive(Default)]
pub struct MemoryDatabase {
    tables: HashMap<&'static str, MemoryTable>,
    journal: Option<Vec<Change>>,
}

/// Ids treated as "not assigned yet": the database picks the next sequence value.
pub fn is_unassigned(id: &EntityId) -> bool {
    match id {
        EntityId::Int(i) => *i == 0,
        EntityId::Text(s) => s.is_empty(),
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedDatabase {
        Arc::new(RwLock::new(Self::new()))
    }

    pub fn in_transaction(&self) -> bool {
        self.journal.is_some()
    }

    pub fn begin(&mut self) -> Result<()> {
        if self.journal.is_some() {
            return Err(OrmError::TransactionState(
                "Transaction already active".into(),
            ));
        }
        self.journal = Some(Vec::new());
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        self.journal
            .take()
            .map(|_| ())
            .ok_or_else(|| OrmError::TransactionState("No active transaction".into()))
    }

    pub fn rollback(&mut self) -> Result<()> {
        let journal = self
            .journal
            .take()
            .ok_or_else(|| OrmError::TransactionState("No active transaction".into()))?;
        for change in journal.into_iter().rev() {
            change.undo(&mut self.tables);
        }
        Ok(())
    }

    fn record(&mut self, change: Change) {
        if let Some(journal) = self.journal.as_mut() {
            journal.push(change);
        }
    }

    /// Inserts a row, assigning the next sequence value when its id is unassigned.
    pub fn insert(&mut self, mut row: Box<dyn AnyEntity>) -> Result<EntityId> {
        let table_name = row.entity_type_name();
        let table = self.tables.entry(table_name).or_default();

        let mut id = row.entity_id();
        if is_unassigned(&id) {
            let next = table.next_id.ok_or_else(|| {
                OrmError::ConstraintViolation(format!(
                    "Id sequence of table '{}' is exhausted",
                    table_name
                ))
            })?;
            id = EntityId::Int(next);
            row.assign_id(id.clone())?;
        }
        if table.rows.contains_key(&id) {
            return Err(OrmError::ConstraintViolation(format!(
                "Duplicate id {} in table '{}'",
                id, table_name
            )));
        }
        if let (EntityId::Int(explicit), Some(next)) = (&id, table.next_id) {
            table.next_id = explicit.checked_add(1).map(|after| next.max(after));
        }

        table.rows.insert(id.clone(), row);
        table.last_insert_id = Some(id.clone());
        self.record(Change::InsertRow {
            table: table_name,
            id: id.clone(),
        });
        Ok(id)
    }

    pub fn update(&mut self, row: Box<dyn AnyEntity>) -> Result<()> {
        let table_name = row.entity_type_name();
        let id = row.entity_id();
        let old_row = self
            .tables
            .get_mut(table_name)
            .and_then(|table| table.rows.get_mut(&id))
            .map(|slot| std::mem::replace(slot, row))
            .ok_or_else(|| OrmError::RowNotFound(table_name.to_string(), id.clone()))?;

        self.record(Change::UpdateRow {
            table: table_name,
            id,
            old_row,
        });
        Ok(())
    }

    pub fn delete(&mut self, table_name: &'static str, id: &EntityId) -> Result<()> {
        let old_row = self
            .tables
            .get_mut(table_name)
            .and_then(|table| table.rows.remove(id))
            .ok_or_else(|| OrmError::RowNotFound(table_name.to_string(), id.clone()))?;

        self.record(Change::DeleteRow {
            table: table_name,
            id: id.clone(),
            old_row,
        });
        Ok(())
    }

    pub fn get(&self, table_name: &str, id: &EntityId) -> Option<&dyn AnyEntity> {
        self.tables
            .get(table_name)
            .and_then(|table| table.rows.get(id))
            .map(|row| row.as_ref())
    }

    /// Clones a row out as a typed entity.
    pub fn fetch<T: Entity>(&self, id: &EntityId) -> Option<T> {
        self.get(T::TYPE_NAME, id)
            .and_then(|row| row.downcast_ref::<T>())
            .cloned()
    }

    pub fn last_insert_id(&self, table_name: &str) -> Option<EntityId> {
        self.tables
            .get(table_name)
            .and_then(|table| table.last_insert_id.clone())
    }

    pub fn row_count(&self, table_name: &str) -> usize {
        self.tables
            .get(table_name)
            .map(|table| table.rows.len())
            .unwrap_or(0)
    }

    pub fn pending_changes(&self) -> usize {
        self.journal.as_ref().map(Vec::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FieldMap, Value};
    use crate::entity::{Diffable, IdValue};

    #[derive(Debug, Clone, PartialEq)]
    struct Tag {
        id: i64,
        label: String,
    }

    impl Diffable for Tag {
        fn fields(&self) -> FieldMap {
            let mut fields = FieldMap::new();
            fields.insert("id".into(), Value::Integer(self.id));
            fields.insert("label".into(), Value::Text(self.label.clone()));
            fields
        }
    }

    impl Entity for Tag {
        const TYPE_NAME: &'static str = "Tag";

        fn id(&self) -> EntityId {
            EntityId::Int(self.id)
        }

        fn set_id(&mut self, id: EntityId) -> Result<()> {
            self.id = i64::from_entity_id(id)?;
            Ok(())
        }
    }

    fn tag(id: i64, label: &str) -> Box<dyn AnyEntity> {
        Box::new(Tag {
            id,
            label: label.to_string(),
        })
    }

    #[test]
    fn test_insert_assigns_sequence() {
        let mut db = MemoryDatabase::new();
        assert_eq!(db.insert(tag(0, "a")).unwrap(), EntityId::Int(1));
        assert_eq!(db.insert(tag(10, "b")).unwrap(), EntityId::Int(10));
        assert_eq!(db.insert(tag(0, "c")).unwrap(), EntityId::Int(11));
        assert_eq!(db.last_insert_id("Tag"), Some(EntityId::Int(11)));
        assert_eq!(db.fetch::<Tag>(&EntityId::Int(1)).unwrap().id, 1);
    }

    #[test]
    fn test_max_explicit_id_exhausts_sequence() {
        let mut db = MemoryDatabase::new();
        assert_eq!(db.insert(tag(i64::MAX, "last")).unwrap(), EntityId::Int(i64::MAX));
        assert_eq!(db.insert(tag(4, "explicit")).unwrap(), EntityId::Int(4));
        assert!(matches!(
            db.insert(tag(0, "next")),
            Err(OrmError::ConstraintViolation(_))
        ));
        assert_eq!(db.row_count("Tag"), 2);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut db = MemoryDatabase::new();
        db.insert(tag(3, "a")).unwrap();
        assert!(matches!(
            db.insert(tag(3, "b")),
            Err(OrmError::ConstraintViolation(_))
        ));
    }

    #[test]
    fn test_rollback_undoes_in_reverse() {
        let mut db = MemoryDatabase::new();
        db.insert(tag(1, "keep")).unwrap();

        db.begin().unwrap();
        db.update(tag(1, "changed")).unwrap();
        db.insert(tag(2, "new")).unwrap();
        db.delete("Tag", &EntityId::Int(1)).unwrap();
        assert_eq!(db.pending_changes(), 3);
        db.rollback().unwrap();

        assert_eq!(db.row_count("Tag"), 1);
        assert_eq!(db.fetch::<Tag>(&EntityId::Int(1)).unwrap().label, "keep");
        assert!(!db.in_transaction());
    }

    #[test]
    fn test_no_nested_transactions() {
        let mut db = MemoryDatabase::new();
        db.begin().unwrap();
        assert!(matches!(db.begin(), Err(OrmError::TransactionState(_))));
        db.commit().unwrap();
        assert!(db.commit().is_err());
    }

    #[test]
    fn test_update_missing_row() {
        let mut db = MemoryDatabase::new();
        assert!(matches!(
            db.update(tag(5, "x")),
            Err(OrmError::RowNotFound(table, EntityId::Int(5))) if table == "Tag"
        ));
    }
}
