// ============================================================================
// Row Change Journal
// ============================================================================
//
// Every write made inside a transaction is recorded as a reversible Change.
// COMMIT discards the journal, ROLLBACK undoes it in reverse order.
//
// ============================================================================

use super::memory::MemoryTable;
use crate::core::EntityId;
use crate::entity::AnyEntity;
use std::collections::HashMap;

/// A single reversible row change
pub enum Change {
    /// A row was inserted
    InsertRow { table: &'static str, id: EntityId },

    /// A row was replaced
    UpdateRow {
        table: &'static str,
        id: EntityId,
        old_row: Box<dyn AnyEntity>,
    },

    /// A row was removed
    DeleteRow {
        table: &'static str,
        id: EntityId,
        old_row: Box<dyn AnyEntity>,
    },
}

impl Change {
    /// Get the table name affected by this change
    pub fn table_name(&self) -> &'static str {
        match self {
            Change::InsertRow { table, .. } => table,
            Change::UpdateRow { table, .. } => table,
            Change::DeleteRow { table, .. } => table,
        }
    }

    pub fn row_id(&self) -> &EntityId {
        match self {
            Change::InsertRow { id, .. } => id,
            Change::UpdateRow { id, .. } => id,
            Change::DeleteRow { id, .. } => id,
        }
    }

    /// Reverse the change against the given tables
    pub(crate) fn undo(self, tables: &mut HashMap<&'static str, MemoryTable>) {
        let table = tables.entry(self.table_name()).or_default();
        match self {
            Change::InsertRow { id, .. } => {
                table.rows.remove(&id);
            }
            Change::UpdateRow { id, old_row, .. } | Change::DeleteRow { id, old_row, .. } => {
                table.rows.insert(id, old_row);
            }
        }
    }
}

impl std::fmt::Debug for Change {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Change::InsertRow { .. } => "InsertRow",
            Change::UpdateRow { .. } => "UpdateRow",
            Change::DeleteRow { .. } => "DeleteRow",
        };
        f.debug_struct(kind)
            .field("table", &self.table_name())
            .field("id", self.row_id())
            .finish()
    }
}
