use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

use crate::core::{OrmError, Result};
use crate::registry::EntityRegistry;

/// Summary of one commit cycle
#[derive(Debug, Clone, Serialize)]
pub struct CommitReport {
    /// Correlates the report with the commit's tracing span.
    pub commit_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Updates discovered by the dirty-check sweep rather than scheduled
    pub swept: usize,
    /// Entries pushed into write-through caches after commit
    pub flushed: usize,
}

impl CommitReport {
    pub(crate) fn new(commit_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            commit_id,
            started_at,
            duration: Duration::ZERO,
            inserted: 0,
            updated: 0,
            deleted: 0,
            swept: 0,
            flushed: 0,
        }
    }

    pub fn total_writes(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }

    pub fn is_empty(&self) -> bool {
        self.total_writes() == 0
    }
}

/// Extension points around `UnitOfWork::commit`. All methods default to no-ops.
pub trait CommitListener: Send {
    /// Runs after the dirty-check sweep, before the transaction begins.
    /// An error aborts the commit without touching the database.
    fn pre_commit(&mut self, _registry: &EntityRegistry) -> Result<()> {
        Ok(())
    }

    fn post_commit(&mut self, _report: &CommitReport) {}

    fn post_rollback(&mut self, _cause: &OrmError) {}
}
