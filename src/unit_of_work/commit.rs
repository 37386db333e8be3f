// ============================================================================
// Commit protocol
// ============================================================================
//
//   sweep -> validate -> pre_commit -> BEGIN
//     -> inserts -> updates -> deletes -> COMMIT -> post_commit
//
// Any failure between BEGIN and COMMIT rolls the connection back, restores
// the registry savepoint and surfaces as a single `CommitFailed`.
//
// ============================================================================

use super::{CommitReport, UnitOfWork};
use crate::connection::Connection;
use crate::core::{EntityId, ObjectIdentity, OrmError, Result};
use crate::registry::EntityState;
use chrono::Utc;
use std::collections::HashSet;
use std::time::Instant;
use tracing::{Level, event, info_span};
use uuid::Uuid;

#[derive(Debug, Default)]
struct PhaseCounts {
    inserted: usize,
    updated: usize,
    deleted: usize,
}

impl UnitOfWork {
    /// Writes every scheduled change inside one transaction.
    ///
    /// Precondition failures (`NoConnection`, `MissingDataMapper`, listener
    /// errors) return directly and keep the schedule. Failures after the
    /// transaction begins are rolled back and reported as `CommitFailed`;
    /// the schedule is cleared either way.
    pub fn commit(&mut self) -> Result<CommitReport> {
        let commit_id = Uuid::new_v4();
        let span = info_span!("commit", label = %self.config.label, %commit_id);
        let _enter = span.enter();

        if self.connection.is_none() {
            return Err(OrmError::NoConnection);
        }

        let swept = if self.config.dirty_check {
            self.sweep_dirty()
        } else {
            0
        };

        self.ensure_mappers()?;

        for listener in &mut self.listeners {
            listener.pre_commit(&self.registry)?;
        }

        let started_at = Utc::now();
        let timer = Instant::now();

        if self.config.skip_empty_commit
            && self.insertions.is_empty()
            && self.updates.is_empty()
            && self.deletions.is_empty()
        {
            event!(Level::DEBUG, "nothing scheduled, skipping transaction");
            self.clear_schedule();
            return Ok(CommitReport::new(commit_id, started_at));
        }

        let queued = self.queued_ids()?;

        let mut connection = self.connection.take().ok_or(OrmError::NoConnection)?;
        if let Err(err) = connection.begin_transaction() {
            self.connection = Some(connection);
            self.clear_schedule();
            event!(Level::ERROR, error = %err, "failed to begin transaction");
            return Err(OrmError::commit_failed(err));
        }

        self.registry.begin_savepoint();

        let outcome = self
            .write_phases(connection.as_mut())
            .and_then(|counts| connection.commit().map(|_| counts));

        match outcome {
            Ok(counts) => {
                self.connection = Some(connection);
                self.registry.release_savepoint();

                let mut report = CommitReport::new(commit_id, started_at);
                report.inserted = counts.inserted;
                report.updated = counts.updated;
                report.deleted = counts.deleted;
                report.swept = swept;
                report.duration = timer.elapsed();

                self.post_commit(&mut report);
                self.clear_schedule();

                event!(
                    Level::INFO,
                    inserted = report.inserted,
                    updated = report.updated,
                    deleted = report.deleted,
                    swept = report.swept,
                    "commit complete"
                );
                Ok(report)
            }
            Err(cause) => {
                if let Err(err) = connection.rollback() {
                    event!(Level::ERROR, error = %err, "rollback failed");
                }
                self.connection = Some(connection);

                self.registry.rollback_to_savepoint();
                self.post_rollback(&queued, &cause);
                self.clear_schedule();

                event!(Level::WARN, error = %cause, "commit rolled back");
                Err(OrmError::commit_failed(cause))
            }
        }
    }

    /// Schedules every registered, unscheduled entity whose fields moved
    /// away from its snapshot. Returns how many were added.
    fn sweep_dirty(&mut self) -> usize {
        let mut swept = 0;
        for identity in self.registry.registered_identities() {
            if self.is_scheduled_identity(identity) {
                continue;
            }
            if let Ok(true) = self.registry.has_changed_identity(identity) {
                self.updates.insert(identity);
                swept += 1;
            }
        }
        if swept > 0 {
            event!(Level::DEBUG, swept, "dirty entities scheduled for update");
        }
        swept
    }

    fn ensure_mappers(&self) -> Result<()> {
        let scheduled = self
            .insertions
            .as_slice()
            .iter()
            .chain(self.updates.as_slice())
            .chain(self.deletions.as_slice());

        for identity in scheduled {
            let type_name = self.registry.entity(*identity)?.entity_type_name();
            if !self.mappers.contains_key(type_name) {
                return Err(OrmError::MissingDataMapper(type_name.to_string()));
            }
        }
        Ok(())
    }

    /// Queued entities paired with the ids they carry before any write.
    fn queued_ids(&self) -> Result<Vec<(ObjectIdentity, EntityId)>> {
        self.insertions
            .as_slice()
            .iter()
            .map(|&identity| Ok((identity, self.registry.entity(identity)?.entity_id())))
            .collect()
    }

    /// Runs a child's aggregate-root callbacks unless they already ran in
    /// this commit.
    fn run_callbacks_once(
        &mut self,
        identity: ObjectIdentity,
        ran: &mut HashSet<ObjectIdentity>,
    ) -> Result<()> {
        if ran.insert(identity) {
            self.registry.run_callbacks_for(identity)?;
        }
        Ok(())
    }

    fn write_phases(&mut self, conn: &mut dyn Connection) -> Result<PhaseCounts> {
        let mut counts = PhaseCounts::default();
        let mut callbacks_ran = HashSet::new();

        event!(Level::DEBUG, count = self.insertions.len(), "insert phase");
        for identity in self.insertions.to_vec() {
            self.run_callbacks_once(identity, &mut callbacks_ran)?;
            let type_name = self.registry.entity(identity)?.entity_type_name();
            let mapper = self
                .mappers
                .get_mut(type_name)
                .ok_or_else(|| OrmError::MissingDataMapper(type_name.to_string()))?;

            mapper.add(self.registry.entity(identity)?, conn)?;
            if let Some(id) = mapper.generate_id(self.registry.entity(identity)?, conn)? {
                self.registry.entity_mut(identity)?.assign_id(id)?;
            }
            self.registry.refresh_identity(identity)?;

            event!(Level::DEBUG, entity = %identity, type_name, "inserted");
            counts.inserted += 1;
        }

        event!(Level::DEBUG, count = self.updates.len(), "update phase");
        for identity in self.updates.to_vec() {
            self.run_callbacks_once(identity, &mut callbacks_ran)?;
            let type_name = self.registry.entity(identity)?.entity_type_name();
            let mapper = self
                .mappers
                .get_mut(type_name)
                .ok_or_else(|| OrmError::MissingDataMapper(type_name.to_string()))?;

            mapper.update(self.registry.entity(identity)?, conn)?;
            self.registry.refresh_identity(identity)?;

            event!(Level::DEBUG, entity = %identity, type_name, "updated");
            counts.updated += 1;
        }

        event!(Level::DEBUG, count = self.deletions.len(), "delete phase");
        for identity in self.deletions.to_vec() {
            let type_name = self.registry.entity(identity)?.entity_type_name();
            let mapper = self
                .mappers
                .get_mut(type_name)
                .ok_or_else(|| OrmError::MissingDataMapper(type_name.to_string()))?;

            mapper.delete(self.registry.entity(identity)?, conn)?;
            self.detach_identity(identity);
            self.registry.set_state_of(identity, EntityState::Dequeued);

            event!(Level::DEBUG, entity = %identity, type_name, "deleted");
            counts.deleted += 1;
        }

        Ok(counts)
    }

    fn post_commit(&mut self, report: &mut CommitReport) {
        if self.config.flush_caches {
            for (type_name, mapper) in self.mappers.iter_mut() {
                let Some(cache) = mapper.cache() else {
                    continue;
                };
                match cache.flush_to_cache() {
                    Ok(flushed) => report.flushed += flushed,
                    Err(err) => {
                        event!(Level::WARN, type_name = *type_name, error = %err, "cache flush failed")
                    }
                }
            }
        }

        for listener in &mut self.listeners {
            listener.post_commit(report);
        }
    }

    /// Undoes in-memory effects of a failed commit on queued entities.
    ///
    /// Entities the identity map already indexed before the commit get their
    /// old id back and stay `Registered`. The rest have generated ids reset
    /// to the generator's empty value and become `NeverTracked`.
    fn post_rollback(&mut self, queued: &[(ObjectIdentity, EntityId)], cause: &OrmError) {
        for (identity, original_id) in queued {
            let identity = *identity;
            let Ok(entity) = self.registry.entity(identity) else {
                continue;
            };

            let was_indexed = self.registry.is_indexed(identity);
            let reset_to = if was_indexed {
                Some(original_id.clone())
            } else {
                let type_name = entity.entity_type_name();
                self.mappers
                    .get_mut(type_name)
                    .and_then(|mapper| mapper.empty_id())
            };

            if let Some(id) = reset_to {
                let reset = self
                    .registry
                    .entity_mut(identity)
                    .and_then(|entity| entity.assign_id(id));
                if let Err(err) = reset {
                    event!(Level::WARN, entity = %identity, error = %err, "failed to reset id");
                }
            }

            let state = if was_indexed {
                EntityState::Registered
            } else {
                EntityState::NeverTracked
            };
            self.registry.set_state_of(identity, state);
        }

        for mapper in self.mappers.values_mut() {
            if let Some(cache) = mapper.cache() {
                cache.discard_pending();
            }
        }

        for listener in &mut self.listeners {
            listener.post_rollback(cause);
        }
    }
}
