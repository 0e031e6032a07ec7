//! Routine operations exposed to front ends (CLI, HTTP handlers).
//!
//! These run concurrently with the [`Watcher`](crate::watcher::Watcher)
//! against the same store. Completion goes through the same
//! compare-and-update discipline, so a completion and a miss racing on one
//! row leave it either `done` or `missed`, never a blend of both.

use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{DatabaseError, Result, RoutineError};
use crate::intent::Intent;
use crate::routine::{NewRoutine, Routine, RoutineId, RoutineStatus};
use crate::storage::{RecordResult, RoutineStore};
use crate::watcher::{commit, Commit};

/// Attempts at a read-modify-write before giving up with a conflict.
const MAX_COMPLETE_ATTEMPTS: usize = 3;

/// Routines after an on-demand evaluation, plus the intents it produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Refreshed {
    pub routines: Vec<Routine>,
    /// One per committed transition, even when later rows failed.
    pub intents: Vec<Intent>,
    /// Rows whose transition could not be written; retried next time.
    pub failed: usize,
}

pub struct RoutineService {
    store: Arc<dyn RoutineStore>,
    clock: Arc<dyn Clock>,
}

impl RoutineService {
    pub fn new(store: Arc<dyn RoutineStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate and insert a batch. Nothing is inserted if any entry is invalid.
    pub fn create(&self, routines: &[NewRoutine]) -> Result<Vec<RoutineId>> {
        for routine in routines {
            routine.validate()?;
        }
        let mut ids = Vec::with_capacity(routines.len());
        for routine in routines {
            let id = self.store.insert(routine)?;
            info!(routine_id = id, title = %routine.title, "routine created");
            ids.push(id);
        }
        Ok(ids)
    }

    pub fn get(&self, id: RoutineId) -> Result<Routine> {
        self.store.get(id).map_err(|e| not_found_as_routine_error(e, id))
    }

    /// All readable routines, optionally for one owner. Unreadable records
    /// are logged and left out.
    pub fn list(&self, owner: Option<&str>) -> Result<Vec<Routine>> {
        let records = match owner {
            Some(owner) => self.store.list_by_owner(owner)?,
            None => self.store.list_all()?,
        };
        Ok(readable(records))
    }

    /// List and bring every routine up to date with the clock, persisting
    /// any transition. Intents are returned for the caller to deliver.
    pub fn refresh(&self, owner: Option<&str>) -> Result<Refreshed> {
        self.refresh_at(owner, self.clock.now())
    }

    /// # Errors
    /// Only when the routine list itself cannot be read. A row whose write
    /// fails is returned as read and counted in [`Refreshed::failed`]; a row
    /// deleted mid-refresh is left out.
    pub fn refresh_at(&self, owner: Option<&str>, now: NaiveDateTime) -> Result<Refreshed> {
        let mut refreshed = Refreshed::default();
        for routine in self.list(owner)? {
            let routine_id = routine.id;
            match commit(self.store.as_ref(), &routine, now) {
                Ok(Commit::Applied { routine, intent }) => {
                    refreshed.intents.push(intent);
                    refreshed.routines.push(routine);
                }
                Ok(Commit::Unchanged) => refreshed.routines.push(routine),
                // Someone else moved it; report what is stored now.
                Ok(Commit::Conflict) => match self.store.get(routine_id) {
                    Ok(current) => refreshed.routines.push(current),
                    Err(DatabaseError::NotFound { .. }) => {
                        debug!(routine_id, "routine deleted during refresh");
                    }
                    Err(e) => {
                        warn!(routine_id, error = %e, "failed to re-read routine");
                        refreshed.failed += 1;
                        refreshed.routines.push(routine);
                    }
                },
                Err(e) => {
                    warn!(routine_id, error = %e, "failed to persist routine transition");
                    refreshed.failed += 1;
                    refreshed.routines.push(routine);
                }
            }
        }
        Ok(refreshed)
    }

    /// Mark a pending routine done and extend its streak.
    ///
    /// # Errors
    /// - [`RoutineError::NotFound`] for an unknown id
    /// - [`RoutineError::AlreadyMissed`] once the grace period expired
    /// - [`RoutineError::AlreadyCompleted`] if it is already done
    pub fn complete(&self, id: RoutineId) -> Result<Routine> {
        for _ in 0..MAX_COMPLETE_ATTEMPTS {
            let current = self.get(id)?;
            match current.status {
                RoutineStatus::Missed => return Err(RoutineError::AlreadyMissed(id).into()),
                RoutineStatus::Done => return Err(RoutineError::AlreadyCompleted(id).into()),
                RoutineStatus::Pending => {}
            }

            let mut next = current.clone();
            next.status = RoutineStatus::Done;
            next.streak = next.streak.saturating_add(1);
            if self.store.compare_and_update(&current, &next)? {
                info!(routine_id = id, streak = next.streak, "routine completed");
                return Ok(next);
            }
        }
        Err(DatabaseError::Conflict { id }.into())
    }

    pub fn delete(&self, id: RoutineId) -> Result<()> {
        self.store
            .delete(id)
            .map_err(|e| not_found_as_routine_error(e, id))?;
        info!(routine_id = id, "routine deleted");
        Ok(())
    }
}

fn readable(records: Vec<RecordResult>) -> Vec<Routine> {
    records
        .into_iter()
        .filter_map(|record| match record {
            Ok(routine) => Some(routine),
            Err(e) => {
                warn!(error = %e, "skipping unreadable routine record");
                None
            }
        })
        .collect()
}

fn not_found_as_routine_error(err: DatabaseError, id: RoutineId) -> crate::error::CoreError {
    match err {
        DatabaseError::NotFound { .. } => RoutineError::NotFound(id).into(),
        other => other.into(),
    }
}
