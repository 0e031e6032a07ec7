//! Persistence contract shared by the watcher and the routine service.

use crate::error::DatabaseError;
use crate::routine::{NewRoutine, Routine, RoutineId};

/// One stored record: either a routine or the reason it could not be read.
///
/// Listing never fails as a whole because of a single bad row.
pub type RecordResult = Result<Routine, DatabaseError>;

/// Durable keyed storage of routines. No business logic lives here.
///
/// Writes after creation are field-scoped: only `status`, `reminder_sent`,
/// `streak` and `failures` are ever written, each call as one atomic
/// statement, so a writer never reverts columns it does not own.
pub trait RoutineStore: Send + Sync {
    /// Every routine regardless of owner, in no particular order.
    fn list_all(&self) -> Result<Vec<RecordResult>, DatabaseError>;

    fn list_by_owner(&self, owner: &str) -> Result<Vec<RecordResult>, DatabaseError>;

    /// # Errors
    /// [`DatabaseError::NotFound`] if no routine has this id.
    fn get(&self, id: RoutineId) -> Result<Routine, DatabaseError>;

    /// Insert a new pending routine and return its assigned id.
    fn insert(&self, routine: &NewRoutine) -> Result<RoutineId, DatabaseError>;

    /// Write the progress fields of `routine` unconditionally.
    ///
    /// # Errors
    /// [`DatabaseError::NotFound`] if the row no longer exists.
    fn update(&self, routine: &Routine) -> Result<(), DatabaseError>;

    /// Write the progress fields of `next` only if the stored row still has
    /// the progress fields of `current`.
    ///
    /// Returns `false` when the row changed (or vanished) since `current`
    /// was read; nothing is written in that case.
    fn compare_and_update(&self, current: &Routine, next: &Routine) -> Result<bool, DatabaseError>;

    /// # Errors
    /// [`DatabaseError::NotFound`] if no routine has this id.
    fn delete(&self, id: RoutineId) -> Result<(), DatabaseError>;
}
