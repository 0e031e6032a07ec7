//! SQLite-backed routine store.
//!
//! Provides persistent storage for routines using the column layout the
//! mobile client already reads: `routine_date` as `YYYY-MM-DD`,
//! `routine_time` as `HH:MM`, `status` as a literal string and
//! `reminder_sent` as 0/1.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::data_dir;
use super::migrations;
use super::store::{RecordResult, RoutineStore};
use crate::error::{CoreError, DatabaseError};
use crate::routine::{parse_date, parse_time, NewRoutine, Personality, Routine, RoutineId};
use crate::routine::{format_date, format_time, RoutineStatus};

const SELECT_COLUMNS: &str = "SELECT id, title, routine_date, routine_time, status, reminder_sent,
        personality, streak, failures, user_id, reminder_minutes_before, grace_minutes_after
     FROM routines";

/// Untyped row as read from SQLite, before domain validation.
struct RawRoutine {
    id: RoutineId,
    title: String,
    routine_date: String,
    routine_time: String,
    status: String,
    reminder_sent: i64,
    personality: String,
    streak: i64,
    failures: i64,
    owner: String,
    reminder_minutes_before: i64,
    grace_minutes_after: i64,
}

fn read_raw(row: &rusqlite::Row) -> Result<RawRoutine, rusqlite::Error> {
    Ok(RawRoutine {
        id: row.get(0)?,
        title: row.get(1)?,
        routine_date: row.get(2)?,
        routine_time: row.get(3)?,
        status: row.get(4)?,
        reminder_sent: row.get(5)?,
        personality: row.get(6)?,
        streak: row.get(7)?,
        failures: row.get(8)?,
        owner: row.get(9)?,
        reminder_minutes_before: row.get(10)?,
        grace_minutes_after: row.get(11)?,
    })
}

/// Build a record from a database row.
///
/// Column type mismatches and unparsable values both become
/// [`DatabaseError::CorruptRecord`] for that row only.
fn row_to_record(row: &rusqlite::Row) -> RecordResult {
    let id = row.get::<_, RoutineId>(0).ok();
    let raw = read_raw(row).map_err(|e| DatabaseError::CorruptRecord {
        id,
        message: e.to_string(),
    })?;
    raw.try_into()
}

fn non_negative(id: RoutineId, field: &str, value: i64) -> Result<u32, DatabaseError> {
    u32::try_from(value).map_err(|_| DatabaseError::CorruptRecord {
        id: Some(id),
        message: format!("{field} out of range: {value}"),
    })
}

impl TryFrom<RawRoutine> for Routine {
    type Error = DatabaseError;

    fn try_from(raw: RawRoutine) -> Result<Self, Self::Error> {
        let corrupt = |e: crate::error::ValidationError| DatabaseError::CorruptRecord {
            id: Some(raw.id),
            message: e.to_string(),
        };
        Ok(Routine {
            id: raw.id,
            routine_date: parse_date(&raw.routine_date).map_err(corrupt)?,
            routine_time: parse_time(&raw.routine_time).map_err(corrupt)?,
            status: raw.status.parse::<RoutineStatus>().map_err(corrupt)?,
            reminder_sent: raw.reminder_sent != 0,
            streak: non_negative(raw.id, "streak", raw.streak)?,
            failures: non_negative(raw.id, "failures", raw.failures)?,
            personality: Personality::from(raw.personality),
            reminder_minutes_before: non_negative(
                raw.id,
                "reminder_minutes_before",
                raw.reminder_minutes_before,
            )?,
            grace_minutes_after: non_negative(raw.id, "grace_minutes_after", raw.grace_minutes_after)?,
            owner: raw.owner,
            title: raw.title,
        })
    }
}

/// SQLite database for routine storage.
///
/// A single connection behind a mutex; every statement runs to completion
/// while holding it, so each write is atomic with respect to the others.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the database at `<data dir>/routinewatch.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, CoreError> {
        let path = data_dir()?.join("routinewatch.db");
        Ok(Self::open_at(path)?)
    }

    /// Open (or create) a database file at an explicit path.
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, DatabaseError> {
        migrations::migrate(&conn).map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave a half-applied
        // statement behind, so the connection stays usable.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn query_records(
        &self,
        filter: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<RecordResult>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} {filter} ORDER BY id"))?;
        let rows = stmt.query_map(params, |row| Ok(row_to_record(row)))?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

impl RoutineStore for Database {
    fn list_all(&self) -> Result<Vec<RecordResult>, DatabaseError> {
        self.query_records("", params![])
    }

    fn list_by_owner(&self, owner: &str) -> Result<Vec<RecordResult>, DatabaseError> {
        self.query_records("WHERE user_id = ?1", params![owner])
    }

    fn get(&self, id: RoutineId) -> Result<Routine, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))?;
        let record = stmt
            .query_row(params![id], |row| Ok(row_to_record(row)))
            .optional()?;
        record.unwrap_or(Err(DatabaseError::NotFound { id }))
    }

    fn insert(&self, routine: &NewRoutine) -> Result<RoutineId, DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO routines (
                title, routine_date, routine_time, status, reminder_sent, personality,
                streak, failures, user_id, reminder_minutes_before, grace_minutes_after
             ) VALUES (?1, ?2, ?3, 'pending', 0, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                routine.title,
                format_date(routine.routine_date),
                format_time(routine.routine_time),
                routine.personality.as_str(),
                routine.streak,
                routine.failures,
                routine.owner,
                routine.reminder_minutes_before,
                routine.grace_minutes_after,
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(routine_id = id, title = %routine.title, "routine inserted");
        Ok(id)
    }

    fn update(&self, routine: &Routine) -> Result<(), DatabaseError> {
        let changed = self.conn().execute(
            "UPDATE routines
             SET status = ?1, reminder_sent = ?2, streak = ?3, failures = ?4
             WHERE id = ?5",
            params![
                routine.status.as_str(),
                routine.reminder_sent,
                routine.streak,
                routine.failures,
                routine.id,
            ],
        )?;
        if changed == 0 {
            return Err(DatabaseError::NotFound { id: routine.id });
        }
        Ok(())
    }

    fn compare_and_update(&self, current: &Routine, next: &Routine) -> Result<bool, DatabaseError> {
        let changed = self.conn().execute(
            "UPDATE routines
             SET status = ?1, reminder_sent = ?2, streak = ?3, failures = ?4
             WHERE id = ?5
               AND status = ?6 AND reminder_sent = ?7 AND streak = ?8 AND failures = ?9",
            params![
                next.status.as_str(),
                next.reminder_sent,
                next.streak,
                next.failures,
                current.id,
                current.status.as_str(),
                current.reminder_sent,
                current.streak,
                current.failures,
            ],
        )?;
        Ok(changed == 1)
    }

    fn delete(&self, id: RoutineId) -> Result<(), DatabaseError> {
        let changed = self
            .conn()
            .execute("DELETE FROM routines WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(DatabaseError::NotFound { id });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn workout() -> NewRoutine {
        NewRoutine::new(
            "Workout",
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveTime::from_hms_opt(14, 30, 0).unwrap(),
        )
    }

    #[test]
    fn insert_and_get() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert(&workout().with_personality("calm")).unwrap();
        let routine = db.get(id).unwrap();
        assert_eq!(routine.title, "Workout");
        assert_eq!(routine.status, RoutineStatus::Pending);
        assert!(!routine.reminder_sent);
        assert_eq!(routine.personality, Personality::Calm);
        assert_eq!(routine.reminder_minutes_before, 10);
        assert_eq!(routine.grace_minutes_after, 5);
    }

    #[test]
    fn stored_time_has_no_seconds() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert(&workout()).unwrap();
        let raw: String = db
            .conn()
            .query_row("SELECT routine_time FROM routines WHERE id = ?1", [id], |r| r.get(0))
            .unwrap();
        assert_eq!(raw, "14:30");
    }

    #[test]
    fn get_missing_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(db.get(42), Err(DatabaseError::NotFound { id: 42 })));
        assert!(matches!(db.delete(42), Err(DatabaseError::NotFound { id: 42 })));
    }

    #[test]
    fn update_only_touches_progress_fields() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert(&workout()).unwrap();
        let mut routine = db.get(id).unwrap();
        routine.title = "Renamed".into();
        routine.reminder_sent = true;
        db.update(&routine).unwrap();

        let stored = db.get(id).unwrap();
        assert_eq!(stored.title, "Workout");
        assert!(stored.reminder_sent);
    }

    #[test]
    fn compare_and_update_rejects_stale_read() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert(&workout()).unwrap();
        let stale = db.get(id).unwrap();

        let mut done = stale.clone();
        done.status = RoutineStatus::Done;
        done.streak = 1;
        assert!(db.compare_and_update(&stale, &done).unwrap());

        let mut missed = stale.clone();
        missed.status = RoutineStatus::Missed;
        missed.failures = 1;
        assert!(!db.compare_and_update(&stale, &missed).unwrap());

        let stored = db.get(id).unwrap();
        assert_eq!(stored.status, RoutineStatus::Done);
        assert_eq!(stored.failures, 0);
    }

    #[test]
    fn corrupt_row_does_not_hide_others() {
        let db = Database::open_in_memory().unwrap();
        let good = db.insert(&workout()).unwrap();
        let bad = db.insert(&workout()).unwrap();
        db.conn()
            .execute("UPDATE routines SET routine_time = 'noon' WHERE id = ?1", [bad])
            .unwrap();

        let records = db.list_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].as_ref().unwrap().id, good);
        assert!(matches!(
            records[1],
            Err(DatabaseError::CorruptRecord { id: Some(id), .. }) if id == bad
        ));
    }

    #[test]
    fn unknown_status_is_corrupt() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert(&workout()).unwrap();
        db.conn()
            .execute("UPDATE routines SET status = 'skipped' WHERE id = ?1", [id])
            .unwrap();
        assert!(matches!(db.get(id), Err(DatabaseError::CorruptRecord { .. })));
    }

    #[test]
    fn list_by_owner_partitions() {
        let db = Database::open_in_memory().unwrap();
        db.insert(&workout().with_owner("alex")).unwrap();
        db.insert(&workout().with_owner("sam")).unwrap();
        db.insert(&workout().with_owner("sam")).unwrap();
        assert_eq!(db.list_by_owner("sam").unwrap().len(), 2);
        assert_eq!(db.list_by_owner("nobody").unwrap().len(), 0);
        assert_eq!(db.list_all().unwrap().len(), 3);
    }
}
