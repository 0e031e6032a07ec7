//! Core error types for routinewatch-core.
//!
//! This module defines the error hierarchy using thiserror. Store failures,
//! configuration problems, input validation, lifecycle rule violations and
//! notification failures each get their own enum so callers can tell a
//! transient persistence hiccup apart from a user mistake.

use std::path::PathBuf;
use thiserror::Error;

use crate::routine::RoutineId;

/// Core error type for routinewatch-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Routine lifecycle errors
    #[error("Routine error: {0}")]
    Routine(#[from] RoutineError),

    /// Notification errors
    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// No routine with the given id
    #[error("Routine {id} not found")]
    NotFound { id: RoutineId },

    /// A stored row could not be turned into a routine
    #[error("Corrupt routine record{}: {message}", record_suffix(.id))]
    CorruptRecord {
        id: Option<RoutineId>,
        message: String,
    },

    /// The row kept changing underneath a read-modify-write
    #[error("Routine {id} was modified concurrently")]
    Conflict { id: RoutineId },

    /// A store call did not return in time
    #[error("Store call timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// The blocking task running a store call panicked or was cancelled
    #[error("Store task failed: {0}")]
    TaskFailed(String),
}

impl DatabaseError {
    /// Whether the next poll cycle may succeed where this one failed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DatabaseError::Locked
                | DatabaseError::Timeout { .. }
                | DatabaseError::TaskFailed(_)
                | DatabaseError::QueryFailed(_)
        )
    }
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Key does not exist in the configuration tree
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Data directory could not be resolved or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Routine title is empty or whitespace
    #[error("Routine title must not be empty")]
    EmptyTitle,

    /// Date not in `YYYY-MM-DD` form
    #[error("Invalid date '{0}': expected YYYY-MM-DD")]
    InvalidDate(String),

    /// Time not in `HH:MM` form
    #[error("Invalid time '{0}': expected HH:MM")]
    InvalidTime(String),

    /// Unknown status literal
    #[error("Invalid status '{0}': expected pending, done or missed")]
    InvalidStatus(String),

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Routine lifecycle rule violations.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RoutineError {
    /// Routine does not exist
    #[error("Routine {0} not found")]
    NotFound(RoutineId),

    /// Completion attempted after the grace period already expired
    #[error("Routine {0} already missed")]
    AlreadyMissed(RoutineId),

    /// Completion attempted twice
    #[error("Routine {0} already completed")]
    AlreadyCompleted(RoutineId),
}

/// Notification delivery errors.
///
/// These never leave the notifier dispatch task; the watcher only logs them.
#[derive(Error, Debug)]
pub enum NotifyError {
    /// Delivery did not finish in time
    #[error("Notification timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// The output mechanism reported a failure
    #[error("Notification delivery failed: {0}")]
    Delivery(String),

    /// Receiving side of a channel notifier is gone
    #[error("Notification channel closed")]
    ChannelClosed,
}

fn record_suffix(id: &Option<RoutineId>) -> String {
    id.map(|id| format!(" {id}")).unwrap_or_default()
}

// Helper implementations for converting from other error types

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _msg) => {
                if code.code == rusqlite::ErrorCode::DatabaseLocked
                    || code.code == rusqlite::ErrorCode::DatabaseBusy
                {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(err.into())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
