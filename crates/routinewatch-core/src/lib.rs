//! # Routinewatch Core Library
//!
//! Core logic for scheduled personal routines: each routine has a date, a
//! time of day, a reminder window before it and a grace period after it.
//! A background watcher sweeps the store, fires one reminder per routine and
//! marks routines missed once their grace period runs out. The CLI binary is
//! a thin layer over the same library.
//!
//! ## Architecture
//!
//! - **Evaluator**: a pure function from `(routine, now)` to the updated
//!   routine and an optional [`Intent`]
//! - **Storage**: SQLite routine store and TOML configuration
//! - **Watcher**: tokio loop that drives the evaluator on a fixed cadence
//! - **Notifier**: where intents become log lines, channel messages or speech
//!
//! ## Key Components
//!
//! - [`evaluate`]: transition rules
//! - [`Watcher`]: background sweep
//! - [`RoutineService`]: create, list, complete, delete
//! - [`Database`]: routine persistence
//! - [`Config`]: application configuration

pub mod clock;
pub mod error;
pub mod intent;
pub mod notifier;
pub mod routine;
pub mod service;
pub mod storage;
pub mod watcher;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{
    ConfigError, CoreError, DatabaseError, NotifyError, RoutineError, ValidationError,
};
pub use intent::Intent;
pub use notifier::{ChannelNotifier, CommandSpeaker, LogNotifier, Notifier, SpeechNotifier, Voice};
pub use routine::{
    evaluate, next_occurrence, Evaluation, NewRoutine, Personality, Routine, RoutineId,
    RoutineStatus, Timeline,
};
pub use service::{Refreshed, RoutineService};
pub use storage::{Config, Database, RoutineStore};
pub use watcher::{Commit, CycleReport, Watcher, WatcherConfig};
