mod config;
pub mod database;
pub mod migrations;
mod store;

pub use config::{Config, DefaultsConfig, LogConfig, NotifierConfig, WatcherSettings};
pub use database::Database;
pub use store::{RecordResult, RoutineStore};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns the data directory, creating it if needed.
///
/// `ROUTINEWATCH_HOME` wins if set. Otherwise `~/.config/routinewatch[-dev]/`,
/// with `ROUTINEWATCH_ENV=dev` selecting the development directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("ROUTINEWATCH_HOME") {
        Some(home) => PathBuf::from(home),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env =
                std::env::var("ROUTINEWATCH_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("routinewatch-dev")
            } else {
                base_dir.join("routinewatch")
            }
        }
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
