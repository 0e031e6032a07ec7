pub mod config;
pub mod routine;
pub mod watch;

use std::sync::Arc;

use routinewatch_core::{Database, RoutineService};

pub type CmdResult = Result<(), Box<dyn std::error::Error>>;

/// Open the store in the data directory.
pub fn open_store() -> Result<Arc<Database>, Box<dyn std::error::Error>> {
    Ok(Arc::new(Database::open()?))
}

pub fn open_service() -> Result<RoutineService, Box<dyn std::error::Error>> {
    Ok(RoutineService::new(open_store()?))
}
