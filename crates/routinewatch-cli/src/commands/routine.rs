//! Routine management commands for CLI.

use std::path::PathBuf;

use clap::Subcommand;
use routinewatch_core::routine::{format_date, format_time, local_now, parse_date, parse_time};
use routinewatch_core::{next_occurrence, Config, NewRoutine, Routine, RoutineId, Timeline};

use super::{open_service, CmdResult};

#[derive(Subcommand)]
pub enum RoutineAction {
    /// Create a routine
    Add {
        /// Routine title
        title: String,
        /// Time of day (HH:MM)
        #[arg(long)]
        time: String,
        /// Date (YYYY-MM-DD, default: today)
        #[arg(long, conflicts_with = "next")]
        date: Option<String>,
        /// Schedule for today, or tomorrow if the time already passed
        #[arg(long)]
        next: bool,
        /// Minutes before the routine to remind (default from config)
        #[arg(long)]
        reminder: Option<u32>,
        /// Minutes after the routine before it counts as missed (default from config)
        #[arg(long)]
        grace: Option<u32>,
        /// Notification personality (hood, calm, strict, motivational, ...)
        #[arg(long)]
        personality: Option<String>,
        /// Owner the routine belongs to
        #[arg(long)]
        owner: Option<String>,
    },
    /// Create routines from a JSON file (one object or an array)
    Import {
        /// Path to the JSON file
        file: PathBuf,
    },
    /// List routines
    List {
        /// Only routines of this owner
        #[arg(long)]
        owner: Option<String>,
        /// Evaluate against the current time before listing
        #[arg(long)]
        refresh: bool,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show a routine with its reminder and miss times
    Show {
        /// Routine ID
        id: RoutineId,
    },
    /// Mark a pending routine done
    Complete {
        /// Routine ID
        id: RoutineId,
    },
    /// Delete a routine
    Delete {
        /// Routine ID
        id: RoutineId,
    },
}

pub fn run(action: RoutineAction) -> CmdResult {
    match action {
        RoutineAction::Add {
            title,
            time,
            date,
            next,
            reminder,
            grace,
            personality,
            owner,
        } => {
            let defaults = Config::load()?.defaults;
            let time = parse_time(&time)?;
            let now = local_now();
            let date = match date {
                Some(date) => parse_date(&date)?,
                None if next => next_occurrence(time, now).date(),
                None => now.date(),
            };

            let new = NewRoutine::new(title, date, time)
                .with_offsets(
                    reminder.unwrap_or(defaults.reminder_minutes_before),
                    grace.unwrap_or(defaults.grace_minutes_after),
                )
                .with_personality(personality.unwrap_or(defaults.personality))
                .with_owner(owner.unwrap_or(defaults.owner));

            let service = open_service()?;
            let ids = service.create(&[new])?;
            for id in ids {
                println!("Routine created: {id}");
                println!("{}", serde_json::to_string_pretty(&service.get(id)?)?);
            }
        }
        RoutineAction::Import { file } => {
            let content = std::fs::read_to_string(&file)
                .map_err(|e| format!("{}: {e}", file.display()))?;
            let value: serde_json::Value = serde_json::from_str(&content)?;
            let routines: Vec<NewRoutine> = if value.is_array() {
                serde_json::from_value(value)?
            } else {
                vec![serde_json::from_value(value)?]
            };

            let ids = open_service()?.create(&routines)?;
            println!("{}", serde_json::to_string(&ids)?);
        }
        RoutineAction::List {
            owner,
            refresh,
            json,
        } => {
            let service = open_service()?;
            let routines = if refresh {
                service.refresh(owner.as_deref())?.routines
            } else {
                service.list(owner.as_deref())?
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&routines)?);
            } else if routines.is_empty() {
                println!("No routines");
            } else {
                for routine in &routines {
                    println!("{}", table_row(routine));
                }
            }
        }
        RoutineAction::Show { id } => {
            let routine = open_service()?.get(id)?;
            let timeline = Timeline::of(&routine);
            let out = serde_json::json!({
                "routine": routine,
                "timeline": timeline,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        RoutineAction::Complete { id } => {
            let routine = open_service()?.complete(id)?;
            println!("Routine completed: {id} (streak {})", routine.streak);
        }
        RoutineAction::Delete { id } => {
            open_service()?.delete(id)?;
            println!("Routine deleted: {id}");
        }
    }
    Ok(())
}

fn table_row(routine: &Routine) -> String {
    format!(
        "{:>4}  {} {}  {:<8} {:>3} streak {:>3} missed  {}",
        routine.id,
        format_date(routine.routine_date),
        format_time(routine.routine_time),
        routine.status.as_str(),
        routine.streak,
        routine.failures,
        routine.title,
    )
}
