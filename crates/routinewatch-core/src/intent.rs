use serde::{Deserialize, Serialize};

use crate::routine::{Personality, RoutineId};

/// A side effect decided by the evaluator.
///
/// Intents are facts ("the reminder for routine 3 fired"); how they reach
/// the user is up to the notifier that receives them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Intent {
    ReminderFire {
        routine_id: RoutineId,
        title: String,
        personality: Personality,
    },
    Missed {
        routine_id: RoutineId,
        title: String,
    },
}

impl Intent {
    pub fn routine_id(&self) -> RoutineId {
        match self {
            Intent::ReminderFire { routine_id, .. } | Intent::Missed { routine_id, .. } => {
                *routine_id
            }
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Intent::ReminderFire { title, .. } | Intent::Missed { title, .. } => title,
        }
    }

    /// Text spoken or displayed for this intent.
    pub fn message(&self) -> String {
        match self {
            Intent::ReminderFire { title, .. } => {
                format!("Yo! {title} is coming up. Don't forget!")
            }
            Intent::Missed { title, .. } => format!("{title} was missed."),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Intent::ReminderFire { .. } => "reminder",
            Intent::Missed { .. } => "missed",
        }
    }
}
