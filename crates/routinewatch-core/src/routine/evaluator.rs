//! Routine lifecycle evaluator.
//!
//! A pure function of `(routine, now)`. It never touches the store or the
//! notifier; the watcher persists whatever it returns and forwards the
//! intent.
//!
//! ## Rules
//!
//! Checked in order, first match wins, at most one transition per call:
//!
//! 1. `pending`, no reminder yet, `now` in `[reminder_open, scheduled)`:
//!    set `reminder_sent` and emit [`Intent::ReminderFire`].
//! 2. `pending` and `now >= miss_at`: mark `missed`, bump `failures`,
//!    clear `streak` and emit [`Intent::Missed`].
//! 3. Nothing.
//!
//! The `reminder_sent` flag makes rule 1 a window instead of an instant, so
//! any polling cadence fires the reminder exactly once. If the whole window
//! passed while nothing was evaluating, rule 1 no longer matches and the
//! routine goes straight to the miss check.

use chrono::NaiveDateTime;

use super::model::{Routine, RoutineStatus};
use super::timeline::Timeline;
use crate::intent::Intent;

/// Result of evaluating one routine at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// The routine after the transition (identical to the input if none).
    pub routine: Routine,
    /// Side effect to hand to the notifier.
    pub intent: Option<Intent>,
}

impl Evaluation {
    pub fn changed(&self) -> bool {
        self.intent.is_some()
    }
}

pub fn evaluate(routine: &Routine, now: NaiveDateTime) -> Evaluation {
    let mut next = routine.clone();
    let timeline = Timeline::of(routine);

    if routine.status != RoutineStatus::Pending {
        return Evaluation { routine: next, intent: None };
    }

    if !routine.reminder_sent && timeline.in_reminder_window(now) {
        next.reminder_sent = true;
        let intent = Intent::ReminderFire {
            routine_id: routine.id,
            title: routine.title.clone(),
            personality: routine.personality.clone(),
        };
        return Evaluation { routine: next, intent: Some(intent) };
    }

    if timeline.is_past_grace(now) {
        next.status = RoutineStatus::Missed;
        next.failures = next.failures.saturating_add(1);
        next.streak = 0;
        let intent = Intent::Missed {
            routine_id: routine.id,
            title: routine.title.clone(),
        };
        return Evaluation { routine: next, intent: Some(intent) };
    }

    Evaluation { routine: next, intent: None }
}
