use chrono::{Duration, NaiveDateTime};
use serde::Serialize;

use super::model::Routine;

/// The three instants that drive a routine's lifecycle.
///
/// ```text
/// reminder_open ........ scheduled ........ miss_at
///       [ reminder window )( grace period ]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Timeline {
    pub reminder_open: NaiveDateTime,
    pub scheduled: NaiveDateTime,
    pub miss_at: NaiveDateTime,
}

impl Timeline {
    pub fn of(routine: &Routine) -> Self {
        let scheduled = routine.scheduled_at();
        let before = Duration::minutes(i64::from(routine.reminder_minutes_before));
        let after = Duration::minutes(i64::from(routine.grace_minutes_after));
        Self {
            reminder_open: scheduled
                .checked_sub_signed(before)
                .unwrap_or(NaiveDateTime::MIN),
            scheduled,
            miss_at: scheduled
                .checked_add_signed(after)
                .unwrap_or(NaiveDateTime::MAX),
        }
    }

    /// `reminder_open <= now < scheduled`
    pub fn in_reminder_window(&self, now: NaiveDateTime) -> bool {
        self.reminder_open <= now && now < self.scheduled
    }

    pub fn is_past_grace(&self, now: NaiveDateTime) -> bool {
        now >= self.miss_at
    }
}
