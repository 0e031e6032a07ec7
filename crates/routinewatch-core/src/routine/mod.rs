mod evaluator;
mod model;
mod timeline;

pub use evaluator::{evaluate, Evaluation};
pub use model::{
    format_date, format_time, local_now, next_occurrence, parse_date, parse_time, NewRoutine,
    Personality, Routine, RoutineId, RoutineStatus, DEFAULT_GRACE_MINUTES_AFTER, DEFAULT_OWNER,
    DEFAULT_REMINDER_MINUTES_BEFORE,
};
pub use timeline::Timeline;
