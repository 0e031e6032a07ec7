//! Routine record and its persisted field formats.

use std::fmt;
use std::str::FromStr;

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Store-assigned routine identifier.
pub type RoutineId = i64;

pub const DEFAULT_REMINDER_MINUTES_BEFORE: u32 = 10;
pub const DEFAULT_GRACE_MINUTES_AFTER: u32 = 5;
pub const DEFAULT_OWNER: &str = "default";

/// Lifecycle status of a single occurrence.
///
/// ```text
/// pending -> done
/// pending -> missed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutineStatus {
    Pending,
    Done,
    Missed,
}

impl RoutineStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RoutineStatus::Pending => "pending",
            RoutineStatus::Done => "done",
            RoutineStatus::Missed => "missed",
        }
    }

    /// `done` and `missed` accept no further transitions.
    pub fn is_terminal(self) -> bool {
        !matches!(self, RoutineStatus::Pending)
    }
}

impl fmt::Display for RoutineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutineStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RoutineStatus::Pending),
            "done" => Ok(RoutineStatus::Done),
            "missed" => Ok(RoutineStatus::Missed),
            other => Err(ValidationError::InvalidStatus(other.to_string())),
        }
    }
}

/// Notification voice/style label.
///
/// The evaluator never looks at this; it is resolved to a concrete voice at
/// the notifier boundary. Labels outside the known set are kept verbatim so
/// they survive a store round trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Personality {
    Hood,
    Calm,
    Strict,
    Motivational,
    Default,
    Other(String),
}

impl Personality {
    pub fn as_str(&self) -> &str {
        match self {
            Personality::Hood => "hood",
            Personality::Calm => "calm",
            Personality::Strict => "strict",
            Personality::Motivational => "motivational",
            Personality::Default => "default",
            Personality::Other(label) => label,
        }
    }
}

impl Default for Personality {
    fn default() -> Self {
        Personality::Hood
    }
}

impl From<String> for Personality {
    fn from(label: String) -> Self {
        match label.as_str() {
            "hood" => Personality::Hood,
            "calm" => Personality::Calm,
            "strict" => Personality::Strict,
            "motivational" => Personality::Motivational,
            "default" => Personality::Default,
            _ => Personality::Other(label),
        }
    }
}

impl From<&str> for Personality {
    fn from(label: &str) -> Self {
        Personality::from(label.to_string())
    }
}

impl From<Personality> for String {
    fn from(p: Personality) -> Self {
        p.as_str().to_string()
    }
}

impl fmt::Display for Personality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scheduled occurrence of a personal routine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routine {
    pub id: RoutineId,
    pub title: String,
    #[serde(with = "date_format")]
    pub routine_date: NaiveDate,
    #[serde(with = "time_format")]
    pub routine_time: NaiveTime,
    pub status: RoutineStatus,
    pub reminder_sent: bool,
    pub streak: u32,
    pub failures: u32,
    pub personality: Personality,
    pub reminder_minutes_before: u32,
    pub grace_minutes_after: u32,
    pub owner: String,
}

impl Routine {
    /// Date and time-of-day combined against the local wall clock.
    pub fn scheduled_at(&self) -> NaiveDateTime {
        NaiveDateTime::new(self.routine_date, self.routine_time)
    }

    pub fn is_pending(&self) -> bool {
        self.status == RoutineStatus::Pending
    }

    /// Whether `other` carries the same progress fields.
    ///
    /// Only these four columns are ever written after creation.
    pub fn same_progress(&self, other: &Routine) -> bool {
        self.status == other.status
            && self.reminder_sent == other.reminder_sent
            && self.streak == other.streak
            && self.failures == other.failures
    }
}

/// Input for creating a routine. Defaults mirror what the mobile client
/// sends when a field is left out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRoutine {
    pub title: String,
    #[serde(with = "date_format")]
    pub routine_date: NaiveDate,
    #[serde(with = "time_format")]
    pub routine_time: NaiveTime,
    #[serde(default)]
    pub personality: Personality,
    #[serde(default = "default_reminder_minutes_before")]
    pub reminder_minutes_before: u32,
    #[serde(default = "default_grace_minutes_after")]
    pub grace_minutes_after: u32,
    #[serde(default = "default_owner", alias = "user_id")]
    pub owner: String,
    /// Carried over from a previous occurrence when recreating a routine.
    #[serde(default)]
    pub streak: u32,
    #[serde(default)]
    pub failures: u32,
}

fn default_reminder_minutes_before() -> u32 {
    DEFAULT_REMINDER_MINUTES_BEFORE
}
fn default_grace_minutes_after() -> u32 {
    DEFAULT_GRACE_MINUTES_AFTER
}
fn default_owner() -> String {
    DEFAULT_OWNER.into()
}

impl NewRoutine {
    pub fn new(title: impl Into<String>, routine_date: NaiveDate, routine_time: NaiveTime) -> Self {
        Self {
            title: title.into(),
            routine_date,
            routine_time: truncate_to_minute(routine_time),
            personality: Personality::default(),
            reminder_minutes_before: DEFAULT_REMINDER_MINUTES_BEFORE,
            grace_minutes_after: DEFAULT_GRACE_MINUTES_AFTER,
            owner: default_owner(),
            streak: 0,
            failures: 0,
        }
    }

    pub fn with_offsets(mut self, reminder_minutes_before: u32, grace_minutes_after: u32) -> Self {
        self.reminder_minutes_before = reminder_minutes_before;
        self.grace_minutes_after = grace_minutes_after;
        self
    }

    pub fn with_personality(mut self, personality: impl Into<Personality>) -> Self {
        self.personality = personality.into();
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Check the fields the store will not fix up on its own.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        if self.owner.trim().is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "owner".into(),
                message: "must not be empty".into(),
            });
        }
        Ok(())
    }

    /// The stored routine this input becomes once the store assigns `id`.
    pub fn into_routine(self, id: RoutineId) -> Routine {
        Routine {
            id,
            title: self.title,
            routine_date: self.routine_date,
            routine_time: truncate_to_minute(self.routine_time),
            status: RoutineStatus::Pending,
            reminder_sent: false,
            streak: self.streak,
            failures: self.failures,
            personality: self.personality,
            reminder_minutes_before: self.reminder_minutes_before,
            grace_minutes_after: self.grace_minutes_after,
            owner: self.owner,
        }
    }
}

/// Today at `time`, or tomorrow if that moment has already passed.
///
/// Client-side convenience only; the evaluator treats a past `scheduled_at`
/// as immediately eligible for the miss check.
pub fn next_occurrence(time: NaiveTime, now: NaiveDateTime) -> NaiveDateTime {
    let candidate = NaiveDateTime::new(now.date(), truncate_to_minute(time));
    if candidate < now {
        candidate + chrono::Duration::days(1)
    } else {
        candidate
    }
}

/// Current local wall-clock time, timezone dropped.
pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

fn truncate_to_minute(time: NaiveTime) -> NaiveTime {
    time.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(time)
}

pub fn parse_date(s: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| ValidationError::InvalidDate(s.to_string()))
}

/// Accepts `HH:MM`, plus `HH:MM:SS` from older rows; seconds are dropped.
pub fn parse_time(s: &str) -> Result<NaiveTime, ValidationError> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map(truncate_to_minute)
        .map_err(|_| ValidationError::InvalidTime(s.to_string()))
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn format_time(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

pub(crate) mod date_format {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(date: &NaiveDate, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_date(*date))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_date(&raw).map_err(serde::de::Error::custom)
    }
}

pub(crate) mod time_format {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_time(*time))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_time(&raw).map_err(serde::de::Error::custom)
    }
}
