//! Trigger specifications and next-occurrence math.
//!
//! Weekly triggers carry a wall-clock time interpreted in UTC.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Day of the week used by recurring triggers.
///
/// Ordered Monday first so weekday sets serialize in a stable order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl DayOfWeek {
    pub const ALL: [DayOfWeek; 7] = [
        Self::Mon,
        Self::Tue,
        Self::Wed,
        Self::Thu,
        Self::Fri,
        Self::Sat,
        Self::Sun,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mon => "mon",
            Self::Tue => "tue",
            Self::Wed => "wed",
            Self::Thu => "thu",
            Self::Fri => "fri",
            Self::Sat => "sat",
            Self::Sun => "sun",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mon" | "monday" => Some(Self::Mon),
            "tue" | "tuesday" => Some(Self::Tue),
            "wed" | "wednesday" => Some(Self::Wed),
            "thu" | "thursday" => Some(Self::Thu),
            "fri" | "friday" => Some(Self::Fri),
            "sat" | "saturday" => Some(Self::Sat),
            "sun" | "sunday" => Some(Self::Sun),
            _ => None,
        }
    }
}

impl From<Weekday> for DayOfWeek {
    fn from(day: Weekday) -> Self {
        match day {
            Weekday::Mon => Self::Mon,
            Weekday::Tue => Self::Tue,
            Weekday::Wed => Self::Wed,
            Weekday::Thu => Self::Thu,
            Weekday::Fri => Self::Fri,
            Weekday::Sat => Self::Sat,
            Weekday::Sun => Self::Sun,
        }
    }
}

impl From<DayOfWeek> for Weekday {
    fn from(day: DayOfWeek) -> Self {
        match day {
            DayOfWeek::Mon => Weekday::Mon,
            DayOfWeek::Tue => Weekday::Tue,
            DayOfWeek::Wed => Weekday::Wed,
            DayOfWeek::Thu => Weekday::Thu,
            DayOfWeek::Fri => Weekday::Fri,
            DayOfWeek::Sat => Weekday::Sat,
            DayOfWeek::Sun => Weekday::Sun,
        }
    }
}

/// When an alarm fires.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Fire once at an absolute instant.
    Once { at: DateTime<Utc> },
    /// Fire every week on the given days at `hour:minute` UTC.
    Weekly {
        weekdays: BTreeSet<DayOfWeek>,
        hour: u8,
        minute: u8,
    },
}

/// Reasons a trigger is structurally invalid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TriggerError {
    #[error("recurring trigger must name at least one weekday")]
    EmptyWeekdays,
    #[error("hour {0} is out of range (0-23)")]
    HourOutOfRange(u8),
    #[error("minute {0} is out of range (0-59)")]
    MinuteOutOfRange(u8),
}

impl Trigger {
    /// Convenience constructor for a weekly trigger.
    pub fn weekly(days: impl IntoIterator<Item = DayOfWeek>, hour: u8, minute: u8) -> Self {
        Self::Weekly {
            weekdays: days.into_iter().collect(),
            hour,
            minute,
        }
    }

    /// Checks structural validity. Does not look at the clock.
    pub fn validate(&self) -> Result<(), TriggerError> {
        match self {
            Self::Once { .. } => Ok(()),
            Self::Weekly {
                weekdays,
                hour,
                minute,
            } => {
                if weekdays.is_empty() {
                    return Err(TriggerError::EmptyWeekdays);
                }
                if *hour > 23 {
                    return Err(TriggerError::HourOutOfRange(*hour));
                }
                if *minute > 59 {
                    return Err(TriggerError::MinuteOutOfRange(*minute));
                }
                Ok(())
            }
        }
    }

    pub fn is_recurring(&self) -> bool {
        matches!(self, Self::Weekly { .. })
    }

    /// Returns the first occurrence strictly after `now`.
    ///
    /// One-shot triggers in the past have no next occurrence.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Once { at } => (*at > now).then_some(*at),
            Self::Weekly {
                weekdays,
                hour,
                minute,
            } => {
                let time = NaiveTime::from_hms_opt(u32::from(*hour), u32::from(*minute), 0)?;
                let today = now.date_naive();
                // 8 days covers "same weekday, but the time already passed".
                (0..=7).find_map(|offset| {
                    let date = today + Duration::days(offset);
                    if !weekdays.contains(&DayOfWeek::from(date.weekday())) {
                        return None;
                    }
                    let candidate = Utc.from_utc_datetime(&date.and_time(time));
                    (candidate > now).then_some(candidate)
                })
            }
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Once { at } => write!(f, "once at {}", at.to_rfc3339()),
            Self::Weekly {
                weekdays,
                hour,
                minute,
            } => {
                let days: Vec<&str> = weekdays.iter().map(DayOfWeek::as_str).collect();
                write!(f, "weekly on {} at {hour:02}:{minute:02} UTC", days.join(","))
            }
        }
    }
}
