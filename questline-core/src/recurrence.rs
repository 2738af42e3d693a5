//! Recurrence descriptors for repeating quests.
//!
//! Compact text form (CLI): `daily`, `daily/3`, `weekly/2/mon,thu`, `monthly`.

use chrono::{
    DateTime, Datelike, Days, Duration, Months, NaiveDateTime, TimeZone, Utc, Weekday,
};
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurrenceKind {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurrence {
    pub kind: RecurrenceKind,
    pub interval: u32,
    /// Weekly only. Kept sorted Monday-first, no duplicates.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub days_of_week: Vec<Weekday>,
}

impl Recurrence {
    pub fn daily(interval: u32) -> Self {
        Self {
            kind: RecurrenceKind::Daily,
            interval,
            days_of_week: vec![],
        }
    }

    pub fn weekly(interval: u32, days: impl IntoIterator<Item = Weekday>) -> Self {
        let mut days_of_week: Vec<Weekday> = days.into_iter().collect();
        days_of_week.sort_by_key(|d| d.num_days_from_monday());
        days_of_week.dedup();
        Self {
            kind: RecurrenceKind::Weekly,
            interval,
            days_of_week,
        }
    }

    pub fn monthly(interval: u32) -> Self {
        Self {
            kind: RecurrenceKind::Monthly,
            interval,
            days_of_week: vec![],
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval == 0 {
            return Err(EngineError::validation("recurrence", "interval must be >= 1"));
        }
        if self.kind != RecurrenceKind::Weekly && !self.days_of_week.is_empty() {
            return Err(EngineError::validation(
                "recurrence",
                "days of week only apply to weekly recurrence",
            ));
        }
        Ok(())
    }

    /// Next due date after `from`, stepped on the local calendar of `tz`. The local
    /// time of day and weekday hold across DST changes.
    pub fn next_due(&self, from: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        let local = from.with_timezone(&tz).naive_local();
        let interval = u64::from(self.interval);
        let next = match self.kind {
            RecurrenceKind::Daily => local.checked_add_days(Days::new(interval)),
            RecurrenceKind::Weekly if self.days_of_week.is_empty() => {
                local.checked_add_days(Days::new(7 * interval))
            }
            RecurrenceKind::Weekly => {
                let today = local.weekday().num_days_from_monday();
                let later_this_week = self
                    .days_of_week
                    .iter()
                    .map(|d| d.num_days_from_monday())
                    .find(|&d| d > today);
                let ahead = match later_this_week {
                    Some(d) => u64::from(d - today),
                    // Otherwise the first slot `interval` weeks on.
                    None => {
                        let first = self.days_of_week[0].num_days_from_monday();
                        7 * interval + u64::from(first) - u64::from(today)
                    }
                };
                local.checked_add_days(Days::new(ahead))
            }
            RecurrenceKind::Monthly => local.checked_add_months(Months::new(self.interval)),
        }?;
        resolve_local(next, tz)
    }
}

/// Local wall time to UTC. An ambiguous time takes the earlier instant; a time skipped
/// by a spring-forward gap moves one hour later.
fn resolve_local(naive: NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
}

fn recurrence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(daily|weekly|monthly)(?:/(\d+))?(?:/([a-z,]+))?$")
            .expect("recurrence pattern is valid")
    })
}

/// Parse the compact text form. The result is validated.
pub fn parse_recurrence(input: &str) -> Result<Recurrence> {
    let s = input.trim().to_lowercase();
    let caps = recurrence_re().captures(&s).ok_or_else(|| {
        EngineError::validation("recurrence", format!("cannot parse '{input}'"))
    })?;

    let interval = match caps.get(2) {
        Some(m) => m
            .as_str()
            .parse::<u32>()
            .map_err(|e| EngineError::validation("recurrence", e.to_string()))?,
        None => 1,
    };

    let mut days = Vec::new();
    if let Some(list) = caps.get(3) {
        for name in list.as_str().split(',').filter(|n| !n.is_empty()) {
            let day = name.parse::<Weekday>().map_err(|_| {
                EngineError::validation("recurrence", format!("unknown weekday '{name}'"))
            })?;
            days.push(day);
        }
    }

    let rec = match &caps[1] {
        "daily" => Recurrence {
            days_of_week: days,
            ..Recurrence::daily(interval)
        },
        "weekly" => Recurrence::weekly(interval, days),
        _ => Recurrence {
            days_of_week: days,
            ..Recurrence::monthly(interval)
        },
    };
    rec.validate()?;
    Ok(rec)
}
