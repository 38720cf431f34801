use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// How the next reset instant follows from the one that just fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResetSchedule {
    /// Fixed-length cycle.
    Interval { days: u32 },
    /// Every month on the day of the grant's own reset instant, at the same
    /// time of day. Days past the end of a short month clamp to its last day.
    Monthly,
}

impl Default for ResetSchedule {
    fn default() -> Self {
        ResetSchedule::Interval { days: 30 }
    }
}

impl ResetSchedule {
    pub fn is_valid(&self) -> bool {
        match *self {
            ResetSchedule::Interval { days } => days > 0,
            ResetSchedule::Monthly => true,
        }
    }

    /// Instant of the reset after `from`, or `None` when the schedule cannot
    /// produce one. Monthly cycles land on `anchor`'s day of the month; without
    /// an anchor they keep `from`'s day.
    pub fn next_after(
        &self,
        from: DateTime<Utc>,
        anchor: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        if !self.is_valid() {
            return None;
        }
        match *self {
            ResetSchedule::Interval { days } => {
                from.checked_add_signed(TimeDelta::try_days(i64::from(days))?)
            }
            ResetSchedule::Monthly => {
                let day = anchor.map_or(from.day(), |a| a.day());
                let next_month = first_of_month(from)?.checked_add_months(Months::new(1))?;
                Some(clamped_day(next_month, day)?.and_time(from.time()).and_utc())
            }
        }
    }
}

/// First midnight on `day` of a month (clamped to the month's end) strictly
/// after `from`. Used for account cycles, which carry only a day of the month.
pub fn next_month_day(from: DateTime<Utc>, day: u32) -> Option<DateTime<Utc>> {
    let this_month = first_of_month(from)?;
    let candidate = clamped_day(this_month, day)?
        .and_time(NaiveTime::MIN)
        .and_utc();
    if candidate > from {
        return Some(candidate);
    }
    let next_month = this_month.checked_add_months(Months::new(1))?;
    Some(clamped_day(next_month, day)?.and_time(NaiveTime::MIN).and_utc())
}

/// Walks boundaries from `due` while they are not after `now`. Returns the
/// latest boundary reached and the first one still ahead, if any.
pub(crate) fn latest_boundary(
    due: DateTime<Utc>,
    now: DateTime<Utc>,
    next: impl Fn(DateTime<Utc>) -> Option<DateTime<Utc>>,
) -> (DateTime<Utc>, Option<DateTime<Utc>>) {
    let mut boundary = due;
    let mut upcoming = next(due);
    while let Some(candidate) = upcoming {
        if candidate > now {
            break;
        }
        boundary = candidate;
        upcoming = next(candidate);
    }
    (boundary, upcoming)
}

fn first_of_month(at: DateTime<Utc>) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(at.year(), at.month(), 1)
}

fn clamped_day(first: NaiveDate, day: u32) -> Option<NaiveDate> {
    let last_day = first.checked_add_months(Months::new(1))?.pred_opt()?.day();
    first.with_day(day.clamp(1, last_day))
}
