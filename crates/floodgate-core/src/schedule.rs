//! Schedule specification.
//!
//! The runner only ever asks one question of a schedule: given an instant,
//! when does this task next fire? Both fixed intervals and cron expressions
//! reduce to that single function, so the runner is independent of the
//! schedule format.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::ScheduleError;

/// When a task fires.
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Fixed interval measured from the previous fire instant.
    Every(Duration),
    /// Cron expression (seconds-precision, UTC).
    Cron(Box<cron::Schedule>),
}

impl Schedule {
    /// Fire every `interval`.
    #[must_use]
    pub fn every(interval: Duration) -> Self {
        Self::Every(interval)
    }

    /// Fire every `secs` seconds.
    #[must_use]
    pub fn every_secs(secs: u64) -> Self {
        Self::Every(Duration::from_secs(secs))
    }

    /// Parse a cron expression.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::InvalidCron`] when the expression does not
    /// parse.
    pub fn cron(expr: &str) -> Result<Self, ScheduleError> {
        expr.parse::<cron::Schedule>()
            .map(|s| Self::Cron(Box::new(s)))
            .map_err(|e| ScheduleError::InvalidCron {
                expr: expr.to_owned(),
                reason: e.to_string(),
            })
    }

    /// The next fire instant strictly after `after`.
    ///
    /// `None` means the schedule is exhausted (possible for cron expressions
    /// with a bounded year field).
    #[must_use]
    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Every(interval) => {
                let step = chrono::Duration::from_std(*interval).ok()?;
                after.checked_add_signed(step)
            }
            Self::Cron(schedule) => schedule.after(&after).next(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn interval_fires_one_step_after() {
        let schedule = Schedule::every_secs(10);
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let next = schedule.next_fire(now).unwrap();
        assert_eq!(next, now + chrono::Duration::seconds(10));
    }

    #[test]
    fn cron_fires_at_the_next_matching_instant() {
        // Top of every hour.
        let schedule = Schedule::cron("0 0 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let next = schedule.next_fire(now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 1, 13, 0, 0).unwrap());
    }

    #[test]
    fn cron_next_is_strictly_after() {
        let schedule = Schedule::cron("0 0 * * * *").unwrap();
        let on_the_hour = Utc.with_ymd_and_hms(2024, 3, 1, 13, 0, 0).unwrap();
        let next = schedule.next_fire(on_the_hour).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap());
    }

    #[test]
    fn invalid_cron_is_rejected() {
        let err = Schedule::cron("not a cron").unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidCron { .. }));
    }
}
