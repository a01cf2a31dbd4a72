// zephyr_scraper - Weather station telemetry acquisition and health monitoring
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//
//! Cron expressions evaluated in a fixed timezone.
//!
//! Expressions use the six field form with a leading seconds field, e.g. `0 */10 * * * *`.
//! Firing times are computed from an injected instant rather than the wall clock so the
//! registry can be driven by any [`crate::bucket::Clock`].

use crate::model::Timestamp;
use chrono::Utc;
use chrono_tz::Tz;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid cron expression '{expr}': {source}")]
pub struct ScheduleError {
    pub expr: String,
    #[source]
    pub source: cron::error::Error,
}

#[derive(Debug, Clone)]
pub struct Schedule {
    expr: cron::Schedule,
    timezone: Tz,
}

impl Schedule {
    /// Parse an expression evaluated in UTC.
    pub fn new(expr: &str) -> Result<Self, ScheduleError> {
        Self::with_timezone(expr, chrono_tz::UTC)
    }

    pub fn with_timezone(expr: &str, timezone: Tz) -> Result<Self, ScheduleError> {
        let expr = cron::Schedule::from_str(expr).map_err(|source| ScheduleError {
            expr: expr.to_owned(),
            source,
        })?;

        Ok(Schedule { expr, timezone })
    }

    /// First firing strictly after `after`.
    pub fn next_after(&self, after: Timestamp) -> Option<Timestamp> {
        self.expr
            .after(&after.with_timezone(&self.timezone))
            .next()
            .map(|t| t.with_timezone(&Utc))
    }

    pub fn matches(&self, t: Timestamp) -> bool {
        self.expr.includes(t.with_timezone(&self.timezone))
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.expr, self.timezone)
    }
}

#[cfg(test)]
mod tests {
    use super::Schedule;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_every_ten_minutes() {
        let s = Schedule::new("0 */10 * * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2024, 3, 1, 12, 7, 45).unwrap();
        assert_eq!(Utc.with_ymd_and_hms(2024, 3, 1, 12, 10, 0).unwrap(), s.next_after(after).unwrap());

        // Strictly after
        let after = Utc.with_ymd_and_hms(2024, 3, 1, 12, 10, 0).unwrap();
        assert_eq!(Utc.with_ymd_and_hms(2024, 3, 1, 12, 20, 0).unwrap(), s.next_after(after).unwrap());
        assert!(s.matches(after));
    }

    #[test]
    fn test_minute_list() {
        let s = Schedule::new("0 3,6,13,16 * * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2024, 3, 1, 12, 6, 0).unwrap();
        assert_eq!(Utc.with_ymd_and_hms(2024, 3, 1, 12, 13, 0).unwrap(), s.next_after(after).unwrap());

        let after = Utc.with_ymd_and_hms(2024, 3, 1, 12, 59, 0).unwrap();
        assert_eq!(Utc.with_ymd_and_hms(2024, 3, 1, 13, 3, 0).unwrap(), s.next_after(after).unwrap());
    }

    #[test]
    fn test_every_sixth_hour() {
        let s = Schedule::new("0 5 */6 * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2024, 3, 1, 6, 5, 0).unwrap();
        assert_eq!(Utc.with_ymd_and_hms(2024, 3, 1, 12, 5, 0).unwrap(), s.next_after(after).unwrap());
    }

    #[test]
    fn test_timezone() {
        let s = Schedule::with_timezone("0 0 6 * * *", chrono_tz::Pacific::Auckland).unwrap();
        // NZDT is UTC+13 in March
        let after = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(Utc.with_ymd_and_hms(2024, 3, 1, 17, 0, 0).unwrap(), s.next_after(after).unwrap());
        assert!(!s.matches(Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap()));
    }

    #[test]
    fn test_invalid_expressions() {
        assert!(Schedule::new("0 60 * * * *").is_err());
        assert!(Schedule::new("0 * 24 * * *").is_err());
        assert!(Schedule::new("abc").is_err());

        let err = Schedule::new("0 60 * * * *").unwrap_err();
        assert_eq!("0 60 * * * *", err.expr);
    }
}
