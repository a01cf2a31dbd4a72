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

//! Clock abstraction and time bucketing for readings.
//!
//! Every reading written during one acquisition run shares the same bucket timestamp: the
//! time the run started, floored to the acquisition interval. This keeps readings from the
//! same run lined up regardless of how long each adapter took to respond.

use crate::model::Timestamp;
use chrono::{TimeZone, Timelike, Utc};
use parking_lot::Mutex;
use std::fmt::Debug;

pub const DEFAULT_INTERVAL_MINUTES: u32 = 10;

/// Source of "now" for everything that needs it.
pub trait Clock: Debug + Send + Sync {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(now: Timestamp) -> Self {
        ManualClock { now: Mutex::new(now) }
    }

    pub fn set(&self, now: Timestamp) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now = *now + by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}

/// Truncate `ts` down to the nearest `interval_minutes` boundary within the hour, with
/// seconds and sub-second components zeroed.
///
/// An interval of zero is treated as one minute.
pub fn floor_to_interval(ts: Timestamp, interval_minutes: u32) -> Timestamp {
    let interval = interval_minutes.max(1);
    let rem = i64::from(ts.minute() % interval);
    let secs = ts.timestamp();
    let floored = secs - secs.rem_euclid(60) - rem * 60;

    Utc.timestamp_opt(floored, 0).single().unwrap_or(ts)
}

/// The current bucket according to `clock`.
pub fn floored_now(clock: &dyn Clock, interval_minutes: u32) -> Timestamp {
    floor_to_interval(clock.now(), interval_minutes)
}
