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

use crate::bucket::DEFAULT_INTERVAL_MINUTES;
use crate::fanout::DEFAULT_CONCURRENCY;
use crate::health::HealthSettings;
use crate::orchestrator::OrchestratorSettings;
use crate::retention::RetentionSettings;
use crate::schedule::{Schedule, ScheduleError};
use crate::sounding::SoundingSettings;
use crate::webcam::WebcamSettings;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("interval must be between 1 and 60 minutes, got {0}")]
    Interval(u32),

    #[error("concurrency must be at least 1")]
    Concurrency,

    #[error("timeout must be greater than zero")]
    Timeout,

    #[error("retention period must be greater than zero and representable, got {0} days")]
    Retention(i64),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

/// Cron expression for each job, seconds field first.
#[derive(Debug, Clone)]
pub struct JobSchedules {
    pub station: Schedule,
    pub miss: Schedule,
    pub errors: Schedule,
    pub cam: Schedule,
    pub cleanup: Schedule,
    pub sounding: Schedule,
}

impl JobSchedules {
    pub fn standard() -> Result<Self, ScheduleError> {
        Ok(JobSchedules {
            station: Schedule::new("0 */10 * * * *")?,
            miss: Schedule::new("0 3,6,13,16,23,26,33,35,36,43,46,53,56 * * * *")?,
            errors: Schedule::new("0 5 */6 * * *")?,
            cam: Schedule::new("0 1,11,21,31,41,51 * * * *")?,
            cleanup: Schedule::new("0 0 0 * * *")?,
            sounding: Schedule::with_timezone("0 0 6 * * *", chrono_tz::Pacific::Auckland)?,
        })
    }
}

/// Everything that tunes the pipeline, with defaults for each setting.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub interval_minutes: u32,
    pub concurrency: usize,
    pub call_timeout: Duration,
    pub health: HealthSettings,
    pub retention: RetentionSettings,
    pub webcam: WebcamSettings,
    pub sounding: SoundingSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
            concurrency: DEFAULT_CONCURRENCY,
            call_timeout: crate::adapter::DEFAULT_TIMEOUT,
            health: HealthSettings::default(),
            retention: RetentionSettings::default(),
            webcam: WebcamSettings::default(),
            sounding: SoundingSettings::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=60).contains(&self.interval_minutes) {
            return Err(ConfigError::Interval(self.interval_minutes));
        }
        if self.concurrency == 0 || self.webcam.concurrency == 0 {
            return Err(ConfigError::Concurrency);
        }
        if self.call_timeout.is_zero() || self.webcam.call_timeout.is_zero() {
            return Err(ConfigError::Timeout);
        }

        let ages = [Some(self.retention.image_max_age), self.retention.reading_max_age];
        for age in ages.into_iter().flatten() {
            if age <= chrono::Duration::zero() || age > max_retention() {
                return Err(ConfigError::Retention(age.num_days()));
            }
        }

        Ok(())
    }

    /// Keep readings for `days`, or forever when `None`.
    pub fn with_reading_retention(mut self, days: Option<u32>) -> Result<Self, ConfigError> {
        self.retention.reading_max_age = match days {
            Some(d) => Some(chrono::Duration::try_days(i64::from(d)).ok_or(ConfigError::Retention(i64::from(d)))?),
            None => None,
        };
        Ok(self)
    }

    /// Apply the shared concurrency and timeout to the webcam settings as well.
    pub fn with_limits(mut self, concurrency: usize, call_timeout: Duration) -> Self {
        self.concurrency = concurrency;
        self.call_timeout = call_timeout;
        self.webcam.concurrency = concurrency;
        self.webcam.call_timeout = call_timeout;
        self
    }

    pub fn orchestrator(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            interval_minutes: self.interval_minutes,
            concurrency: self.concurrency,
            call_timeout: self.call_timeout,
        }
    }
}

// Keeps `now - max_age` well inside the range of a timestamp.
const MAX_RETENTION_DAYS: i64 = 100 * 366;

fn max_retention() -> chrono::Duration {
    chrono::Duration::days(MAX_RETENTION_DAYS)
}
