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

//! Repository traits for stations, cams and soundings.
//!
//! Writes are always scoped to one entity so concurrent acquisition tasks for different
//! stations or cams never touch the same record.

use crate::model::{Cam, CamImage, Reading, SanitizedReading, Sounding, SoundingImage, Station, Timestamp};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("unable to load inventory {path}: {message}")]
    Inventory { path: String, message: String },

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored record is malformed: {0}")]
    Malformed(String),
}

impl StoreError {
    pub fn station_not_found(id: &str) -> Self {
        StoreError::NotFound {
            kind: "station",
            id: id.to_owned(),
        }
    }

    pub fn cam_not_found(id: &str) -> Self {
        StoreError::NotFound {
            kind: "cam",
            id: id.to_owned(),
        }
    }

    pub fn sounding_not_found(id: &str) -> Self {
        StoreError::NotFound {
            kind: "sounding",
            id: id.to_owned(),
        }
    }
}

/// Everything the pipeline operates on, as defined outside of this crate.
#[derive(Debug, Default, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub stations: Vec<Station>,
    #[serde(default)]
    pub cams: Vec<Cam>,
    #[serde(default)]
    pub soundings: Vec<Sounding>,
}

impl Inventory {
    /// Load an inventory from a JSON file with top level `stations`, `cams` and `soundings` arrays.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let inventory_error = |message: String| StoreError::Inventory {
            path: path.display().to_string(),
            message,
        };

        let contents = tokio::fs::read(path).await.map_err(|e| inventory_error(e.to_string()))?;
        let inventory: Inventory = serde_json::from_slice(&contents).map_err(|e| inventory_error(e.to_string()))?;

        tracing::info!(
            message = "loaded inventory",
            path = %path.display(),
            stations = inventory.stations.len(),
            cams = inventory.cams.len(),
            soundings = inventory.soundings.len(),
        );

        Ok(inventory)
    }
}

/// Changes written to a station after each processed scrape outcome.
///
/// Only the writer clears health flags and only the health monitor sets them, see
/// [`HealthMark`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapshotUpdate {
    pub last_update: Timestamp,
    pub values: SanitizedReading,
    pub clear_offline: bool,
    pub clear_error: bool,
}

impl SnapshotUpdate {
    pub fn new(last_update: Timestamp, values: SanitizedReading) -> Self {
        SnapshotUpdate {
            last_update,
            values,
            clear_offline: values.has_wind(),
            clear_error: values.is_complete(),
        }
    }

    pub fn apply_to(&self, station: &mut Station) {
        station.last_update = Some(self.last_update);
        station.current_average = self.values.wind_average;
        station.current_gust = self.values.wind_gust;
        station.current_bearing = self.values.wind_bearing;
        station.current_temperature = self.values.temperature;
        if self.clear_offline {
            station.is_offline = false;
        }
        if self.clear_error {
            station.is_error = false;
        }
    }
}

/// Flags raised by the health monitor. A `false` field leaves the stored flag untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthMark {
    pub offline: bool,
    pub error: bool,
}

impl HealthMark {
    pub fn apply_to(&self, station: &mut Station) {
        if self.offline {
            station.is_offline = true;
        }
        if self.error {
            station.is_error = true;
        }
    }
}

#[async_trait]
pub trait StationRepository: Send + Sync {
    async fn station(&self, id: &str) -> Result<Station, StoreError>;

    async fn station_ids(&self) -> Result<Vec<String>, StoreError>;

    /// All stations not marked as disabled.
    async fn enabled_stations(&self) -> Result<Vec<Station>, StoreError>;

    /// All enabled stations along with their most recent reading, if any.
    async fn enabled_stations_with_latest(&self) -> Result<Vec<(Station, Option<Reading>)>, StoreError>;

    /// Readings with a bucket time at or after `since`, most recent first.
    async fn readings_since(&self, id: &str, since: Timestamp) -> Result<Vec<Reading>, StoreError>;

    /// Insert a reading, replacing any existing reading for the same bucket.
    async fn upsert_reading(&self, id: &str, reading: Reading) -> Result<(), StoreError>;

    /// Insert the reading for a bucket and apply the snapshot update as a single write. On
    /// error neither change is visible.
    async fn record_outcome(&self, id: &str, reading: Reading, update: SnapshotUpdate) -> Result<(), StoreError>;

    async fn mark_health(&self, id: &str, mark: HealthMark) -> Result<(), StoreError>;

    /// Remove readings with a bucket time at or before `cutoff`, returning how many were removed.
    async fn prune_readings(&self, id: &str, cutoff: Timestamp) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait CamRepository: Send + Sync {
    async fn cams(&self) -> Result<Vec<Cam>, StoreError>;

    async fn cam(&self, id: &str) -> Result<Cam, StoreError>;

    /// Append an image and point the cam's current snapshot at it.
    async fn append_image(&self, id: &str, image: CamImage, last_update: Timestamp) -> Result<(), StoreError>;

    /// Remove images captured at or before `cutoff`, returning the removed entries.
    async fn prune_images(&self, id: &str, cutoff: Timestamp) -> Result<Vec<CamImage>, StoreError>;
}

#[async_trait]
pub trait SoundingRepository: Send + Sync {
    async fn soundings(&self) -> Result<Vec<Sounding>, StoreError>;

    /// Remove every image of a sounding, returning the removed entries.
    async fn clear_sounding_images(&self, id: &str) -> Result<Vec<SoundingImage>, StoreError>;

    async fn append_sounding_image(&self, id: &str, image: SoundingImage) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::SnapshotUpdate;
    use crate::model::SanitizedReading;
    use chrono::Utc;

    #[test]
    fn test_snapshot_update_clears_offline_on_any_wind() {
        let values = SanitizedReading {
            wind_average: Some(4.0),
            ..SanitizedReading::default()
        };
        let update = SnapshotUpdate::new(Utc::now(), values);
        assert!(update.clear_offline);
        assert!(!update.clear_error);
    }

    #[test]
    fn test_snapshot_update_clears_error_only_when_complete() {
        let values = SanitizedReading {
            wind_average: Some(4.0),
            wind_gust: Some(9.0),
            wind_bearing: Some(45.0),
            temperature: Some(12.0),
        };
        let update = SnapshotUpdate::new(Utc::now(), values);
        assert!(update.clear_offline);
        assert!(update.clear_error);

        let empty = SnapshotUpdate::new(Utc::now(), SanitizedReading::default());
        assert!(!empty.clear_offline);
        assert!(!empty.clear_error);
    }
}
