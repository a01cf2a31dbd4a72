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

//! In-process implementation of the repository traits. Nothing survives a restart, see
//! [`crate::sqlite::SqliteStore`] for the durable one.

use crate::model::{Cam, CamImage, Reading, Sounding, SoundingImage, Station, Timestamp};
use crate::store::{
    CamRepository, HealthMark, Inventory, SnapshotUpdate, SoundingRepository, StationRepository, StoreError,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Debug)]
struct StationEntry {
    station: Station,
    // Keyed by bucket time so a second write for the same bucket replaces the first
    readings: BTreeMap<Timestamp, Reading>,
}

#[derive(Debug, Default)]
struct Inner {
    stations: BTreeMap<String, StationEntry>,
    cams: BTreeMap<String, Cam>,
    soundings: BTreeMap<String, Sounding>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_inventory(inventory: Inventory) -> Self {
        let store = Self::new();
        for station in inventory.stations {
            store.insert_station(station);
        }
        for cam in inventory.cams {
            store.insert_cam(cam);
        }
        for sounding in inventory.soundings {
            store.insert_sounding(sounding);
        }

        store
    }

    pub fn insert_station(&self, station: Station) {
        self.inner.write().stations.insert(
            station.id.clone(),
            StationEntry {
                station,
                readings: BTreeMap::new(),
            },
        );
    }

    pub fn insert_cam(&self, cam: Cam) {
        self.inner.write().cams.insert(cam.id.clone(), cam);
    }

    pub fn insert_sounding(&self, sounding: Sounding) {
        self.inner.write().soundings.insert(sounding.id.clone(), sounding);
    }

    /// All readings for a station, most recent first.
    pub fn readings(&self, id: &str) -> Vec<Reading> {
        self.inner
            .read()
            .stations
            .get(id)
            .map(|e| e.readings.values().rev().copied().collect())
            .unwrap_or_default()
    }

    pub fn sounding(&self, id: &str) -> Option<Sounding> {
        self.inner.read().soundings.get(id).cloned()
    }
}

#[async_trait]
impl StationRepository for MemoryStore {
    async fn station(&self, id: &str) -> Result<Station, StoreError> {
        self.inner
            .read()
            .stations
            .get(id)
            .map(|e| e.station.clone())
            .ok_or_else(|| StoreError::station_not_found(id))
    }

    async fn station_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.inner.read().stations.keys().cloned().collect())
    }

    async fn enabled_stations(&self) -> Result<Vec<Station>, StoreError> {
        Ok(self
            .inner
            .read()
            .stations
            .values()
            .filter(|e| !e.station.is_disabled)
            .map(|e| e.station.clone())
            .collect())
    }

    async fn enabled_stations_with_latest(&self) -> Result<Vec<(Station, Option<Reading>)>, StoreError> {
        Ok(self
            .inner
            .read()
            .stations
            .values()
            .filter(|e| !e.station.is_disabled)
            .map(|e| (e.station.clone(), e.readings.values().next_back().copied()))
            .collect())
    }

    async fn readings_since(&self, id: &str, since: Timestamp) -> Result<Vec<Reading>, StoreError> {
        let inner = self.inner.read();
        let entry = inner.stations.get(id).ok_or_else(|| StoreError::station_not_found(id))?;
        Ok(entry.readings.range(since..).rev().map(|(_, r)| *r).collect())
    }

    async fn upsert_reading(&self, id: &str, reading: Reading) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let entry = inner
            .stations
            .get_mut(id)
            .ok_or_else(|| StoreError::station_not_found(id))?;
        entry.readings.insert(reading.time, reading);
        Ok(())
    }

    async fn record_outcome(&self, id: &str, reading: Reading, update: SnapshotUpdate) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let entry = inner
            .stations
            .get_mut(id)
            .ok_or_else(|| StoreError::station_not_found(id))?;

        entry.readings.insert(reading.time, reading);
        update.apply_to(&mut entry.station);
        Ok(())
    }

    async fn mark_health(&self, id: &str, mark: HealthMark) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let station = &mut inner
            .stations
            .get_mut(id)
            .ok_or_else(|| StoreError::station_not_found(id))?
            .station;

        mark.apply_to(station);
        Ok(())
    }

    async fn prune_readings(&self, id: &str, cutoff: Timestamp) -> Result<usize, StoreError> {
        let mut inner = self.inner.write();
        let entry = inner
            .stations
            .get_mut(id)
            .ok_or_else(|| StoreError::station_not_found(id))?;

        let before = entry.readings.len();
        entry.readings.retain(|time, _| *time > cutoff);
        Ok(before - entry.readings.len())
    }
}

#[async_trait]
impl CamRepository for MemoryStore {
    async fn cams(&self) -> Result<Vec<Cam>, StoreError> {
        Ok(self.inner.read().cams.values().cloned().collect())
    }

    async fn cam(&self, id: &str) -> Result<Cam, StoreError> {
        self.inner
            .read()
            .cams
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::cam_not_found(id))
    }

    async fn append_image(&self, id: &str, image: CamImage, last_update: Timestamp) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let cam = inner.cams.get_mut(id).ok_or_else(|| StoreError::cam_not_found(id))?;

        cam.last_update = Some(last_update);
        cam.current_time = Some(image.time);
        cam.current_url = Some(image.url.clone());
        cam.images.push(image);
        Ok(())
    }

    async fn prune_images(&self, id: &str, cutoff: Timestamp) -> Result<Vec<CamImage>, StoreError> {
        let mut inner = self.inner.write();
        let cam = inner.cams.get_mut(id).ok_or_else(|| StoreError::cam_not_found(id))?;

        let (removed, kept): (Vec<CamImage>, Vec<CamImage>) = cam.images.drain(..).partition(|i| i.time <= cutoff);
        cam.images = kept;
        Ok(removed)
    }
}

#[async_trait]
impl SoundingRepository for MemoryStore {
    async fn soundings(&self) -> Result<Vec<Sounding>, StoreError> {
        Ok(self.inner.read().soundings.values().cloned().collect())
    }

    async fn clear_sounding_images(&self, id: &str) -> Result<Vec<SoundingImage>, StoreError> {
        let mut inner = self.inner.write();
        let sounding = inner
            .soundings
            .get_mut(id)
            .ok_or_else(|| StoreError::sounding_not_found(id))?;
        Ok(std::mem::take(&mut sounding.images))
    }

    async fn append_sounding_image(&self, id: &str, image: SoundingImage) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let sounding = inner
            .soundings
            .get_mut(id)
            .ok_or_else(|| StoreError::sounding_not_found(id))?;
        sounding.images.push(image);
        Ok(())
    }
}
