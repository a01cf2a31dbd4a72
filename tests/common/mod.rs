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

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use zephyr_scraper::adapter::cam::{CamAdapter, CamFetch};
use zephyr_scraper::adapter::{Adapter, AdapterError};
use zephyr_scraper::blob::{BlobError, BlobStore, MemoryBlobStore};
use zephyr_scraper::bucket::ManualClock;
use zephyr_scraper::health::{Alert, AlertError, AlertSink};
use zephyr_scraper::memory::MemoryStore;
use zephyr_scraper::metrics::PipelineMetrics;
use zephyr_scraper::model::{Cam, RawReading, Reading, Station, Timestamp};
use zephyr_scraper::sounding::ImageSource;
use zephyr_scraper::store::{HealthMark, SnapshotUpdate, StationRepository, StoreError};

pub fn at(h: u32, m: u32, s: u32) -> Timestamp {
    Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
}

pub fn clock(now: Timestamp) -> Arc<ManualClock> {
    Arc::new(ManualClock::new(now))
}

pub fn metrics() -> Arc<PipelineMetrics> {
    Arc::new(PipelineMetrics::detached())
}

pub fn station(id: &str, source_type: &str) -> Station {
    Station::new(id, format!("Station {}", id), source_type).with_external_id(id)
}

pub fn complete(avg: f64) -> RawReading {
    RawReading {
        wind_average: Some(avg),
        wind_gust: Some(avg + 5.0),
        wind_bearing: Some(200.0),
        temperature: Some(11.5),
    }
}

/// Encoded PNG of the given size and color.
pub fn png(width: u32, height: u32, shade: u8) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([shade, shade, 200]));
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
        .unwrap();
    buf
}

#[derive(Debug, Clone)]
pub enum Script {
    Data(RawReading),
    NoData,
    Fail,
    Hang,
    Panic,
}

/// Station adapter returning a fixed outcome per station id. Unscripted stations fail.
#[derive(Default)]
pub struct ScriptedAdapter {
    scripts: HashMap<String, Script>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, station_id: &str, script: Script) -> Self {
        self.scripts.insert(station_id.to_owned(), script);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        let mut calls = self.calls.lock().clone();
        calls.sort();
        calls
    }
}

#[async_trait]
impl Adapter for ScriptedAdapter {
    async fn fetch(&self, station: &Station) -> Result<Option<RawReading>, AdapterError> {
        self.calls.lock().push(station.id.clone());
        match self.scripts.get(&station.id).cloned().unwrap_or(Script::Fail) {
            Script::Data(raw) => Ok(Some(raw)),
            Script::NoData => Ok(None),
            Script::Fail => Err(AdapterError::Http("connection reset".to_owned())),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(None)
            }
            Script::Panic => panic!("adapter blew up for {}", station.id),
        }
    }
}

/// Cam adapter serving queued responses in order. An empty queue means no image.
pub struct QueuedCamAdapter {
    timestamped: bool,
    queue: Mutex<VecDeque<Result<CamFetch, AdapterError>>>,
}

impl QueuedCamAdapter {
    pub fn new(timestamped: bool) -> Self {
        QueuedCamAdapter {
            timestamped,
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, captured_at: Option<Timestamp>, bytes: Vec<u8>) {
        self.queue.lock().push_back(Ok(CamFetch { captured_at, bytes }));
    }

    pub fn push_error(&self) {
        self.queue
            .lock()
            .push_back(Err(AdapterError::Status {
                status: reqwest::StatusCode::BAD_GATEWAY,
                url: "https://example.com/cam.jpg".to_owned(),
            }));
    }
}

#[async_trait]
impl CamAdapter for QueuedCamAdapter {
    fn embeds_timestamp(&self) -> bool {
        self.timestamped
    }

    async fn fetch(&self, _cam: &Cam, _now: Timestamp) -> Result<Option<CamFetch>, AdapterError> {
        match self.queue.lock().pop_front() {
            Some(res) => res.map(Some),
            None => Ok(None),
        }
    }
}

/// Alert sink that keeps everything it is sent.
#[derive(Default)]
pub struct RecordingSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingSink {
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        self.alerts.lock().push(alert.clone());
        Ok(())
    }
}

/// Blob store wrapper that refuses to delete while `fail_deletes` is set.
#[derive(Default)]
pub struct FlakyBlobStore {
    pub inner: MemoryBlobStore,
    pub fail_deletes: Mutex<bool>,
}

#[async_trait]
impl BlobStore for FlakyBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), BlobError> {
        self.inner.put(key, bytes).await
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        if *self.fail_deletes.lock() {
            return Err(BlobError::Io {
                key: key.to_owned(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read only"),
            });
        }
        self.inner.delete(key).await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), BlobError> {
        self.inner.delete_prefix(prefix).await
    }
}

/// Sounding image source that serves a PNG for every URL except those containing `missing`.
#[derive(Default)]
pub struct FakeImageSource {
    pub missing: Option<String>,
    pub requested: Mutex<Vec<String>>,
}

#[async_trait]
impl ImageSource for FakeImageSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, AdapterError> {
        self.requested.lock().push(url.to_owned());
        match &self.missing {
            Some(m) if url.contains(m.as_str()) => Err(AdapterError::Status {
                status: reqwest::StatusCode::NOT_FOUND,
                url: url.to_owned(),
            }),
            _ => Ok(png(1200, 900, 90)),
        }
    }
}

/// Station repository that rejects every write for one station.
pub struct BrokenStation {
    pub inner: Arc<MemoryStore>,
    pub broken: String,
}

impl BrokenStation {
    fn check(&self, id: &str) -> Result<(), StoreError> {
        if id == self.broken {
            Err(StoreError::Backend(format!("disk full writing {}", id)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StationRepository for BrokenStation {
    async fn station(&self, id: &str) -> Result<Station, StoreError> {
        self.inner.station(id).await
    }

    async fn station_ids(&self) -> Result<Vec<String>, StoreError> {
        self.inner.station_ids().await
    }

    async fn enabled_stations(&self) -> Result<Vec<Station>, StoreError> {
        self.inner.enabled_stations().await
    }

    async fn enabled_stations_with_latest(&self) -> Result<Vec<(Station, Option<Reading>)>, StoreError> {
        self.inner.enabled_stations_with_latest().await
    }

    async fn readings_since(&self, id: &str, since: Timestamp) -> Result<Vec<Reading>, StoreError> {
        self.inner.readings_since(id, since).await
    }

    async fn upsert_reading(&self, id: &str, reading: Reading) -> Result<(), StoreError> {
        self.check(id)?;
        self.inner.upsert_reading(id, reading).await
    }

    async fn record_outcome(&self, id: &str, reading: Reading, update: SnapshotUpdate) -> Result<(), StoreError> {
        self.check(id)?;
        self.inner.record_outcome(id, reading, update).await
    }

    async fn mark_health(&self, id: &str, mark: HealthMark) -> Result<(), StoreError> {
        self.check(id)?;
        self.inner.mark_health(id, mark).await
    }

    async fn prune_readings(&self, id: &str, cutoff: Timestamp) -> Result<usize, StoreError> {
        self.inner.prune_readings(id, cutoff).await
    }
}
