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
mod common;

use chrono::Duration;
use common::{at, clock, station};
use std::path::Path;
use std::sync::Arc;
use zephyr_scraper::blob::{BlobStore, FsBlobStore};
use zephyr_scraper::model::{Cam, CamImage, Reading, SanitizedReading};
use zephyr_scraper::retention::{RetentionSettings, RetentionSweeper};
use zephyr_scraper::sqlite::SqliteStore;
use zephyr_scraper::store::{CamRepository, HealthMark, Inventory, SnapshotUpdate, StationRepository};

fn inventory() -> Inventory {
    Inventory {
        stations: vec![station("s1", "alpha")],
        cams: vec![Cam::new("c1", "Summit", "url")],
        ..Inventory::default()
    }
}

async fn reopen(path: &Path) -> Arc<SqliteStore> {
    let store = SqliteStore::open(path).await.unwrap();
    store.sync_inventory(&inventory()).await.unwrap();
    Arc::new(store)
}

#[tokio::test]
async fn test_station_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("zephyr.db");

    let store = reopen(&db).await;
    let values = SanitizedReading {
        wind_average: Some(18.0),
        wind_gust: Some(25.0),
        ..Default::default()
    };
    store
        .record_outcome("s1", Reading::new(at(12, 0, 0), values), SnapshotUpdate::new(at(12, 7, 0), values))
        .await
        .unwrap();
    store
        .mark_health("s1", HealthMark { offline: false, error: true })
        .await
        .unwrap();
    store.close().await;

    let store = reopen(&db).await;
    let s1 = store.station("s1").await.unwrap();
    assert_eq!(Some(at(12, 7, 0)), s1.last_update);
    assert_eq!(Some(18.0), s1.current_average);
    assert!(s1.is_error);
    assert!(!s1.is_offline);

    let readings = store.readings_since("s1", at(0, 0, 0)).await.unwrap();
    assert_eq!(vec![Reading::new(at(12, 0, 0), values)], readings);
}

#[tokio::test]
async fn test_images_from_before_restart_are_swept() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("zephyr.db");
    let data = dir.path().join("public");
    let blobs = Arc::new(FsBlobStore::new(&data));

    let store = reopen(&db).await;
    let image = CamImage {
        time: at(12, 0, 0),
        url: "cams/url/c1/1709294400000.jpg".to_owned(),
        file_size: Some(3),
        hash: Some("abc".to_owned()),
    };
    blobs.put(&image.url, vec![1, 2, 3]).await.unwrap();
    store.append_image("c1", image.clone(), at(12, 1, 0)).await.unwrap();
    store.close().await;

    let store = reopen(&db).await;
    let cam = store.cam("c1").await.unwrap();
    assert_eq!(Some(at(12, 1, 0)), cam.last_update);
    assert_eq!(vec![image.clone()], cam.images);

    let sweeper = RetentionSweeper::new(
        store.clone(),
        store.clone(),
        blobs,
        clock(at(12, 0, 0) + Duration::days(3)),
        RetentionSettings::default(),
    );
    let summary = sweeper.sweep().await.unwrap();
    assert_eq!(1, summary.images_removed);
    assert_eq!(0, summary.cams_incomplete);

    assert!(store.cam("c1").await.unwrap().images.is_empty());
    assert!(!data.join(&image.url).exists());
}
