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
//! Durable implementation of the repository traits backed by SQLite.
//!
//! Station and cam state written by the jobs (snapshots, health flags, readings, the image
//! index) lives here and survives restarts. The inventory only defines which entities exist
//! and their identity fields, see [`SqliteStore::sync_inventory`].
//!
//! Timestamps are stored as milliseconds since the epoch so range queries compare integers.

use crate::model::{Cam, CamImage, GeoPoint, Reading, Sounding, SoundingImage, Station, Timestamp};
use crate::store::{
    CamRepository, HealthMark, Inventory, SnapshotUpdate, SoundingRepository, StationRepository, StoreError,
};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::types::Json;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::str::FromStr;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS stations (
        id TEXT PRIMARY KEY NOT NULL,
        name TEXT NOT NULL,
        source_type TEXT NOT NULL,
        external_id TEXT,
        external_link TEXT NOT NULL,
        location TEXT NOT NULL,
        elevation REAL,
        is_disabled INTEGER NOT NULL,
        last_update INTEGER,
        current_average REAL,
        current_gust REAL,
        current_bearing REAL,
        current_temperature REAL,
        is_offline INTEGER NOT NULL,
        is_error INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS readings (
        station_id TEXT NOT NULL,
        time INTEGER NOT NULL,
        wind_average REAL,
        wind_gust REAL,
        wind_bearing REAL,
        temperature REAL,
        PRIMARY KEY (station_id, time)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cams (
        id TEXT PRIMARY KEY NOT NULL,
        name TEXT NOT NULL,
        cam_type TEXT NOT NULL,
        external_id TEXT,
        external_link TEXT NOT NULL,
        location TEXT NOT NULL,
        last_update INTEGER,
        current_image_time INTEGER,
        current_url TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cam_images (
        cam_id TEXT NOT NULL,
        time INTEGER NOT NULL,
        url TEXT NOT NULL,
        file_size INTEGER,
        hash TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS cam_images_by_time ON cam_images (cam_id, time)",
    r#"
    CREATE TABLE IF NOT EXISTS soundings (
        id TEXT PRIMARY KEY NOT NULL,
        name TEXT NOT NULL,
        location TEXT NOT NULL,
        rasp_region TEXT NOT NULL,
        rasp_id TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sounding_images (
        sounding_id TEXT NOT NULL,
        time INTEGER NOT NULL,
        url TEXT NOT NULL
    )
    "#,
];

#[derive(sqlx::FromRow)]
struct StationRow {
    id: String,
    name: String,
    source_type: String,
    external_id: Option<String>,
    external_link: String,
    location: Json<GeoPoint>,
    elevation: Option<f64>,
    is_disabled: bool,
    last_update: Option<i64>,
    current_average: Option<f64>,
    current_gust: Option<f64>,
    current_bearing: Option<f64>,
    current_temperature: Option<f64>,
    is_offline: bool,
    is_error: bool,
}

impl TryFrom<StationRow> for Station {
    type Error = StoreError;

    fn try_from(row: StationRow) -> Result<Self, Self::Error> {
        Ok(Station {
            id: row.id,
            name: row.name,
            source_type: row.source_type,
            external_id: row.external_id,
            external_link: row.external_link,
            location: row.location.0,
            elevation: row.elevation,
            is_disabled: row.is_disabled,
            last_update: row.last_update.map(from_millis).transpose()?,
            current_average: row.current_average,
            current_gust: row.current_gust,
            current_bearing: row.current_bearing,
            current_temperature: row.current_temperature,
            is_offline: row.is_offline,
            is_error: row.is_error,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ReadingRow {
    station_id: String,
    time: i64,
    wind_average: Option<f64>,
    wind_gust: Option<f64>,
    wind_bearing: Option<f64>,
    temperature: Option<f64>,
}

impl TryFrom<ReadingRow> for Reading {
    type Error = StoreError;

    fn try_from(row: ReadingRow) -> Result<Self, Self::Error> {
        Ok(Reading {
            time: from_millis(row.time)?,
            wind_average: row.wind_average,
            wind_gust: row.wind_gust,
            wind_bearing: row.wind_bearing,
            temperature: row.temperature,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CamRow {
    id: String,
    name: String,
    cam_type: String,
    external_id: Option<String>,
    external_link: String,
    location: Json<GeoPoint>,
    last_update: Option<i64>,
    current_image_time: Option<i64>,
    current_url: Option<String>,
}

impl CamRow {
    fn into_cam(self, images: Vec<CamImage>) -> Result<Cam, StoreError> {
        Ok(Cam {
            id: self.id,
            name: self.name,
            cam_type: self.cam_type,
            external_id: self.external_id,
            external_link: self.external_link,
            location: self.location.0,
            last_update: self.last_update.map(from_millis).transpose()?,
            current_time: self.current_image_time.map(from_millis).transpose()?,
            current_url: self.current_url,
            images,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CamImageRow {
    cam_id: String,
    time: i64,
    url: String,
    file_size: Option<i64>,
    hash: Option<String>,
}

impl TryFrom<CamImageRow> for CamImage {
    type Error = StoreError;

    fn try_from(row: CamImageRow) -> Result<Self, Self::Error> {
        let file_size = row
            .file_size
            .map(|s| u64::try_from(s).map_err(|_| StoreError::Malformed(format!("file size {}", s))))
            .transpose()?;

        Ok(CamImage {
            time: from_millis(row.time)?,
            url: row.url,
            file_size,
            hash: row.hash,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SoundingRow {
    id: String,
    name: String,
    location: Json<GeoPoint>,
    rasp_region: String,
    rasp_id: String,
}

#[derive(sqlx::FromRow)]
struct SoundingImageRow {
    sounding_id: String,
    time: i64,
    url: String,
}

impl TryFrom<SoundingImageRow> for SoundingImage {
    type Error = StoreError;

    fn try_from(row: SoundingImageRow) -> Result<Self, Self::Error> {
        Ok(SoundingImage {
            time: from_millis(row.time)?,
            url: row.url,
        })
    }
}

/// Counts of entities added by [`SqliteStore::sync_inventory`]. Entities that already
/// existed are updated in place and not counted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncSummary {
    pub stations_added: usize,
    pub cams_added: usize,
    pub soundings_added: usize,
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) a database file.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let store = Self::with_options(options).await?;
        tracing::info!(message = "opened database", path = %path.as_ref().display());
        Ok(store)
    }

    /// Connect using a URL such as `sqlite::memory:` or `sqlite://zephyr.db`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        Self::with_options(options).await
    }

    async fn with_options(options: SqliteConnectOptions) -> Result<Self, StoreError> {
        // A single long lived connection serializes writes and keeps in-memory databases alive
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        Ok(SqliteStore { pool })
    }

    /// Wait for pending writes and close the connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Add entities from the inventory that don't exist yet and refresh the identity fields
    /// of those that do. State written by the jobs is never overwritten.
    pub async fn sync_inventory(&self, inventory: &Inventory) -> Result<SyncSummary, StoreError> {
        let mut summary = SyncSummary::default();
        let mut tx = self.pool.begin().await?;

        for station in &inventory.stations {
            if exists(&mut tx, "stations", &station.id).await? {
                sqlx::query(
                    r#"
                    UPDATE stations
                    SET name = ?, source_type = ?, external_id = ?, external_link = ?, location = ?,
                        elevation = ?, is_disabled = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&station.name)
                .bind(&station.source_type)
                .bind(&station.external_id)
                .bind(&station.external_link)
                .bind(Json(station.location))
                .bind(station.elevation)
                .bind(station.is_disabled)
                .bind(&station.id)
                .execute(&mut *tx)
                .await?;
            } else {
                insert_station(&mut tx, station).await?;
                summary.stations_added += 1;
            }
        }

        for cam in &inventory.cams {
            if exists(&mut tx, "cams", &cam.id).await? {
                sqlx::query(
                    r#"
                    UPDATE cams
                    SET name = ?, cam_type = ?, external_id = ?, external_link = ?, location = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&cam.name)
                .bind(&cam.cam_type)
                .bind(&cam.external_id)
                .bind(&cam.external_link)
                .bind(Json(cam.location))
                .bind(&cam.id)
                .execute(&mut *tx)
                .await?;
            } else {
                insert_cam(&mut tx, cam).await?;
                summary.cams_added += 1;
            }
        }

        for sounding in &inventory.soundings {
            if exists(&mut tx, "soundings", &sounding.id).await? {
                sqlx::query("UPDATE soundings SET name = ?, location = ?, rasp_region = ?, rasp_id = ? WHERE id = ?")
                    .bind(&sounding.name)
                    .bind(Json(sounding.location))
                    .bind(&sounding.rasp_region)
                    .bind(&sounding.rasp_id)
                    .bind(&sounding.id)
                    .execute(&mut *tx)
                    .await?;
            } else {
                insert_sounding(&mut tx, sounding).await?;
                summary.soundings_added += 1;
            }
        }

        tx.commit().await?;
        tracing::info!(
            message = "synced inventory",
            stations_added = summary.stations_added,
            cams_added = summary.cams_added,
            soundings_added = summary.soundings_added,
        );

        Ok(summary)
    }

    async fn cam_images(&self, id: Option<&str>) -> Result<BTreeMap<String, Vec<CamImage>>, StoreError> {
        let rows: Vec<CamImageRow> = sqlx::query_as(
            r#"
            SELECT cam_id, time, url, file_size, hash
            FROM cam_images
            WHERE ?1 IS NULL OR cam_id = ?1
            ORDER BY cam_id, time, rowid
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let mut images: BTreeMap<String, Vec<CamImage>> = BTreeMap::new();
        for row in rows {
            let cam_id = row.cam_id.clone();
            images.entry(cam_id).or_default().push(row.try_into()?);
        }

        Ok(images)
    }
}

fn to_millis(t: Timestamp) -> i64 {
    t.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<Timestamp, StoreError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::Malformed(format!("timestamp {}", ms)))
}

async fn exists(conn: &mut SqliteConnection, table: &'static str, id: &str) -> Result<bool, StoreError> {
    let sql = format!("SELECT COUNT(*) FROM {} WHERE id = ?", table);
    let count: i64 = sqlx::query_scalar(&sql).bind(id).fetch_one(conn).await?;
    Ok(count > 0)
}

async fn require(conn: &mut SqliteConnection, table: &'static str, id: &str) -> Result<(), StoreError> {
    if exists(conn, table, id).await? {
        return Ok(());
    }

    Err(match table {
        "cams" => StoreError::cam_not_found(id),
        "soundings" => StoreError::sounding_not_found(id),
        _ => StoreError::station_not_found(id),
    })
}

async fn insert_station(conn: &mut SqliteConnection, station: &Station) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO stations (
            id, name, source_type, external_id, external_link, location, elevation, is_disabled,
            last_update, current_average, current_gust, current_bearing, current_temperature,
            is_offline, is_error
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&station.id)
    .bind(&station.name)
    .bind(&station.source_type)
    .bind(&station.external_id)
    .bind(&station.external_link)
    .bind(Json(station.location))
    .bind(station.elevation)
    .bind(station.is_disabled)
    .bind(station.last_update.map(to_millis))
    .bind(station.current_average)
    .bind(station.current_gust)
    .bind(station.current_bearing)
    .bind(station.current_temperature)
    .bind(station.is_offline)
    .bind(station.is_error)
    .execute(conn)
    .await?;

    Ok(())
}

async fn insert_cam(conn: &mut SqliteConnection, cam: &Cam) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO cams (
            id, name, cam_type, external_id, external_link, location, last_update,
            current_image_time, current_url
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&cam.id)
    .bind(&cam.name)
    .bind(&cam.cam_type)
    .bind(&cam.external_id)
    .bind(&cam.external_link)
    .bind(Json(cam.location))
    .bind(cam.last_update.map(to_millis))
    .bind(cam.current_time.map(to_millis))
    .bind(&cam.current_url)
    .execute(&mut *conn)
    .await?;

    for image in &cam.images {
        insert_cam_image(&mut *conn, &cam.id, image).await?;
    }

    Ok(())
}

async fn insert_cam_image(conn: &mut SqliteConnection, id: &str, image: &CamImage) -> Result<(), StoreError> {
    let file_size = image
        .file_size
        .map(|s| i64::try_from(s).map_err(|_| StoreError::Malformed(format!("file size {}", s))))
        .transpose()?;

    sqlx::query("INSERT INTO cam_images (cam_id, time, url, file_size, hash) VALUES (?, ?, ?, ?, ?)")
        .bind(id)
        .bind(to_millis(image.time))
        .bind(&image.url)
        .bind(file_size)
        .bind(&image.hash)
        .execute(conn)
        .await?;

    Ok(())
}

async fn insert_sounding(conn: &mut SqliteConnection, sounding: &Sounding) -> Result<(), StoreError> {
    sqlx::query("INSERT INTO soundings (id, name, location, rasp_region, rasp_id) VALUES (?, ?, ?, ?, ?)")
        .bind(&sounding.id)
        .bind(&sounding.name)
        .bind(Json(sounding.location))
        .bind(&sounding.rasp_region)
        .bind(&sounding.rasp_id)
        .execute(&mut *conn)
        .await?;

    for image in &sounding.images {
        insert_sounding_image(&mut *conn, &sounding.id, image).await?;
    }

    Ok(())
}

async fn insert_sounding_image(conn: &mut SqliteConnection, id: &str, image: &SoundingImage) -> Result<(), StoreError> {
    sqlx::query("INSERT INTO sounding_images (sounding_id, time, url) VALUES (?, ?, ?)")
        .bind(id)
        .bind(to_millis(image.time))
        .bind(&image.url)
        .execute(conn)
        .await?;

    Ok(())
}

async fn upsert_reading_row(conn: &mut SqliteConnection, id: &str, reading: &Reading) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO readings (station_id, time, wind_average, wind_gust, wind_bearing, temperature)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (station_id, time) DO UPDATE SET
            wind_average = excluded.wind_average,
            wind_gust = excluded.wind_gust,
            wind_bearing = excluded.wind_bearing,
            temperature = excluded.temperature
        "#,
    )
    .bind(id)
    .bind(to_millis(reading.time))
    .bind(reading.wind_average)
    .bind(reading.wind_gust)
    .bind(reading.wind_bearing)
    .bind(reading.temperature)
    .execute(conn)
    .await?;

    Ok(())
}

const SELECT_STATIONS: &str = r#"
    SELECT id, name, source_type, external_id, external_link, location, elevation, is_disabled,
        last_update, current_average, current_gust, current_bearing, current_temperature,
        is_offline, is_error
    FROM stations
"#;

const SELECT_CAMS: &str = r#"
    SELECT id, name, cam_type, external_id, external_link, location, last_update,
        current_image_time, current_url
    FROM cams
"#;

#[async_trait]
impl StationRepository for SqliteStore {
    async fn station(&self, id: &str) -> Result<Station, StoreError> {
        let sql = format!("{} WHERE id = ?", SELECT_STATIONS);
        let row: Option<StationRow> = sqlx::query_as(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.ok_or_else(|| StoreError::station_not_found(id))?.try_into()
    }

    async fn station_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(sqlx::query_scalar("SELECT id FROM stations ORDER BY id")
            .fetch_all(&self.pool)
            .await?)
    }

    async fn enabled_stations(&self) -> Result<Vec<Station>, StoreError> {
        let sql = format!("{} WHERE is_disabled = 0 ORDER BY id", SELECT_STATIONS);
        let rows: Vec<StationRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(Station::try_from).collect()
    }

    async fn enabled_stations_with_latest(&self) -> Result<Vec<(Station, Option<Reading>)>, StoreError> {
        let stations = self.enabled_stations().await?;
        let rows: Vec<ReadingRow> = sqlx::query_as(
            r#"
            SELECT r.station_id, r.time, r.wind_average, r.wind_gust, r.wind_bearing, r.temperature
            FROM readings r
            JOIN (SELECT station_id, MAX(time) AS time FROM readings GROUP BY station_id) latest
                ON r.station_id = latest.station_id AND r.time = latest.time
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut latest = HashMap::with_capacity(rows.len());
        for row in rows {
            latest.insert(row.station_id.clone(), Reading::try_from(row)?);
        }

        Ok(stations
            .into_iter()
            .map(|s| {
                let reading = latest.remove(&s.id);
                (s, reading)
            })
            .collect())
    }

    async fn readings_since(&self, id: &str, since: Timestamp) -> Result<Vec<Reading>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        require(&mut conn, "stations", id).await?;

        let rows: Vec<ReadingRow> = sqlx::query_as(
            r#"
            SELECT station_id, time, wind_average, wind_gust, wind_bearing, temperature
            FROM readings
            WHERE station_id = ? AND time >= ?
            ORDER BY time DESC
            "#,
        )
        .bind(id)
        .bind(to_millis(since))
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter().map(Reading::try_from).collect()
    }

    async fn upsert_reading(&self, id: &str, reading: Reading) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        require(&mut tx, "stations", id).await?;
        upsert_reading_row(&mut tx, id, &reading).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_outcome(&self, id: &str, reading: Reading, update: SnapshotUpdate) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let res = sqlx::query(
            r#"
            UPDATE stations
            SET last_update = ?, current_average = ?, current_gust = ?, current_bearing = ?,
                current_temperature = ?, is_offline = is_offline AND NOT ?, is_error = is_error AND NOT ?
            WHERE id = ?
            "#,
        )
        .bind(to_millis(update.last_update))
        .bind(update.values.wind_average)
        .bind(update.values.wind_gust)
        .bind(update.values.wind_bearing)
        .bind(update.values.temperature)
        .bind(update.clear_offline)
        .bind(update.clear_error)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if res.rows_affected() == 0 {
            return Err(StoreError::station_not_found(id));
        }

        // Dropping the transaction on error rolls back the snapshot as well
        upsert_reading_row(&mut tx, id, &reading).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn mark_health(&self, id: &str, mark: HealthMark) -> Result<(), StoreError> {
        let res = sqlx::query("UPDATE stations SET is_offline = is_offline OR ?, is_error = is_error OR ? WHERE id = ?")
            .bind(mark.offline)
            .bind(mark.error)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if res.rows_affected() == 0 {
            return Err(StoreError::station_not_found(id));
        }

        Ok(())
    }

    async fn prune_readings(&self, id: &str, cutoff: Timestamp) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        require(&mut tx, "stations", id).await?;
        let res = sqlx::query("DELETE FROM readings WHERE station_id = ? AND time <= ?")
            .bind(id)
            .bind(to_millis(cutoff))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(res.rows_affected() as usize)
    }
}

#[async_trait]
impl CamRepository for SqliteStore {
    async fn cams(&self) -> Result<Vec<Cam>, StoreError> {
        let sql = format!("{} ORDER BY id", SELECT_CAMS);
        let rows: Vec<CamRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        let mut images = self.cam_images(None).await?;

        rows.into_iter()
            .map(|row| {
                let cam_images = images.remove(&row.id).unwrap_or_default();
                row.into_cam(cam_images)
            })
            .collect()
    }

    async fn cam(&self, id: &str) -> Result<Cam, StoreError> {
        let sql = format!("{} WHERE id = ?", SELECT_CAMS);
        let row: CamRow = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::cam_not_found(id))?;

        let images = self.cam_images(Some(id)).await?.remove(id).unwrap_or_default();
        row.into_cam(images)
    }

    async fn append_image(&self, id: &str, image: CamImage, last_update: Timestamp) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let res = sqlx::query("UPDATE cams SET last_update = ?, current_image_time = ?, current_url = ? WHERE id = ?")
            .bind(to_millis(last_update))
            .bind(to_millis(image.time))
            .bind(&image.url)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if res.rows_affected() == 0 {
            return Err(StoreError::cam_not_found(id));
        }

        insert_cam_image(&mut tx, id, &image).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn prune_images(&self, id: &str, cutoff: Timestamp) -> Result<Vec<CamImage>, StoreError> {
        let mut tx = self.pool.begin().await?;
        require(&mut tx, "cams", id).await?;

        let rows: Vec<CamImageRow> = sqlx::query_as(
            r#"
            SELECT cam_id, time, url, file_size, hash
            FROM cam_images
            WHERE cam_id = ? AND time <= ?
            ORDER BY time, rowid
            "#,
        )
        .bind(id)
        .bind(to_millis(cutoff))
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM cam_images WHERE cam_id = ? AND time <= ?")
            .bind(id)
            .bind(to_millis(cutoff))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        rows.into_iter().map(CamImage::try_from).collect()
    }
}

#[async_trait]
impl SoundingRepository for SqliteStore {
    async fn soundings(&self) -> Result<Vec<Sounding>, StoreError> {
        let rows: Vec<SoundingRow> =
            sqlx::query_as("SELECT id, name, location, rasp_region, rasp_id FROM soundings ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        let image_rows: Vec<SoundingImageRow> =
            sqlx::query_as("SELECT sounding_id, time, url FROM sounding_images ORDER BY sounding_id, time, rowid")
                .fetch_all(&self.pool)
                .await?;

        let mut images: BTreeMap<String, Vec<SoundingImage>> = BTreeMap::new();
        for row in image_rows {
            let sounding_id = row.sounding_id.clone();
            images.entry(sounding_id).or_default().push(row.try_into()?);
        }

        Ok(rows
            .into_iter()
            .map(|row| Sounding {
                images: images.remove(&row.id).unwrap_or_default(),
                id: row.id,
                name: row.name,
                location: row.location.0,
                rasp_region: row.rasp_region,
                rasp_id: row.rasp_id,
            })
            .collect())
    }

    async fn clear_sounding_images(&self, id: &str) -> Result<Vec<SoundingImage>, StoreError> {
        let mut tx = self.pool.begin().await?;
        require(&mut tx, "soundings", id).await?;

        let rows: Vec<SoundingImageRow> =
            sqlx::query_as("SELECT sounding_id, time, url FROM sounding_images WHERE sounding_id = ? ORDER BY time, rowid")
                .bind(id)
                .fetch_all(&mut *tx)
                .await?;
        sqlx::query("DELETE FROM sounding_images WHERE sounding_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        rows.into_iter().map(SoundingImage::try_from).collect()
    }

    async fn append_sounding_image(&self, id: &str, image: SoundingImage) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        require(&mut tx, "soundings", id).await?;
        insert_sounding_image(&mut tx, id, &image).await?;
        tx.commit().await?;
        Ok(())
    }
}
