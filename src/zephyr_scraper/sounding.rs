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

//! Daily refresh of RASP sounding images.

use crate::adapter::{fetch_bytes, AdapterError};
use crate::blob::BlobStore;
use crate::bucket::Clock;
use crate::model::{Sounding, SoundingImage, Timestamp};
use crate::resize::{resize_to_width, OutputFormat, DEFAULT_WIDTH};
use crate::store::{SoundingRepository, StoreError};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use reqwest::Client;
use std::ops::RangeInclusive;
use std::sync::Arc;

pub const DEFAULT_BASE_URL: &str = "http://rasp.nz/rasp/regions";

/// Source of raw sounding images by URL.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, AdapterError>;
}

#[derive(Debug, Clone)]
pub struct HttpImageSource {
    client: Client,
}

impl HttpImageSource {
    pub fn new(client: Client) -> Self {
        HttpImageSource { client }
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, AdapterError> {
        fetch_bytes(&self.client, url).await
    }
}

#[derive(Debug, Clone)]
pub struct SoundingSettings {
    pub base_url: String,
    pub timezone: Tz,
    pub hours: RangeInclusive<u32>,
    pub width: u32,
}

impl Default for SoundingSettings {
    fn default() -> Self {
        SoundingSettings {
            base_url: DEFAULT_BASE_URL.to_owned(),
            timezone: chrono_tz::Pacific::Auckland,
            hours: 9..=19,
            width: DEFAULT_WIDTH,
        }
    }
}

/// URL of the image for `sounding` at local `hour` on local `date`.
pub fn sounding_url(base_url: &str, sounding: &Sounding, date: NaiveDate, hour: u32) -> String {
    format!(
        "{}/{}+0/{}/{}/sounding{}.curr.{:02}00lst.w2.png",
        base_url.trim_end_matches('/'),
        sounding.rasp_region,
        date.format("%Y"),
        date.format("%Y%m%d"),
        sounding.rasp_id,
        hour
    )
}

/// Blob directory holding every image for `sounding`.
pub fn sounding_prefix(sounding: &Sounding) -> String {
    format!("soundings/{}/{}", sounding.rasp_region, sounding.rasp_id)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SoundingSummary {
    pub soundings: usize,
    pub images: usize,
    pub failures: usize,
}

pub struct SoundingJob {
    soundings: Arc<dyn SoundingRepository>,
    blobs: Arc<dyn BlobStore>,
    source: Arc<dyn ImageSource>,
    clock: Arc<dyn Clock>,
    settings: SoundingSettings,
}

impl SoundingJob {
    pub fn new(
        soundings: Arc<dyn SoundingRepository>,
        blobs: Arc<dyn BlobStore>,
        source: Arc<dyn ImageSource>,
        clock: Arc<dyn Clock>,
        settings: SoundingSettings,
    ) -> Self {
        SoundingJob {
            soundings,
            blobs,
            source,
            clock,
            settings,
        }
    }

    /// Replace the images of every sounding with today's (in the configured timezone).
    pub async fn run(&self) -> Result<SoundingSummary, StoreError> {
        let date = self.clock.now().with_timezone(&self.settings.timezone).date_naive();
        let soundings = self.soundings.soundings().await?;

        let mut summary = SoundingSummary {
            soundings: soundings.len(),
            ..Default::default()
        };

        for sounding in soundings {
            if let Err(e) = self.clear(&sounding).await {
                tracing::error!(message = "unable to clear sounding", service = "sounding", sounding = %sounding.id, error = %e);
                summary.failures += 1;
                continue;
            }

            for hour in self.settings.hours.clone() {
                match self.fetch_hour(&sounding, date, hour).await {
                    Ok(()) => {
                        tracing::info!(
                            message = "rasp sounding updated",
                            service = "sounding",
                            region = %sounding.rasp_region,
                            rasp_id = %sounding.rasp_id,
                            hour,
                        );
                        summary.images += 1;
                    }
                    Err(e) => {
                        tracing::warn!(
                            message = "unable to fetch rasp sounding",
                            service = "sounding",
                            region = %sounding.rasp_region,
                            rasp_id = %sounding.rasp_id,
                            hour,
                            error = %e,
                        );
                        summary.failures += 1;
                    }
                }
            }
        }

        Ok(summary)
    }

    async fn clear(&self, sounding: &Sounding) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.soundings.clear_sounding_images(&sounding.id).await?;
        self.blobs.delete_prefix(&sounding_prefix(sounding)).await?;
        Ok(())
    }

    async fn fetch_hour(
        &self,
        sounding: &Sounding,
        date: NaiveDate,
        hour: u32,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let local = date
            .and_hms_opt(hour, 0, 0)
            .ok_or_else(|| format!("invalid sounding hour {}", hour))?;
        let time = self.local_to_utc(local)?;

        let url = sounding_url(&self.settings.base_url, sounding, date, hour);
        let bytes = self.source.fetch(&url).await?;

        let width = self.settings.width;
        let resized = tokio::task::spawn_blocking(move || resize_to_width(&bytes, width, OutputFormat::Png)).await??;

        let key = format!(
            "{}/{}.{}",
            sounding_prefix(sounding),
            local.format("%Y-%m-%dT%H:%M:%S"),
            OutputFormat::Png.extension()
        );
        self.blobs.put(&key, resized).await?;
        self.soundings
            .append_sounding_image(&sounding.id, SoundingImage { time, url: key })
            .await?;

        Ok(())
    }

    fn local_to_utc(&self, local: NaiveDateTime) -> Result<Timestamp, String> {
        self.settings
            .timezone
            .from_local_datetime(&local)
            .earliest()
            .map(|t| t.with_timezone(&Utc))
            .ok_or_else(|| format!("{} does not exist in {}", local, self.settings.timezone))
    }
}

#[cfg(test)]
mod tests {
    use super::{sounding_prefix, sounding_url, DEFAULT_BASE_URL};
    use crate::model::{GeoPoint, Sounding};
    use chrono::NaiveDate;

    fn sounding() -> Sounding {
        Sounding {
            id: "snd1".to_owned(),
            name: "Wanaka".to_owned(),
            location: GeoPoint::default(),
            rasp_region: "CANTERBURY".to_owned(),
            rasp_id: "12".to_owned(),
            images: Vec::new(),
        }
    }

    #[test]
    fn test_sounding_url() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(
            "http://rasp.nz/rasp/regions/CANTERBURY+0/2024/20240305/sounding12.curr.0900lst.w2.png",
            sounding_url(DEFAULT_BASE_URL, &sounding(), date, 9)
        );
    }

    #[test]
    fn test_sounding_prefix() {
        assert_eq!("soundings/CANTERBURY/12", sounding_prefix(&sounding()));
    }
}
