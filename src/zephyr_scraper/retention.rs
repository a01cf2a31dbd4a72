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

//! Nightly cleanup of expired cam images and old readings.
//!
//! Work is driven by the repository index in batches. For each cam the blobs are removed
//! before the index entries, so an interrupted sweep leaves entries that the next sweep
//! will pick up again.

use crate::blob::BlobStore;
use crate::bucket::Clock;
use crate::model::{Cam, Timestamp};
use crate::store::{CamRepository, StationRepository, StoreError};
use futures::future::join_all;
use std::sync::Arc;

pub const DEFAULT_BATCH_SIZE: usize = 25;

#[derive(Debug, Clone)]
pub struct RetentionSettings {
    pub image_max_age: chrono::Duration,
    /// `None` keeps readings forever.
    pub reading_max_age: Option<chrono::Duration>,
    pub batch_size: usize,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        RetentionSettings {
            image_max_age: chrono::Duration::hours(24),
            reading_max_age: Some(chrono::Duration::days(30)),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetentionSummary {
    pub images_removed: usize,
    pub cams_incomplete: usize,
    pub readings_removed: usize,
}

pub struct RetentionSweeper {
    stations: Arc<dyn StationRepository>,
    cams: Arc<dyn CamRepository>,
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    settings: RetentionSettings,
}

impl RetentionSweeper {
    pub fn new(
        stations: Arc<dyn StationRepository>,
        cams: Arc<dyn CamRepository>,
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        settings: RetentionSettings,
    ) -> Self {
        RetentionSweeper {
            stations,
            cams,
            blobs,
            clock,
            settings,
        }
    }

    pub async fn sweep(&self) -> Result<RetentionSummary, StoreError> {
        let now = self.clock.now();
        let batch_size = self.settings.batch_size.max(1);
        let mut summary = RetentionSummary::default();

        let image_cutoff = now - self.settings.image_max_age;
        let cams = self.cams.cams().await?;
        for batch in cams.chunks(batch_size) {
            for res in join_all(batch.iter().map(|c| self.sweep_cam(c, image_cutoff))).await {
                match res {
                    Some(removed) => summary.images_removed += removed,
                    None => summary.cams_incomplete += 1,
                }
            }
        }

        if let Some(max_age) = self.settings.reading_max_age {
            let reading_cutoff = now - max_age;
            let ids = self.stations.station_ids().await?;
            for batch in ids.chunks(batch_size) {
                for (id, res) in batch
                    .iter()
                    .zip(join_all(batch.iter().map(|id| self.stations.prune_readings(id, reading_cutoff))).await)
                {
                    match res {
                        Ok(removed) => summary.readings_removed += removed,
                        Err(e) => {
                            tracing::error!(message = "unable to prune readings", service = "cleanup", station = %id, error = %e)
                        }
                    }
                }
            }
        }

        tracing::info!(
            message = "removed old data",
            service = "cleanup",
            images_removed = summary.images_removed,
            cams_incomplete = summary.cams_incomplete,
            readings_removed = summary.readings_removed,
        );

        Ok(summary)
    }

    /// Remove the expired images of one cam. `None` if anything failed; the index is left
    /// untouched unless every blob was deleted.
    async fn sweep_cam(&self, cam: &Cam, cutoff: Timestamp) -> Option<usize> {
        let expired: Vec<&str> = cam
            .images
            .iter()
            .filter(|i| i.time <= cutoff)
            .map(|i| i.url.as_str())
            .collect();

        if expired.is_empty() {
            return Some(0);
        }

        for key in expired {
            if let Err(e) = self.blobs.delete(key).await {
                tracing::error!(message = "unable to delete image", service = "cleanup", cam = %cam.label(), key = %key, error = %e);
                return None;
            }
        }

        match self.cams.prune_images(&cam.id, cutoff).await {
            Ok(removed) => Some(removed.len()),
            Err(e) => {
                tracing::error!(message = "unable to prune image index", service = "cleanup", cam = %cam.label(), error = %e);
                None
            }
        }
    }
}
