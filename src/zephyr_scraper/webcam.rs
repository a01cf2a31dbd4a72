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

//! Webcam image acquisition: fetch, skip unchanged images, resize and store.

use crate::adapter::cam::{CamAdapter, CamAdapters, CamFetch};
use crate::adapter::{AdapterError, DEFAULT_TIMEOUT};
use crate::blob::{BlobError, BlobStore};
use crate::bucket::Clock;
use crate::fanout::{bounded, partition_by_type, settle_groups, DEFAULT_CONCURRENCY};
use crate::metrics::PipelineMetrics;
use crate::model::{Cam, CamImage, Timestamp};
use crate::resize::{resize_to_width, OutputFormat, ResizeError, DEFAULT_WIDTH};
use crate::store::{CamRepository, StoreError};
use chrono::SecondsFormat;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{Instrument, Level};

#[derive(Debug, Clone)]
pub struct WebcamSettings {
    pub concurrency: usize,
    pub call_timeout: Duration,
    pub width: u32,
}

impl Default for WebcamSettings {
    fn default() -> Self {
        WebcamSettings {
            concurrency: DEFAULT_CONCURRENCY,
            call_timeout: DEFAULT_TIMEOUT,
            width: DEFAULT_WIDTH,
        }
    }
}

#[derive(Debug, Error)]
pub enum WebcamError {
    #[error(transparent)]
    Resize(#[from] ResizeError),

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("resize task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Blob key for a cam image captured at `time`.
pub fn image_key(cam: &Cam, time: Timestamp) -> String {
    format!(
        "cams/{}/{}/{}.{}",
        cam.cam_type,
        cam.id,
        time.to_rfc3339_opts(SecondsFormat::Millis, true),
        OutputFormat::Jpeg.extension()
    )
}

/// Hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CamOutcome {
    Stored,
    Skipped,
    Failed,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WebcamSummary {
    pub stored: usize,
    pub skipped: usize,
    pub failed: usize,
    pub group_failures: Vec<String>,
}

pub struct WebcamPipeline {
    cams: Arc<dyn CamRepository>,
    blobs: Arc<dyn BlobStore>,
    adapters: Arc<CamAdapters>,
    clock: Arc<dyn Clock>,
    metrics: Arc<PipelineMetrics>,
    settings: WebcamSettings,
}

impl WebcamPipeline {
    pub fn new(
        cams: Arc<dyn CamRepository>,
        blobs: Arc<dyn BlobStore>,
        adapters: Arc<CamAdapters>,
        clock: Arc<dyn Clock>,
        metrics: Arc<PipelineMetrics>,
        settings: WebcamSettings,
    ) -> Self {
        WebcamPipeline {
            cams,
            blobs,
            adapters,
            clock,
            metrics,
            settings,
        }
    }

    pub async fn run(&self) -> Result<WebcamSummary, StoreError> {
        let cams = self.cams.cams().await?;
        if cams.is_empty() {
            tracing::warn!(message = "no webcams found", service = "cam");
            return Ok(WebcamSummary::default());
        }

        let groups = partition_by_type(cams, |c| c.cam_type.as_str());
        let results = settle_groups(groups, |cam_type, cams| {
            let group = CamGroup {
                adapter: self.adapters.get(&cam_type),
                cams: self.cams.clone(),
                blobs: self.blobs.clone(),
                clock: self.clock.clone(),
                metrics: self.metrics.clone(),
                settings: self.settings.clone(),
            };
            let span = tracing::span!(Level::INFO, "cam_group", cam_type = %cam_type);
            async move { group.run(cam_type, cams).await }.instrument(span)
        })
        .await;

        let mut summary = WebcamSummary::default();
        for (cam_type, res) in results {
            match res {
                Ok(Some(outcomes)) => {
                    for outcome in outcomes {
                        match outcome {
                            CamOutcome::Stored => summary.stored += 1,
                            CamOutcome::Skipped => summary.skipped += 1,
                            CamOutcome::Failed => summary.failed += 1,
                        }
                    }
                }
                Ok(None) => {
                    tracing::error!(message = "no adapter registered for cam type", service = "cam", cam_type = %cam_type);
                    self.metrics.group_failure(&cam_type);
                    summary.group_failures.push(cam_type);
                }
                Err(e) => {
                    tracing::error!(message = "cam group failed", service = "cam", cam_type = %cam_type, error = %e);
                    self.metrics.group_failure(&cam_type);
                    summary.group_failures.push(cam_type);
                }
            }
        }

        tracing::info!(
            message = "webcam run complete",
            service = "cam",
            stored = summary.stored,
            skipped = summary.skipped,
            failed = summary.failed,
        );

        Ok(summary)
    }
}

struct CamGroup {
    adapter: Option<Arc<dyn CamAdapter>>,
    cams: Arc<dyn CamRepository>,
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<PipelineMetrics>,
    settings: WebcamSettings,
}

impl CamGroup {
    /// `None` when the type has no adapter.
    async fn run(self, _cam_type: String, cams: Vec<Cam>) -> Option<Vec<CamOutcome>> {
        let adapter = self.adapter.clone()?;
        let this = &self;
        Some(
            bounded(cams, self.settings.concurrency, |cam| {
                let adapter = adapter.clone();
                async move { this.process(adapter.as_ref(), &cam).await }
            })
            .await,
        )
    }

    async fn process(&self, adapter: &dyn CamAdapter, cam: &Cam) -> CamOutcome {
        let now = self.clock.now();
        let fetched = tokio::time::timeout(self.settings.call_timeout, adapter.fetch(cam, now))
            .await
            .unwrap_or(Err(AdapterError::Timeout));

        let fetch = match fetched {
            Ok(Some(f)) => f,
            Ok(None) => return self.skipped(cam),
            Err(e) => {
                tracing::warn!(message = "unable to fetch image", service = "cam", cam = %cam.label(), error = %e);
                self.metrics.adapter_failure(&cam.cam_type);
                return CamOutcome::Failed;
            }
        };

        let hash = content_hash(&fetch.bytes);
        let file_size = fetch.bytes.len() as u64;

        let captured = if adapter.embeds_timestamp() {
            match fetch.captured_at {
                Some(t) if cam.last_update.map_or(true, |last| t > last) => t,
                _ => return self.skipped(cam),
            }
        } else {
            let unchanged = cam
                .latest_image()
                .map_or(false, |i| i.hash.as_deref() == Some(hash.as_str()) && i.file_size == Some(file_size));
            if unchanged {
                return self.skipped(cam);
            }
            fetch.captured_at.unwrap_or(now)
        };

        let image = CamImage {
            time: captured,
            url: image_key(cam, captured),
            file_size: Some(file_size),
            hash: Some(hash),
        };

        match self.store(cam, fetch, image, now).await {
            Ok(()) => {
                tracing::info!(message = "image updated", service = "cam", cam = %cam.label());
                self.metrics.cam_image_stored(&cam.cam_type);
                CamOutcome::Stored
            }
            Err(e) => {
                tracing::error!(message = "unable to save image", service = "cam", cam = %cam.label(), error = %e);
                CamOutcome::Failed
            }
        }
    }

    async fn store(&self, cam: &Cam, fetch: CamFetch, image: CamImage, now: Timestamp) -> Result<(), WebcamError> {
        let width = self.settings.width;
        let resized =
            tokio::task::spawn_blocking(move || resize_to_width(&fetch.bytes, width, OutputFormat::Jpeg)).await??;

        self.blobs.put(&image.url, resized).await?;
        self.cams.append_image(&cam.id, image, now).await?;
        Ok(())
    }

    fn skipped(&self, cam: &Cam) -> CamOutcome {
        tracing::info!(message = "image update skipped", service = "cam", cam = %cam.label());
        self.metrics.cam_image_skipped(&cam.cam_type);
        CamOutcome::Skipped
    }
}

#[cfg(test)]
mod tests {
    use super::{content_hash, image_key};
    use crate::model::Cam;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_image_key() {
        let cam = Cam::new("c1", "Cam 1", "url");
        let time = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!("cams/url/c1/2024-03-01T12:30:00.000Z.jpg", image_key(&cam, time));
    }

    #[test]
    fn test_content_hash() {
        assert_eq!(
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
            content_hash(b"")
        );
        assert_ne!(content_hash(b"a"), content_hash(b"b"));
    }
}
