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

//! Wiring from pipeline components to scheduled jobs.

use crate::adapter::cam::CamAdapters;
use crate::adapter::StationAdapters;
use crate::blob::BlobStore;
use crate::bucket::Clock;
use crate::config::{JobSchedules, PipelineConfig};
use crate::health::{AlertSink, HealthMonitor};
use crate::metrics::PipelineMetrics;
use crate::orchestrator::Orchestrator;
use crate::retention::RetentionSweeper;
use crate::scheduler::{Job, JobError, JobRegistry};
use crate::sounding::{ImageSource, SoundingJob};
use crate::store::{CamRepository, SoundingRepository, StationRepository};
use crate::webcam::WebcamPipeline;
use async_trait::async_trait;
use std::sync::Arc;

pub const STATION_JOB: &str = "station";
pub const MISS_JOB: &str = "miss";
pub const ERRORS_JOB: &str = "errors";
pub const CAM_JOB: &str = "cam";
pub const CLEANUP_JOB: &str = "cleanup";
pub const SOUNDING_JOB: &str = "sounding";

/// Shared dependencies handed to every job at startup.
#[derive(Clone)]
pub struct Dependencies {
    pub stations: Arc<dyn StationRepository>,
    pub cams: Arc<dyn CamRepository>,
    pub soundings: Arc<dyn SoundingRepository>,
    pub blobs: Arc<dyn BlobStore>,
    pub station_adapters: Arc<StationAdapters>,
    pub cam_adapters: Arc<CamAdapters>,
    pub images: Arc<dyn ImageSource>,
    pub alerts: Arc<dyn AlertSink>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<PipelineMetrics>,
}

pub struct StationJob(pub Orchestrator);

#[async_trait]
impl Job for StationJob {
    fn name(&self) -> &'static str {
        STATION_JOB
    }

    async fn run(&self) -> Result<(), JobError> {
        self.0.run().await?;
        Ok(())
    }
}

pub struct CatchUpJob(pub Orchestrator);

#[async_trait]
impl Job for CatchUpJob {
    fn name(&self) -> &'static str {
        MISS_JOB
    }

    async fn run(&self) -> Result<(), JobError> {
        self.0.rerun_missed().await?;
        Ok(())
    }
}

pub struct HealthJob(pub HealthMonitor);

#[async_trait]
impl Job for HealthJob {
    fn name(&self) -> &'static str {
        ERRORS_JOB
    }

    async fn run(&self) -> Result<(), JobError> {
        self.0.check().await?;
        Ok(())
    }
}

pub struct WebcamJob(pub WebcamPipeline);

#[async_trait]
impl Job for WebcamJob {
    fn name(&self) -> &'static str {
        CAM_JOB
    }

    async fn run(&self) -> Result<(), JobError> {
        self.0.run().await?;
        Ok(())
    }
}

pub struct CleanupJob(pub RetentionSweeper);

#[async_trait]
impl Job for CleanupJob {
    fn name(&self) -> &'static str {
        CLEANUP_JOB
    }

    async fn run(&self) -> Result<(), JobError> {
        self.0.sweep().await?;
        Ok(())
    }
}

pub struct SoundingRefreshJob(pub SoundingJob);

#[async_trait]
impl Job for SoundingRefreshJob {
    fn name(&self) -> &'static str {
        SOUNDING_JOB
    }

    async fn run(&self) -> Result<(), JobError> {
        self.0.run().await?;
        Ok(())
    }
}

/// Build the registry with every job on its schedule.
pub fn build_registry(deps: Dependencies, config: &PipelineConfig, schedules: JobSchedules) -> JobRegistry {
    let orchestrator = Orchestrator::new(
        deps.stations.clone(),
        deps.station_adapters.clone(),
        deps.clock.clone(),
        deps.metrics.clone(),
        config.orchestrator(),
    );
    let health = HealthMonitor::new(
        deps.stations.clone(),
        deps.alerts.clone(),
        deps.clock.clone(),
        deps.metrics.clone(),
        config.health.clone(),
    );
    let webcams = WebcamPipeline::new(
        deps.cams.clone(),
        deps.blobs.clone(),
        deps.cam_adapters.clone(),
        deps.clock.clone(),
        deps.metrics.clone(),
        config.webcam.clone(),
    );
    let sweeper = RetentionSweeper::new(
        deps.stations.clone(),
        deps.cams.clone(),
        deps.blobs.clone(),
        deps.clock.clone(),
        config.retention.clone(),
    );
    let soundings = SoundingJob::new(
        deps.soundings.clone(),
        deps.blobs.clone(),
        deps.images.clone(),
        deps.clock.clone(),
        config.sounding.clone(),
    );

    let mut registry = JobRegistry::new(deps.clock, deps.metrics);
    registry
        .register(schedules.station, Arc::new(StationJob(orchestrator.clone())))
        .register(schedules.miss, Arc::new(CatchUpJob(orchestrator)))
        .register(schedules.errors, Arc::new(HealthJob(health)))
        .register(schedules.cam, Arc::new(WebcamJob(webcams)))
        .register(schedules.cleanup, Arc::new(CleanupJob(sweeper)))
        .register(schedules.sounding, Arc::new(SoundingRefreshJob(soundings)));

    registry
}
