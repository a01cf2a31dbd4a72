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

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;
use std::time::Duration;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SourceLabels {
    pub source_type: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CamLabels {
    pub cam_type: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct JobLabels {
    pub job: String,
}

fn job_duration_histogram() -> Histogram {
    Histogram::new(exponential_buckets(0.5, 2.0, 12))
}

/// Holder for metrics updated by the acquisition, health and webcam pipelines.
///
/// All metrics are created and registered upon call to `PipelineMetrics::new()`. Metrics
/// share the prefix "zephyr_" and per-source metrics carry a `source_type` or `cam_type`
/// label (e.g. `{source_type="weatherlink"}`).
#[derive(Debug)]
pub struct PipelineMetrics {
    readings_recorded: Family<SourceLabels, Counter>,
    adapter_failures: Family<SourceLabels, Counter>,
    group_failures: Family<SourceLabels, Counter>,
    persistence_failures: Counter,
    newly_offline: Family<SourceLabels, Counter>,
    alerts_sent: Counter,
    cam_images_stored: Family<CamLabels, Counter>,
    cam_images_skipped: Family<CamLabels, Counter>,
    job_runs: Family<JobLabels, Counter>,
    job_duration: Family<JobLabels, Histogram, fn() -> Histogram>,
}

impl PipelineMetrics {
    /// Create a new `PipelineMetrics` and register each metric with the provided `Registry`.
    pub fn new(reg: &mut Registry) -> Self {
        let readings_recorded = Family::<SourceLabels, Counter>::default();
        let adapter_failures = Family::<SourceLabels, Counter>::default();
        let group_failures = Family::<SourceLabels, Counter>::default();
        let persistence_failures = Counter::default();
        let newly_offline = Family::<SourceLabels, Counter>::default();
        let alerts_sent = Counter::default();
        let cam_images_stored = Family::<CamLabels, Counter>::default();
        let cam_images_skipped = Family::<CamLabels, Counter>::default();
        let job_runs = Family::<JobLabels, Counter>::default();
        let job_duration =
            Family::<JobLabels, Histogram, fn() -> Histogram>::new_with_constructor(job_duration_histogram);

        let reg = reg.sub_registry_with_prefix("zephyr");
        reg.register(
            "readings_recorded",
            "Readings written per source type",
            readings_recorded.clone(),
        );
        reg.register(
            "adapter_failures",
            "Adapter calls that failed or timed out per source type",
            adapter_failures.clone(),
        );
        reg.register(
            "group_failures",
            "Source type groups skipped for a run",
            group_failures.clone(),
        );
        reg.register(
            "persistence_failures",
            "Station updates that could not be persisted",
            persistence_failures.clone(),
        );
        reg.register(
            "stations_newly_offline",
            "Stations transitioned to offline per source type",
            newly_offline.clone(),
        );
        reg.register("alerts_sent", "Batched offline alerts delivered", alerts_sent.clone());
        reg.register(
            "cam_images_stored",
            "Webcam images stored per cam type",
            cam_images_stored.clone(),
        );
        reg.register(
            "cam_images_skipped",
            "Webcam fetches skipped as unchanged per cam type",
            cam_images_skipped.clone(),
        );
        reg.register("job_runs", "Scheduled job runs", job_runs.clone());
        reg.register(
            "job_duration_seconds",
            "Scheduled job run duration in seconds",
            job_duration.clone(),
        );

        Self {
            readings_recorded,
            adapter_failures,
            group_failures,
            persistence_failures,
            newly_offline,
            alerts_sent,
            cam_images_stored,
            cam_images_skipped,
            job_runs,
            job_duration,
        }
    }

    /// Metrics that are not exported anywhere.
    pub fn detached() -> Self {
        Self::new(&mut Registry::default())
    }

    pub fn reading_recorded(&self, source_type: &str) {
        self.readings_recorded.get_or_create(&source_labels(source_type)).inc();
    }

    pub fn adapter_failure(&self, source_type: &str) {
        self.adapter_failures.get_or_create(&source_labels(source_type)).inc();
    }

    pub fn group_failure(&self, source_type: &str) {
        self.group_failures.get_or_create(&source_labels(source_type)).inc();
    }

    pub fn persistence_failure(&self) {
        self.persistence_failures.inc();
    }

    pub fn newly_offline(&self, source_type: &str) {
        self.newly_offline.get_or_create(&source_labels(source_type)).inc();
    }

    pub fn alert_sent(&self) {
        self.alerts_sent.inc();
    }

    pub fn cam_image_stored(&self, cam_type: &str) {
        self.cam_images_stored.get_or_create(&cam_labels(cam_type)).inc();
    }

    pub fn cam_image_skipped(&self, cam_type: &str) {
        self.cam_images_skipped.get_or_create(&cam_labels(cam_type)).inc();
    }

    pub fn job_finished(&self, job: &str, elapsed: Duration) {
        let labels = JobLabels { job: job.to_owned() };
        self.job_runs.get_or_create(&labels).inc();
        self.job_duration.get_or_create(&labels).observe(elapsed.as_secs_f64());
    }

    pub fn readings_recorded_for(&self, source_type: &str) -> u64 {
        self.readings_recorded.get_or_create(&source_labels(source_type)).get()
    }

    pub fn adapter_failures_for(&self, source_type: &str) -> u64 {
        self.adapter_failures.get_or_create(&source_labels(source_type)).get()
    }

    pub fn group_failures_for(&self, source_type: &str) -> u64 {
        self.group_failures.get_or_create(&source_labels(source_type)).get()
    }
}

fn source_labels(source_type: &str) -> SourceLabels {
    SourceLabels {
        source_type: source_type.to_owned(),
    }
}

fn cam_labels(cam_type: &str) -> CamLabels {
    CamLabels {
        cam_type: cam_type.to_owned(),
    }
}
