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

//! Station scrape runs partitioned by source type.

use crate::adapter::{Adapter, AdapterError, StationAdapters};
use crate::bucket::{floor_to_interval, Clock, DEFAULT_INTERVAL_MINUTES};
use crate::fanout::{bounded, partition_by_type, settle_groups, DEFAULT_CONCURRENCY};
use crate::metrics::PipelineMetrics;
use crate::model::{Station, Timestamp};
use crate::sanitize::sanitize_reading;
use crate::store::{StationRepository, StoreError};
use crate::writer::PersistenceWriter;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, Level};

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub interval_minutes: u32,
    pub concurrency: usize,
    pub call_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        OrchestratorSettings {
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
            concurrency: DEFAULT_CONCURRENCY,
            call_timeout: crate::adapter::DEFAULT_TIMEOUT,
        }
    }
}

/// Counts from a single orchestrator run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub groups: usize,
    pub recorded: usize,
    pub adapter_failures: usize,
    pub persistence_failures: usize,
    pub group_failures: Vec<String>,
}

impl RunSummary {
    fn merge(&mut self, group: GroupSummary) {
        self.recorded += group.recorded;
        self.adapter_failures += group.adapter_failures;
        self.persistence_failures += group.persistence_failures;
    }
}

#[derive(Debug, Default)]
struct GroupSummary {
    recorded: usize,
    adapter_failures: usize,
    persistence_failures: usize,
}

/// Runs every enabled station through its type's adapter and records the outcome.
///
/// Types run in parallel with one task each. Within a type at most `concurrency` adapter
/// calls are in flight. A failing station is recorded with no values, a failing type is
/// logged and skipped, and neither affects anything else in the run.
#[derive(Clone)]
pub struct Orchestrator {
    stations: Arc<dyn StationRepository>,
    adapters: Arc<StationAdapters>,
    writer: PersistenceWriter,
    clock: Arc<dyn Clock>,
    metrics: Arc<PipelineMetrics>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        stations: Arc<dyn StationRepository>,
        adapters: Arc<StationAdapters>,
        clock: Arc<dyn Clock>,
        metrics: Arc<PipelineMetrics>,
        settings: OrchestratorSettings,
    ) -> Self {
        let writer = PersistenceWriter::new(stations.clone(), clock.clone(), metrics.clone());
        Orchestrator {
            stations,
            adapters,
            writer,
            clock,
            metrics,
            settings,
        }
    }

    /// Scrape every enabled station.
    pub async fn run(&self) -> Result<RunSummary, StoreError> {
        let stations = self.stations.enabled_stations().await?;
        Ok(self.run_stations("station", stations).await)
    }

    /// Scrape only enabled stations whose latest reading is missing or older than one interval.
    pub async fn rerun_missed(&self) -> Result<RunSummary, StoreError> {
        let now = self.clock.now();
        let interval = chrono::Duration::minutes(i64::from(self.settings.interval_minutes.max(1)));

        let stale: Vec<Station> = self
            .stations
            .enabled_stations_with_latest()
            .await?
            .into_iter()
            .filter(|(_, latest)| latest.as_ref().map_or(true, |r| now - r.time > interval))
            .map(|(station, _)| station)
            .collect();

        if stale.is_empty() {
            tracing::info!(message = "data is up to date", service = "miss");
            return Ok(RunSummary::default());
        }

        tracing::info!(message = "rerunning stale stations", service = "miss", stations = stale.len());
        Ok(self.run_stations("miss", stale).await)
    }

    async fn run_stations(&self, service: &'static str, stations: Vec<Station>) -> RunSummary {
        // One bucket for the whole run, regardless of how long adapters take
        let bucket = floor_to_interval(self.clock.now(), self.settings.interval_minutes);
        let groups = partition_by_type(stations, |s| s.source_type.as_str());

        let mut summary = RunSummary {
            groups: groups.len(),
            ..Default::default()
        };

        let results = settle_groups(groups, |source_type, stations| {
            let group = GroupRun {
                adapter: self.adapters.get(&source_type),
                writer: self.writer.clone(),
                metrics: self.metrics.clone(),
                settings: self.settings.clone(),
                service,
                bucket,
            };
            let span = tracing::span!(Level::INFO, "station_group", service, source_type = %source_type);
            async move { group.run(source_type, stations).await }.instrument(span)
        })
        .await;

        for (source_type, res) in results {
            let failure = match res {
                Ok(Ok(group)) => {
                    summary.merge(group);
                    None
                }
                Ok(Err(e)) => Some(e.to_string()),
                Err(e) => Some(e.to_string()),
            };

            if let Some(error) = failure {
                tracing::error!(
                    message = "station group failed",
                    service,
                    source_type = %source_type,
                    error = %error,
                );
                self.metrics.group_failure(&source_type);
                summary.group_failures.push(source_type);
            }
        }

        tracing::info!(
            message = "station run complete",
            service,
            groups = summary.groups,
            recorded = summary.recorded,
            adapter_failures = summary.adapter_failures,
            persistence_failures = summary.persistence_failures,
            group_failures = summary.group_failures.len(),
        );

        summary
    }
}

#[derive(Debug, thiserror::Error)]
enum GroupError {
    #[error("no adapter registered for type {0}")]
    MissingAdapter(String),
}

struct GroupRun {
    adapter: Option<Arc<dyn Adapter>>,
    writer: PersistenceWriter,
    metrics: Arc<PipelineMetrics>,
    settings: OrchestratorSettings,
    service: &'static str,
    bucket: Timestamp,
}

impl GroupRun {
    async fn run(self, source_type: String, stations: Vec<Station>) -> Result<GroupSummary, GroupError> {
        let adapter = self
            .adapter
            .clone()
            .ok_or_else(|| GroupError::MissingAdapter(source_type.clone()))?;

        let outcomes = bounded(stations, self.settings.concurrency, |station| {
            let adapter = adapter.clone();
            let this = &self;
            async move { this.scrape(adapter.as_ref(), &station).await }
        })
        .await;

        let mut summary = GroupSummary::default();
        for (adapter_failed, persisted) in outcomes {
            if adapter_failed {
                summary.adapter_failures += 1;
            }
            if persisted {
                summary.recorded += 1;
            } else {
                summary.persistence_failures += 1;
            }
        }

        Ok(summary)
    }

    /// Fetch, sanitize and record one station. Returns whether the adapter failed and
    /// whether the outcome was persisted.
    async fn scrape(&self, adapter: &dyn Adapter, station: &Station) -> (bool, bool) {
        let fetched = tokio::time::timeout(self.settings.call_timeout, adapter.fetch(station))
            .await
            .unwrap_or(Err(AdapterError::Timeout));

        let (raw, adapter_failed) = match fetched {
            Ok(Some(raw)) => (raw, false),
            Ok(None) => {
                tracing::debug!(message = "no data from source", service = self.service, station = %station.label());
                (Default::default(), false)
            }
            Err(e) => {
                tracing::warn!(
                    message = "adapter failed, recording empty reading",
                    service = self.service,
                    station = %station.label(),
                    error = %e,
                );
                self.metrics.adapter_failure(&station.source_type);
                (Default::default(), true)
            }
        };

        let values = sanitize_reading(&raw);
        match self.writer.record(station, values, self.bucket).await {
            Ok(()) => (adapter_failed, true),
            Err(e) => {
                tracing::error!(
                    message = "failed to persist station update",
                    service = self.service,
                    station = %station.label(),
                    error = %e,
                );
                self.metrics.persistence_failure();
                (adapter_failed, false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Orchestrator, OrchestratorSettings};
    use crate::adapter::{Adapter, AdapterError, StationAdapters};
    use crate::bucket::ManualClock;
    use crate::memory::MemoryStore;
    use crate::metrics::PipelineMetrics;
    use crate::model::{RawReading, Station};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    struct Constant(f64);

    #[async_trait]
    impl Adapter for Constant {
        async fn fetch(&self, _station: &Station) -> Result<Option<RawReading>, AdapterError> {
            Ok(Some(RawReading {
                wind_average: Some(self.0),
                wind_gust: Some(self.0 + 5.0),
                wind_bearing: Some(180.0),
                temperature: Some(12.0),
            }))
        }
    }

    #[tokio::test]
    async fn test_run_uses_one_bucket() {
        let store = Arc::new(MemoryStore::new());
        store.insert_station(Station::new("a", "A", "fixed"));
        store.insert_station(Station::new("b", "B", "fixed"));

        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 7, 45).unwrap()));
        let adapters = StationAdapters::new().with("fixed", Arc::new(Constant(10.0)));
        let orchestrator = Orchestrator::new(
            store.clone(),
            Arc::new(adapters),
            clock,
            Arc::new(PipelineMetrics::detached()),
            OrchestratorSettings::default(),
        );

        let summary = orchestrator.run().await.unwrap();
        assert_eq!(1, summary.groups);
        assert_eq!(2, summary.recorded);

        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(expected, store.readings("a")[0].time);
        assert_eq!(expected, store.readings("b")[0].time);
    }
}
