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

//! Offline and error classification for stations, with batched alerting.

use crate::bucket::Clock;
use crate::metrics::PipelineMetrics;
use crate::model::{Reading, Station, Timestamp};
use crate::store::{HealthMark, StationRepository, StoreError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_ALERT_THRESHOLD: usize = 2;

const DATA_STOPPED: &str = "ERROR: Data scraper has stopped.";
const NO_WIND: &str = "ERROR: No wind avg/gust data.";

#[derive(Debug, Clone)]
pub struct HealthSettings {
    /// How far back readings are considered.
    pub lookback: chrono::Duration,
    /// The latest reading must be at most this old for data to be flowing.
    pub freshness: chrono::Duration,
    /// A type escalates when more than this many of its stations go offline in one check.
    pub alert_threshold: usize,
    /// Types that escalate on any single newly offline station.
    pub always_alert: BTreeSet<String>,
}

impl Default for HealthSettings {
    fn default() -> Self {
        HealthSettings {
            lookback: chrono::Duration::hours(6),
            freshness: chrono::Duration::minutes(20),
            alert_threshold: DEFAULT_ALERT_THRESHOLD,
            always_alert: BTreeSet::from(["lpc".to_owned()]),
        }
    }
}

/// Result of the four independent checks over a station's recent readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldChecks {
    pub data_error: bool,
    pub wind_error: bool,
    pub bearing_error: bool,
    pub temp_error: bool,
}

impl FieldChecks {
    /// Evaluate `readings` (any order, already limited to the lookback window) at `now`.
    ///
    /// When data has stopped every other check fails as well.
    pub fn evaluate(readings: &[Reading], now: Timestamp, freshness: chrono::Duration) -> Self {
        let fresh = readings.iter().map(|r| r.time).max().map_or(false, |t| now - t <= freshness);
        if !fresh {
            return FieldChecks {
                data_error: true,
                wind_error: true,
                bearing_error: true,
                temp_error: true,
            };
        }

        FieldChecks {
            data_error: false,
            wind_error: !readings.iter().any(|r| r.has_wind()),
            bearing_error: readings.iter().all(|r| r.wind_bearing.is_none()),
            temp_error: readings.iter().all(|r| r.temperature.is_none()),
        }
    }

    pub fn is_offline(&self) -> bool {
        self.data_error || self.wind_error
    }

    pub fn is_error(&self) -> bool {
        self.data_error || self.wind_error || self.bearing_error || self.temp_error
    }

    fn reason(&self) -> Option<&'static str> {
        if self.data_error {
            Some(DATA_STOPPED)
        } else if self.wind_error {
            Some(NO_WIND)
        } else {
            None
        }
    }
}

/// A station that went offline during this check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OfflineNotice {
    pub station_id: String,
    pub source_type: String,
    pub name: String,
    pub external_link: String,
    pub reason: String,
}

impl OfflineNotice {
    fn new(station: &Station, checks: &FieldChecks) -> Self {
        OfflineNotice {
            station_id: station.id.clone(),
            source_type: station.source_type.clone(),
            name: station.name.clone(),
            external_link: station.external_link.clone(),
            reason: checks.reason().unwrap_or_default().to_owned(),
        }
    }

    pub fn message(&self) -> String {
        format!(
            "{}\nName: {}\nURL: {}\nDatabase ID: {}\n",
            self.reason, self.name, self.external_link, self.station_id
        )
    }
}

/// One batched notification covering every escalated type from a single check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub generated_at: Timestamp,
    pub groups: BTreeMap<String, Vec<OfflineNotice>>,
}

impl Alert {
    pub fn render(&self) -> String {
        let mut out = format!("Scheduled check ran successfully at {}\n", self.generated_at.to_rfc3339());
        for (source_type, notices) in &self.groups {
            let _ = write!(out, "\n{}\n\n", source_type.to_uppercase());
            let messages: Vec<String> = notices.iter().map(|n| n.message()).collect();
            out.push_str(&messages.join("\n"));
        }

        out
    }
}

/// Group newly offline stations by type and keep the types that should escalate.
///
/// Returns `None` when nothing escalates.
pub fn batch_alerts(notices: &[OfflineNotice], settings: &HealthSettings, now: Timestamp) -> Option<Alert> {
    let mut by_type: BTreeMap<String, Vec<OfflineNotice>> = BTreeMap::new();
    for n in notices {
        by_type.entry(n.source_type.clone()).or_default().push(n.clone());
    }

    by_type.retain(|t, group| settings.always_alert.contains(t) || group.len() > settings.alert_threshold);
    if by_type.is_empty() {
        None
    } else {
        Some(Alert {
            generated_at: now,
            groups: by_type,
        })
    }
}

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert delivery failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("alert endpoint returned {0}")]
    Status(StatusCode),
}

/// Destination for batched offline alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: &Alert) -> Result<(), AlertError>;
}

/// Writes alerts to the log only.
#[derive(Debug, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        tracing::warn!(message = "stations offline", service = "errors", alert = %alert.render());
        Ok(())
    }
}

/// Posts alerts as JSON `{"message": ..., "groups": ...}` to a webhook URL.
#[derive(Debug, Clone)]
pub struct WebhookAlertSink {
    client: Client,
    url: String,
}

impl WebhookAlertSink {
    pub fn new<S: Into<String>>(client: Client, url: S) -> Self {
        WebhookAlertSink { client, url: url.into() }
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    message: String,
    groups: &'a BTreeMap<String, Vec<OfflineNotice>>,
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        let payload = WebhookPayload {
            message: alert.render(),
            groups: &alert.groups,
        };

        let res = self.client.post(&self.url).json(&payload).send().await?;
        let status = res.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(AlertError::Status(status))
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub checked: usize,
    pub newly_offline: Vec<OfflineNotice>,
    pub newly_error: usize,
    pub alert: Option<Alert>,
}

/// Periodic check that marks stations offline or in error.
///
/// Flags are only ever set here, so each outage is reported once. They are cleared by
/// the persistence writer when usable data arrives again.
pub struct HealthMonitor {
    stations: Arc<dyn StationRepository>,
    sink: Arc<dyn AlertSink>,
    clock: Arc<dyn Clock>,
    metrics: Arc<PipelineMetrics>,
    settings: HealthSettings,
}

impl HealthMonitor {
    pub fn new(
        stations: Arc<dyn StationRepository>,
        sink: Arc<dyn AlertSink>,
        clock: Arc<dyn Clock>,
        metrics: Arc<PipelineMetrics>,
        settings: HealthSettings,
    ) -> Self {
        HealthMonitor {
            stations,
            sink,
            clock,
            metrics,
            settings,
        }
    }

    pub async fn check(&self) -> Result<HealthReport, StoreError> {
        let now = self.clock.now();
        let since = now - self.settings.lookback;
        let stations = self.stations.enabled_stations().await?;

        let mut report = HealthReport {
            checked: stations.len(),
            ..Default::default()
        };

        for station in stations {
            let readings = match self.stations.readings_since(&station.id, since).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!(message = "unable to load readings", service = "errors", station = %station.label(), error = %e);
                    continue;
                }
            };

            let checks = FieldChecks::evaluate(&readings, now, self.settings.freshness);
            let mark = HealthMark {
                offline: checks.is_offline() && !station.is_offline,
                error: checks.is_error() && !station.is_error,
            };

            if !mark.offline && !mark.error {
                continue;
            }

            if let Err(e) = self.stations.mark_health(&station.id, mark).await {
                tracing::error!(message = "unable to mark station health", service = "errors", station = %station.label(), error = %e);
                continue;
            }

            if mark.offline {
                self.metrics.newly_offline(&station.source_type);
                report.newly_offline.push(OfflineNotice::new(&station, &checks));
            }
            if mark.error {
                report.newly_error += 1;
            }
        }

        report.alert = batch_alerts(&report.newly_offline, &self.settings, now);
        if let Some(alert) = &report.alert {
            match self.sink.send(alert).await {
                Ok(()) => self.metrics.alert_sent(),
                Err(e) => tracing::error!(message = "unable to send alert", service = "errors", error = %e),
            }
        }

        tracing::info!(
            message = "checked for errors",
            service = "errors",
            checked = report.checked,
            newly_offline = report.newly_offline.len(),
            newly_error = report.newly_error,
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::{batch_alerts, FieldChecks, HealthSettings, OfflineNotice};
    use crate::model::Reading;
    use chrono::{Duration, TimeZone, Utc};

    fn reading(minutes_ago: i64, avg: Option<f64>, bearing: Option<f64>, temp: Option<f64>) -> Reading {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        Reading {
            time: now - Duration::minutes(minutes_ago),
            wind_average: avg,
            wind_gust: None,
            wind_bearing: bearing,
            temperature: temp,
        }
    }

    fn notice(source_type: &str, id: &str) -> OfflineNotice {
        OfflineNotice {
            station_id: id.to_owned(),
            source_type: source_type.to_owned(),
            name: format!("Station {}", id),
            external_link: format!("https://example.com/{}", id),
            reason: "ERROR: Data scraper has stopped.".to_owned(),
        }
    }

    #[test]
    fn test_no_readings_is_data_error() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let checks = FieldChecks::evaluate(&[], now, Duration::minutes(20));
        assert!(checks.data_error && checks.wind_error && checks.bearing_error && checks.temp_error);
        assert!(checks.is_offline());
    }

    #[test]
    fn test_stale_readings_are_data_error() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let checks = FieldChecks::evaluate(&[reading(30, Some(5.0), Some(90.0), Some(10.0))], now, Duration::minutes(20));
        assert!(checks.data_error);
    }

    #[test]
    fn test_freshness_boundary_is_inclusive() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let checks = FieldChecks::evaluate(&[reading(20, Some(5.0), Some(90.0), Some(10.0))], now, Duration::minutes(20));
        assert!(!checks.data_error);
        assert!(!checks.is_error());
    }

    #[test]
    fn test_field_checks_are_independent() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let readings = [reading(0, None, Some(90.0), None), reading(60, None, None, Some(11.0))];
        let checks = FieldChecks::evaluate(&readings, now, Duration::minutes(20));

        assert!(!checks.data_error);
        assert!(checks.wind_error);
        assert!(!checks.bearing_error);
        assert!(!checks.temp_error);
        assert!(checks.is_offline());
    }

    #[test]
    fn test_batch_alerts_threshold() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let settings = HealthSettings::default();

        let three = vec![notice("foo", "1"), notice("foo", "2"), notice("foo", "3")];
        let alert = batch_alerts(&three, &settings, now).unwrap();
        assert_eq!(vec!["foo"], alert.groups.keys().collect::<Vec<_>>());

        let two = vec![notice("foo", "1"), notice("foo", "2")];
        assert!(batch_alerts(&two, &settings, now).is_none());

        let allowlisted = vec![notice("lpc", "1"), notice("bar", "2")];
        let alert = batch_alerts(&allowlisted, &settings, now).unwrap();
        assert_eq!(vec!["lpc"], alert.groups.keys().collect::<Vec<_>>());
    }

    #[test]
    fn test_alert_render() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let alert = batch_alerts(&[notice("lpc", "7")], &HealthSettings::default(), now).unwrap();
        let text = alert.render();

        assert!(text.contains("\nLPC\n\n"));
        assert!(text.contains("ERROR: Data scraper has stopped.\nName: Station 7\nURL: https://example.com/7\nDatabase ID: 7\n"));
    }
}
