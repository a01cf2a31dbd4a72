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

//! Persistence of processed scrape outcomes.

use crate::bucket::Clock;
use crate::metrics::PipelineMetrics;
use crate::model::{Reading, SanitizedReading, Station, Timestamp};
use crate::store::{SnapshotUpdate, StationRepository, StoreError};
use std::sync::Arc;

/// Applies one scrape outcome to a station: snapshot fields plus the reading for a bucket.
///
/// The writer is the only place that clears the `is_offline` and `is_error` flags. Any wind
/// value clears `is_offline` and a complete set of values clears `is_error`.
#[derive(Clone)]
pub struct PersistenceWriter {
    stations: Arc<dyn StationRepository>,
    clock: Arc<dyn Clock>,
    metrics: Arc<PipelineMetrics>,
}

impl PersistenceWriter {
    pub fn new(stations: Arc<dyn StationRepository>, clock: Arc<dyn Clock>, metrics: Arc<PipelineMetrics>) -> Self {
        PersistenceWriter {
            stations,
            clock,
            metrics,
        }
    }

    /// Record `values` for `station` in `bucket`. All-null values are recorded too so that
    /// `last_update` reflects the attempt.
    pub async fn record(
        &self,
        station: &Station,
        values: SanitizedReading,
        bucket: Timestamp,
    ) -> Result<(), StoreError> {
        let update = SnapshotUpdate::new(self.clock.now(), values);
        self.stations
            .record_outcome(&station.id, Reading::new(bucket, values), update)
            .await?;

        self.metrics.reading_recorded(&station.source_type);
        Ok(())
    }
}
