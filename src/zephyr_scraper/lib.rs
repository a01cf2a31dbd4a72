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

//! Weather station telemetry acquisition and health monitoring
//!
//! ## Features
//!
//! `zephyr_scraper` polls dozens of independently operated weather stations and webcams, each
//! through an adapter for its source type, and keeps a bounded time series of readings for
//! every station. The following jobs run on a fixed schedule.
//!
//! * `station` - Every 10 minutes. Fetch wind average, gust, bearing and temperature for every
//!   enabled station. Stations are grouped by source type and each type runs in parallel with
//!   at most 5 requests in flight. Values outside plausible ranges are dropped.
//! * `miss` - Several times an hour. Rerun only the stations whose latest reading is older
//!   than one interval.
//! * `errors` - Every 6 hours. Mark stations that stopped reporting (or report no wind) as
//!   offline, and stations missing any field as in error. Alerts are batched per type.
//! * `cam` - Every 10 minutes. Fetch webcam images, skip unchanged ones, resize and store.
//! * `cleanup` - Daily. Remove webcam images older than 24 hours and readings older than 30 days.
//! * `sounding` - Daily at 06:00 Pacific/Auckland. Replace RASP sounding images for the day.
//!
//! ## Usage
//!
//! ### Inventory
//!
//! Stations, webcams and soundings are read from a JSON inventory at startup and added to a
//! SQLite database. Entities already in the database keep their readings, health flags and
//! image index; only their identity fields are refreshed from the inventory.
//!
//! ```text
//! {
//!   "stations": [
//!     {"id": "s1", "name": "Logan Airport", "type": "nws", "externalId": "KBOS",
//!      "externalLink": "https://www.weather.gov/", "location": {"lon": -71.0, "lat": 42.36}}
//!   ],
//!   "cams": [
//!     {"id": "c1", "name": "Summit", "type": "url", "externalId": "https://example.com/cam.jpg"}
//!   ],
//!   "soundings": []
//! }
//! ```
//!
//! ### Run
//!
//! ```text
//! ./zephyr_scraper --inventory inventory.json --data-dir public --database zephyr.db
//! ```
//!
//! Readings older than 30 days are removed by default. Use `--reading-retention-days` to
//! change the horizon or `--keep-readings` to keep them forever.
//!
//! A single job can be run once, for example after changing the inventory.
//!
//! ```text
//! ./zephyr_scraper --inventory inventory.json --run-once station
//! ```
//!
//! ### Prometheus
//!
//! Prometheus metrics are exposed on port `9783` at `/metrics`. All metrics share the prefix
//! `zephyr_`, for example `zephyr_readings_recorded_total{source_type="nws"}`.
//!

pub mod adapter;
pub mod blob;
pub mod bucket;
pub mod config;
pub mod fanout;
pub mod health;
pub mod http;
pub mod jobs;
pub mod memory;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod resize;
pub mod retention;
pub mod sanitize;
pub mod schedule;
pub mod scheduler;
pub mod sounding;
pub mod sqlite;
pub mod store;
pub mod webcam;
pub mod writer;
