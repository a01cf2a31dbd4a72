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

//! Range checks applied to every adapter result before it is persisted.
//!
//! Each field is checked on its own. A value that is not finite or falls outside its
//! physical bound becomes unknown (`None`) while the other fields are kept as-is. Nothing
//! here is treated as an error: out of range values are common and expected from some
//! sources.

use crate::model::{RawReading, SanitizedReading};
use std::ops::RangeInclusive;

/// Bound for average and gust speeds, in km/h.
pub const SPEED_BOUNDS: RangeInclusive<f64> = 0.0..=500.0;

/// Bound for wind bearing, in degrees.
pub const BEARING_BOUNDS: RangeInclusive<f64> = 0.0..=360.0;

/// Bound for temperature, in degrees celsius.
pub const TEMPERATURE_BOUNDS: RangeInclusive<f64> = -40.0..=60.0;

pub fn sanitize(
    wind_average: Option<f64>,
    wind_gust: Option<f64>,
    wind_bearing: Option<f64>,
    temperature: Option<f64>,
) -> SanitizedReading {
    SanitizedReading {
        wind_average: bounded(wind_average, &SPEED_BOUNDS),
        wind_gust: bounded(wind_gust, &SPEED_BOUNDS),
        wind_bearing: bounded(wind_bearing, &BEARING_BOUNDS),
        temperature: bounded(temperature, &TEMPERATURE_BOUNDS),
    }
}

pub fn sanitize_reading(raw: &RawReading) -> SanitizedReading {
    sanitize(raw.wind_average, raw.wind_gust, raw.wind_bearing, raw.temperature)
}

fn bounded(value: Option<f64>, bounds: &RangeInclusive<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && bounds.contains(v))
}
