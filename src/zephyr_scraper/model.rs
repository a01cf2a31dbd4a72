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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Timestamp = DateTime<Utc>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

/// A single weather data source tracked by the pipeline.
///
/// Identity fields are managed elsewhere. The `current_*` fields, `last_update` and the
/// two health flags are the only things this crate ever mutates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Station {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub external_link: String,
    #[serde(default)]
    pub location: GeoPoint,
    #[serde(default)]
    pub elevation: Option<f64>,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default)]
    pub last_update: Option<Timestamp>,
    #[serde(default)]
    pub current_average: Option<f64>,
    #[serde(default)]
    pub current_gust: Option<f64>,
    #[serde(default)]
    pub current_bearing: Option<f64>,
    #[serde(default)]
    pub current_temperature: Option<f64>,
    #[serde(default)]
    pub is_offline: bool,
    #[serde(default)]
    pub is_error: bool,
}

impl Station {
    pub fn new<S1, S2, S3>(id: S1, name: S2, source_type: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Station {
            id: id.into(),
            name: name.into(),
            source_type: source_type.into(),
            external_id: None,
            external_link: String::new(),
            location: GeoPoint::default(),
            elevation: None,
            is_disabled: false,
            last_update: None,
            current_average: None,
            current_gust: None,
            current_bearing: None,
            current_temperature: None,
            is_offline: false,
            is_error: false,
        }
    }

    pub fn with_external_id<S: Into<String>>(mut self, external_id: S) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    /// Short label used in log lines, e.g. `weatherlink - 1234`
    pub fn label(&self) -> String {
        match &self.external_id {
            Some(id) => format!("{} - {}", self.source_type, id),
            None => self.source_type.clone(),
        }
    }
}

/// Values as returned by an adapter, before any range checks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    pub wind_average: Option<f64>,
    pub wind_gust: Option<f64>,
    pub wind_bearing: Option<f64>,
    pub temperature: Option<f64>,
}

/// Values that passed the sanitizer. Any field may be unknown independently of the others.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SanitizedReading {
    pub wind_average: Option<f64>,
    pub wind_gust: Option<f64>,
    pub wind_bearing: Option<f64>,
    pub temperature: Option<f64>,
}

impl SanitizedReading {
    pub fn has_wind(&self) -> bool {
        self.wind_average.is_some() || self.wind_gust.is_some()
    }

    pub fn is_complete(&self) -> bool {
        self.wind_average.is_some()
            && self.wind_gust.is_some()
            && self.wind_bearing.is_some()
            && self.temperature.is_some()
    }
}

/// One bucketed point of a station's time series.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub time: Timestamp,
    pub wind_average: Option<f64>,
    pub wind_gust: Option<f64>,
    pub wind_bearing: Option<f64>,
    pub temperature: Option<f64>,
}

impl Reading {
    pub fn new(time: Timestamp, values: SanitizedReading) -> Self {
        Reading {
            time,
            wind_average: values.wind_average,
            wind_gust: values.wind_gust,
            wind_bearing: values.wind_bearing,
            temperature: values.temperature,
        }
    }

    pub fn empty(time: Timestamp) -> Self {
        Self::new(time, SanitizedReading::default())
    }

    pub fn has_wind(&self) -> bool {
        self.wind_average.is_some() || self.wind_gust.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cam {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub cam_type: String,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub external_link: String,
    #[serde(default)]
    pub location: GeoPoint,
    #[serde(default)]
    pub last_update: Option<Timestamp>,
    #[serde(default)]
    pub current_time: Option<Timestamp>,
    #[serde(default)]
    pub current_url: Option<String>,
    #[serde(default)]
    pub images: Vec<CamImage>,
}

impl Cam {
    pub fn new<S1, S2, S3>(id: S1, name: S2, cam_type: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Cam {
            id: id.into(),
            name: name.into(),
            cam_type: cam_type.into(),
            external_id: None,
            external_link: String::new(),
            location: GeoPoint::default(),
            last_update: None,
            current_time: None,
            current_url: None,
            images: Vec::new(),
        }
    }

    pub fn with_external_id<S: Into<String>>(mut self, external_id: S) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn label(&self) -> String {
        match &self.external_id {
            Some(id) => format!("{} - {}", self.cam_type, id),
            None => self.cam_type.clone(),
        }
    }

    /// Most recently captured image, if any.
    pub fn latest_image(&self) -> Option<&CamImage> {
        self.images.iter().max_by_key(|i| i.time)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CamImage {
    pub time: Timestamp,
    pub url: String,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub hash: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sounding {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub location: GeoPoint,
    pub rasp_region: String,
    pub rasp_id: String,
    #[serde(default)]
    pub images: Vec<SoundingImage>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundingImage {
    pub time: Timestamp,
    pub url: String,
}
