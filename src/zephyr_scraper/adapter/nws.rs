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

use crate::adapter::{Adapter, AdapterError};
use crate::model::{RawReading, Station};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;
use std::error;
use std::fmt;

pub const DEFAULT_API_URL: &str = "https://api.weather.gov/";

const UNIT_KPH: &str = "wmoUnit:km_h-1";
const UNIT_METERS_PER_SECOND: &str = "wmoUnit:m_s-1";
const UNIT_DEGREES_C: &str = "wmoUnit:degC";
const UNIT_DEGREES_F: &str = "wmoUnit:degF";

#[derive(Debug)]
pub enum ClientError {
    Internal(reqwest::Error),
    InvalidUrl(String),
    InvalidStation(String),
    Unexpected(StatusCode, Url),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(e) => write!(f, "{}", e),
            Self::InvalidUrl(u) => write!(f, "invalid base URL {}", u),
            Self::InvalidStation(s) => write!(f, "invalid station {}", s),
            Self::Unexpected(status, url) => write!(f, "unexpected status {} for {}", status, url),
        }
    }
}

impl error::Error for ClientError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Internal(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ClientError> for AdapterError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Internal(e) => AdapterError::from(e),
            ClientError::Unexpected(status, url) => AdapterError::Status {
                status,
                url: url.to_string(),
            },
            e => AdapterError::Http(e.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WeatherGovClient {
    client: Client,
    base_url: Url,
}

impl WeatherGovClient {
    const JSON_RESPONSE: &'static str = "application/geo+json";

    pub fn new(client: Client, base_url: &str) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url).map_err(|_| ClientError::InvalidUrl(base_url.to_owned()))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }

        Ok(WeatherGovClient { client, base_url })
    }

    pub async fn observation(&self, station: &str) -> Result<Observation, ClientError> {
        let request_url = self.observation_url(station);
        tracing::debug!(message = "making latest observation request", url = %request_url);

        let res = self.make_request(station, request_url).await?;
        res.json::<Observation>().await.map_err(ClientError::Internal)
    }

    async fn make_request<S: Into<String>>(&self, station: S, url: Url) -> Result<Response, ClientError> {
        let res = self
            .client
            .get(url.clone())
            .header(ACCEPT, Self::JSON_RESPONSE)
            .send()
            .await
            .map_err(ClientError::Internal)?;

        let status = res.status();
        if status == StatusCode::OK {
            Ok(res)
        } else if status == StatusCode::NOT_FOUND {
            Err(ClientError::InvalidStation(station.into()))
        } else {
            Err(ClientError::Unexpected(status, url))
        }
    }

    fn observation_url(&self, station: &str) -> Url {
        let mut url = self.base_url.clone();
        // Segments are percent-encoded by push(). The base URL is checked to support
        // path segments on construction.
        if let Ok(mut p) = url.path_segments_mut() {
            p.clear()
                .push("stations")
                .push(station)
                .push("observations")
                .push("latest");
        }

        url
    }
}

#[derive(Deserialize, Debug)]
pub struct Observation {
    #[serde(alias = "id")]
    pub id: String,
    #[serde(alias = "properties")]
    pub properties: ObservationProperties,
}

#[derive(Deserialize, Debug)]
pub struct ObservationProperties {
    #[serde(alias = "station")]
    pub station: String,
    #[serde(alias = "timestamp")]
    pub timestamp: String,
    #[serde(alias = "temperature")]
    pub temperature: Measurement,
    #[serde(alias = "windDirection")]
    pub wind_direction: Measurement,
    #[serde(alias = "windSpeed")]
    pub wind_speed: Measurement,
    #[serde(alias = "windGust")]
    pub wind_gust: Measurement,
}

#[derive(Deserialize, Debug)]
pub struct Measurement {
    #[serde(alias = "unitCode")]
    pub unit_code: String,
    #[serde(alias = "value")]
    pub value: Option<f64>,
}

impl Measurement {
    /// Speed in km/h, if present and in a known unit.
    pub fn kph(&self) -> Option<f64> {
        match self.unit_code.as_str() {
            UNIT_KPH => self.value,
            UNIT_METERS_PER_SECOND => self.value.map(|v| v * 3.6),
            _ => None,
        }
    }

    /// Temperature in degrees celsius, if present and in a known unit.
    pub fn celsius(&self) -> Option<f64> {
        match self.unit_code.as_str() {
            UNIT_DEGREES_C => self.value,
            UNIT_DEGREES_F => self.value.map(|v| (v - 32.0) * 5.0 / 9.0),
            _ => None,
        }
    }
}

impl From<&Observation> for RawReading {
    fn from(obs: &Observation) -> Self {
        let p = &obs.properties;
        RawReading {
            wind_average: p.wind_speed.kph(),
            wind_gust: p.wind_gust.kph(),
            wind_bearing: p.wind_direction.value,
            temperature: p.temperature.celsius(),
        }
    }
}

/// Latest observation for stations of type `nws`, keyed by NWS station identifier (e.g. `KBOS`).
#[derive(Debug, Clone)]
pub struct NwsAdapter {
    client: WeatherGovClient,
}

impl NwsAdapter {
    pub fn new(client: WeatherGovClient) -> Self {
        NwsAdapter { client }
    }
}

#[async_trait]
impl Adapter for NwsAdapter {
    async fn fetch(&self, station: &Station) -> Result<Option<RawReading>, AdapterError> {
        let id = station
            .external_id
            .as_deref()
            .ok_or_else(|| AdapterError::MissingSourceId(station.id.clone()))?;

        match self.client.observation(id).await {
            Ok(obs) => {
                tracing::debug!(message = "fetched observation", observation = %obs.id, timestamp = %obs.properties.timestamp);
                Ok(Some(RawReading::from(&obs)))
            }
            // Unknown or retired station: reachable, nothing to report
            Err(ClientError::InvalidStation(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ClientError, Observation, WeatherGovClient};
    use crate::model::RawReading;
    use reqwest::Client;

    const OBSERVATION: &str = r#"{
        "id": "https://api.weather.gov/stations/KBOS/observations/2024-01-01T00:54:00+00:00",
        "type": "Feature",
        "properties": {
            "@id": "https://api.weather.gov/stations/KBOS/observations/2024-01-01T00:54:00+00:00",
            "station": "https://api.weather.gov/stations/KBOS",
            "timestamp": "2024-01-01T00:54:00+00:00",
            "temperature": {"unitCode": "wmoUnit:degC", "value": 3.3, "qualityControl": "V"},
            "windDirection": {"unitCode": "wmoUnit:degree_(angle)", "value": 250, "qualityControl": "V"},
            "windSpeed": {"unitCode": "wmoUnit:km_h-1", "value": 24.084, "qualityControl": "V"},
            "windGust": {"unitCode": "wmoUnit:m_s-1", "value": 10, "qualityControl": "Z"}
        }
    }"#;

    #[test]
    fn test_observation_to_reading() {
        let obs: Observation = serde_json::from_str(OBSERVATION).unwrap();
        let raw = RawReading::from(&obs);

        assert_eq!(Some(24.084), raw.wind_average);
        assert_eq!(Some(36.0), raw.wind_gust);
        assert_eq!(Some(250.0), raw.wind_bearing);
        assert_eq!(Some(3.3), raw.temperature);
    }

    #[test]
    fn test_observation_missing_values() {
        let json = OBSERVATION.replace("\"value\": 24.084", "\"value\": null");
        let obs: Observation = serde_json::from_str(&json).unwrap();
        assert_eq!(None, RawReading::from(&obs).wind_average);
    }

    #[test]
    fn test_observation_url() {
        let client = WeatherGovClient::new(Client::new(), "https://api.weather.gov/").unwrap();
        assert_eq!(
            "https://api.weather.gov/stations/K%20BOS/observations/latest",
            client.observation_url("K BOS").as_str()
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let res = WeatherGovClient::new(Client::new(), "mailto:someone@example.com");
        assert!(matches!(res, Err(ClientError::InvalidUrl(_))));

        let res = WeatherGovClient::new(Client::new(), "not a url");
        assert!(matches!(res, Err(ClientError::InvalidUrl(_))));
    }
}
