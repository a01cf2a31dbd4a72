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

use crate::adapter::{fetch_bytes, lenient_f64, Adapter, AdapterError};
use crate::model::{RawReading, Station};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

const BASE_URL: &str = "https://www.weatherlink.com/embeddablePage/getData";

/// Stations of type `weatherlink`, keyed by the embeddable page identifier.
///
/// The embeddable page reports an average wind speed, direction and temperature but no gust.
#[derive(Debug, Clone)]
pub struct WeatherlinkAdapter {
    client: Client,
    base_url: String,
}

impl WeatherlinkAdapter {
    pub fn new(client: Client) -> Self {
        Self::with_base_url(client, BASE_URL)
    }

    pub fn with_base_url<S: Into<String>>(client: Client, base_url: S) -> Self {
        WeatherlinkAdapter {
            client,
            base_url: base_url.into(),
        }
    }
}

/// Parse the embeddable page JSON. A body of `null` means the station has nothing to report.
pub fn parse_page(body: &[u8]) -> Result<Option<RawReading>, AdapterError> {
    let data: Value = serde_json::from_slice(body).map_err(|e| AdapterError::Parse(e.to_string()))?;
    if data.is_null() {
        return Ok(None);
    }

    Ok(Some(RawReading {
        wind_average: lenient_f64(&data["wind"]),
        wind_gust: None,
        wind_bearing: lenient_f64(&data["windDirection"]),
        temperature: lenient_f64(&data["temperature"]),
    }))
}

#[async_trait]
impl Adapter for WeatherlinkAdapter {
    async fn fetch(&self, station: &Station) -> Result<Option<RawReading>, AdapterError> {
        let id = station
            .external_id
            .as_deref()
            .ok_or_else(|| AdapterError::MissingSourceId(station.id.clone()))?;

        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), id);
        tracing::debug!(message = "making weatherlink request", url = %url);

        let body = fetch_bytes(&self.client, &url).await?;
        parse_page(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::parse_page;
    use crate::adapter::AdapterError;

    #[test]
    fn test_parse_page() {
        let body = br#"{"wind": "12.4", "windDirection": 270, "temperature": 14.1, "humidity": 80}"#;
        let raw = parse_page(body).unwrap().unwrap();

        assert_eq!(Some(12.4), raw.wind_average);
        assert_eq!(None, raw.wind_gust);
        assert_eq!(Some(270.0), raw.wind_bearing);
        assert_eq!(Some(14.1), raw.temperature);
    }

    #[test]
    fn test_parse_page_missing_fields() {
        let raw = parse_page(br#"{"wind": "--"}"#).unwrap().unwrap();
        assert_eq!(None, raw.wind_average);
        assert_eq!(None, raw.temperature);
    }

    #[test]
    fn test_parse_page_null() {
        assert!(parse_page(b"null").unwrap().is_none());
    }

    #[test]
    fn test_parse_page_invalid() {
        assert!(matches!(parse_page(b"<html>"), Err(AdapterError::Parse(_))));
    }
}
