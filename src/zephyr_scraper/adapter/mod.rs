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

//! Per source type fetch and parse routines.
//!
//! Each station or cam type has exactly one adapter, looked up by its type tag in an
//! [`AdapterRegistry`] built once at startup. A type with no registered adapter is
//! reported as a failure for that whole group rather than being silently skipped.

pub mod cam;
pub mod compass;
pub mod nws;
pub mod weatherlink;

use crate::model::{RawReading, Station};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const CLIENT_USER_AGENT: &str = concat!("zephyr_scraper/", env!("CARGO_PKG_VERSION"));

/// Errors that can occur when fetching data for a single station or cam.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("unexpected status {status} for {url}")]
    Status { status: StatusCode, url: String },

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request timed out")]
    Timeout,

    #[error("missing source identifier for {0}")]
    MissingSourceId(String),
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AdapterError::Timeout
        } else if err.is_connect() {
            AdapterError::Connection(err.to_string())
        } else if err.is_decode() {
            AdapterError::Parse(err.to_string())
        } else {
            AdapterError::Http(err.to_string())
        }
    }
}

/// Fetch the latest values for one station.
///
/// `Ok(None)` means the source was reachable but had nothing to report. Implementations must
/// not have side effects beyond the network call.
#[async_trait]
pub trait Adapter: Send + Sync {
    async fn fetch(&self, station: &Station) -> Result<Option<RawReading>, AdapterError>;
}

/// Mapping from a type tag to the adapter that handles it.
pub struct AdapterRegistry<A: ?Sized> {
    adapters: BTreeMap<String, Arc<A>>,
}

impl<A: ?Sized> AdapterRegistry<A> {
    pub fn new() -> Self {
        AdapterRegistry {
            adapters: BTreeMap::new(),
        }
    }

    pub fn register<S: Into<String>>(&mut self, type_tag: S, adapter: Arc<A>) -> &mut Self {
        self.adapters.insert(type_tag.into(), adapter);
        self
    }

    pub fn with<S: Into<String>>(mut self, type_tag: S, adapter: Arc<A>) -> Self {
        self.register(type_tag, adapter);
        self
    }

    pub fn get(&self, type_tag: &str) -> Option<Arc<A>> {
        self.adapters.get(type_tag).cloned()
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(|k| k.as_str())
    }
}

impl<A: ?Sized> Default for AdapterRegistry<A> {
    fn default() -> Self {
        Self::new()
    }
}

pub type StationAdapters = AdapterRegistry<dyn Adapter>;

/// Registry with every built-in station adapter, sharing one HTTP client.
pub fn station_adapters(client: Client, nws_api_url: &str) -> Result<StationAdapters, nws::ClientError> {
    let nws = nws::WeatherGovClient::new(client.clone(), nws_api_url)?;
    Ok(StationAdapters::new()
        .with("nws", Arc::new(nws::NwsAdapter::new(nws)))
        .with("weatherlink", Arc::new(weatherlink::WeatherlinkAdapter::new(client))))
}

/// HTTP client shared by every adapter: connection reuse plus a per-request timeout.
pub fn http_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

    Client::builder()
        .timeout(timeout)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .default_headers(headers)
        .build()
}

/// GET `url` and return the body, treating anything other than a 200 as an error.
pub async fn fetch_bytes(client: &Client, url: &str) -> Result<Vec<u8>, AdapterError> {
    let res = client.get(url).send().await?;
    let status = res.status();
    if status != StatusCode::OK {
        return Err(AdapterError::Status {
            status,
            url: url.to_owned(),
        });
    }

    Ok(res.bytes().await?.to_vec())
}

/// Interpret a JSON value as a number, accepting numeric strings. Anything else is unknown.
pub fn lenient_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{lenient_f64, Adapter, AdapterError, StationAdapters};
    use crate::model::{RawReading, Station};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    struct Fixed;

    #[async_trait]
    impl Adapter for Fixed {
        async fn fetch(&self, _station: &Station) -> Result<Option<RawReading>, AdapterError> {
            Ok(None)
        }
    }

    #[test]
    fn test_registry_lookup() {
        let registry = StationAdapters::new().with("fixed", Arc::new(Fixed));
        assert!(registry.get("fixed").is_some());
        assert!(registry.get("unknown").is_none());
        assert_eq!(vec!["fixed"], registry.types().collect::<Vec<_>>());
    }

    #[test]
    fn test_lenient_f64() {
        assert_eq!(Some(12.5), lenient_f64(&json!(12.5)));
        assert_eq!(Some(7.0), lenient_f64(&json!(" 7 ")));
        assert_eq!(None, lenient_f64(&json!("--")));
        assert_eq!(None, lenient_f64(&json!(null)));
        assert_eq!(None, lenient_f64(&json!({"value": 1})));
    }
}
