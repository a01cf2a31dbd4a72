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

use crate::adapter::{fetch_bytes, AdapterError, AdapterRegistry};
use crate::model::{Cam, Timestamp};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;

/// Image fetched for a cam, with the capture time if the source reports one.
#[derive(Debug, Clone)]
pub struct CamFetch {
    pub captured_at: Option<Timestamp>,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait CamAdapter: Send + Sync {
    /// True when the source reports a capture time for each image. Such cams are deduplicated
    /// by comparing timestamps. All others are deduplicated by content hash.
    fn embeds_timestamp(&self) -> bool;

    async fn fetch(&self, cam: &Cam, now: Timestamp) -> Result<Option<CamFetch>, AdapterError>;
}

pub type CamAdapters = AdapterRegistry<dyn CamAdapter>;

/// Registry with every built-in cam adapter.
pub fn cam_adapters(client: Client) -> CamAdapters {
    CamAdapters::new().with("url", Arc::new(LatestImageAdapter::new(client)))
}

/// Cams of type `url`, where the external identifier is a URL that always serves the most
/// recent image.
#[derive(Debug, Clone)]
pub struct LatestImageAdapter {
    client: Client,
}

impl LatestImageAdapter {
    pub fn new(client: Client) -> Self {
        LatestImageAdapter { client }
    }
}

#[async_trait]
impl CamAdapter for LatestImageAdapter {
    fn embeds_timestamp(&self) -> bool {
        false
    }

    async fn fetch(&self, cam: &Cam, _now: Timestamp) -> Result<Option<CamFetch>, AdapterError> {
        let url = cam
            .external_id
            .as_deref()
            .ok_or_else(|| AdapterError::MissingSourceId(cam.id.clone()))?;

        let bytes = fetch_bytes(&self.client, url).await?;
        if bytes.is_empty() {
            return Ok(None);
        }

        Ok(Some(CamFetch {
            captured_at: None,
            bytes,
        }))
    }
}
