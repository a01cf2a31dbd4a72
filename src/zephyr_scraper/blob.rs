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

//! Storage for image blobs referenced by cam and sounding image entries.
//!
//! Keys are relative, `/` separated paths such as `cams/harvest/1234/2024-01-01T00:00:00Z.jpg`.
//! Deleting a key that does not exist succeeds so sweeps can be rerun after a partial failure.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("invalid blob key {0}")]
    InvalidKey(String),

    #[error("blob I/O error for {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), BlobError>;

    async fn delete(&self, key: &str) -> Result<(), BlobError>;

    /// Remove every blob under `prefix`.
    async fn delete_prefix(&self, prefix: &str) -> Result<(), BlobError>;
}

/// Blob store rooted at a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        FsBlobStore { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, BlobError> {
        let relative = Path::new(key);
        let valid = !key.is_empty() && relative.components().all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(BlobError::InvalidKey(key.to_owned()));
        }

        Ok(self.root.join(relative))
    }
}

fn io_error(key: &str, source: io::Error) -> BlobError {
    BlobError::Io {
        key: key.to_owned(),
        source,
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), BlobError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| io_error(key, e))?;
        }

        tokio::fs::write(&path, bytes).await.map_err(|e| io_error(key, e))
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(io_error(key, e)),
            _ => Ok(()),
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), BlobError> {
        let path = self.path_for(prefix)?;
        match tokio::fs::remove_dir_all(&path).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(io_error(prefix, e)),
            _ => Ok(()),
        }
    }
}

/// Blob store that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.lock().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.blobs.lock().keys().cloned().collect()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), BlobError> {
        self.blobs.lock().insert(key.to_owned(), bytes);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        self.blobs.lock().remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), BlobError> {
        let dir = format!("{}/", prefix.trim_end_matches('/'));
        self.blobs.lock().retain(|k, _| !k.starts_with(&dir));
        Ok(())
    }
}
