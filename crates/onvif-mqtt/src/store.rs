// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Persisted device overrides.
//!
//! The store is a single JSON document holding an array of device records.
//! Reads and writes replace the whole document.

use crate::device::DeviceRecord;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed device document {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Backend holding the persisted device set.
pub trait DeviceStore: Send + Sync {
    /// Load every persisted record.
    fn load(&self) -> Result<Vec<DeviceRecord>, StoreError>;

    /// Replace the persisted set.
    fn save(&self, records: &[DeviceRecord]) -> Result<(), StoreError>;
}

/// JSON file store (`cams.json`).
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Create a store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl DeviceStore for JsonFileStore {
    fn load(&self) -> Result<Vec<DeviceRecord>, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No device store yet, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(self.io_error(e)),
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&content).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, records: &[DeviceRecord]) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(records).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;

        // Write a sibling first so a crash never leaves a truncated document.
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, content).map_err(|e| self.io_error(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;

        tracing::debug!(
            path = %self.path.display(),
            "Persisted {} device records",
            records.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::new(dir.path().join("cams.json"));
        assert!(store.load().expect("load").is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::new(dir.path().join("cams.json"));

        let mut record = DeviceRecord::new("urn:uuid:1");
        record.invert_vertical = true;
        record.xaddrs = "http://10.0.0.2/onvif/device_service".into();
        store.save(&[record.clone()]).expect("save");

        let loaded = store.load().expect("load");
        assert_eq!(loaded, vec![record]);
        assert!(!dir.path().join("cams.json.tmp").exists());
    }

    #[test]
    fn test_malformed_document_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cams.json");
        std::fs::write(&path, "[{\"urn\": ").expect("write");

        let store = JsonFileStore::new(&path);
        assert!(matches!(store.load(), Err(StoreError::Json { .. })));
        // The broken document is left untouched for the operator.
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "[{\"urn\": ");
    }

    #[test]
    fn test_loads_camera_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cams.json");
        std::fs::write(
            &path,
            r#"[
  {
    "address": "192.168.1.20",
    "name": "C200",
    "hardware": "C200",
    "xaddrs": "http://192.168.1.20:2020/onvif/device_service",
    "urn": "uuid:3fa1fe68-b915-4053-a3e1-ac15a21f5f91",
    "invertVertical": true
  }
]"#,
        )
        .expect("write");

        let loaded = JsonFileStore::new(&path).load().expect("load");
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].invert_vertical);
        assert_eq!(loaded[0].name, "C200");
    }
}
