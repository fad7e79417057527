// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Durable device identifier (`X-Device-Id`)
//!
//! The device id outlives every encryption session: it is generated once,
//! persisted, and reused on each process start. Sessions themselves are
//! memory-only.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum DeviceIdError {
    #[error("Failed to access device id file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Stored device id is invalid: {0}")]
    Invalid(String),
}

pub trait DeviceIdStore: Send + Sync {
    /// Return the persisted id, creating and persisting one on first use
    fn load_or_create(&self) -> Result<String, DeviceIdError>;
}

/// Device id kept in a small text file
pub struct FileDeviceIdStore {
    path: PathBuf,
}

impl FileDeviceIdStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> DeviceIdError {
        DeviceIdError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl DeviceIdStore for FileDeviceIdStore {
    fn load_or_create(&self) -> Result<String, DeviceIdError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let id = contents.trim();
                if id.is_empty() || id.contains(char::is_whitespace) || !id.is_ascii() {
                    return Err(DeviceIdError::Invalid(id.to_string()));
                }
                Ok(id.to_string())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
                }
                let id = Uuid::new_v4().to_string();
                fs::write(&self.path, &id).map_err(|e| self.io_error(e))?;
                info!("Generated new device id, stored at {}", self.path.display());
                Ok(id)
            }
            Err(e) => Err(self.io_error(e)),
        }
    }
}

/// Device id that lives only as long as the process
pub struct MemoryDeviceIdStore {
    id: String,
}

impl MemoryDeviceIdStore {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl Default for MemoryDeviceIdStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceIdStore for MemoryDeviceIdStore {
    fn load_or_create(&self) -> Result<String, DeviceIdError> {
        Ok(self.id.clone())
    }
}
