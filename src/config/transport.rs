// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Configuration for the secure transport

use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::{FieldSchema, SchemaRegistry};
use crate::crypto::signing;
use crate::session::SessionSettings;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// One field-encryption schema as written in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaConfig {
    pub id: String,
    pub section: String,
    #[serde(default)]
    pub fields: Vec<String>,
}

/// Secure transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Path of the session handshake endpoint on every backend
    pub handshake_path: String,
    /// Request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Handshake timeout in milliseconds
    pub handshake_timeout_ms: u64,
    /// Sessions expiring within this many seconds are re-established early
    pub refresh_margin_secs: u64,
    /// Section whose signing key signs unencrypted requests
    pub default_signing_section: String,
    /// File holding the durable device id; in-memory when unset
    pub device_id_path: Option<String>,
    /// Timestamp acceptance window for signature verification
    pub max_clock_skew_ms: u64,
    /// Extra sections usable for full-payload encryption
    pub sections: Vec<String>,
    pub schemas: Vec<SchemaConfig>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            handshake_path: "/api/session/handshake".to_string(),
            request_timeout_ms: 30_000,
            handshake_timeout_ms: 10_000,
            refresh_margin_secs: 30,
            default_signing_section: "request".to_string(),
            device_id_path: None,
            max_clock_skew_ms: 300_000,
            sections: Vec::new(),
            schemas: Vec::new(),
        }
    }
}

impl TransportConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Defaults with `PORTAL_*` environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    /// Apply `PORTAL_*` overrides from an arbitrary lookup. Unparseable
    /// numbers are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(path) = lookup("PORTAL_HANDSHAKE_PATH") {
            self.handshake_path = path;
        }
        if let Some(ms) = number("PORTAL_REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = ms;
        }
        if let Some(ms) = number("PORTAL_HANDSHAKE_TIMEOUT_MS") {
            self.handshake_timeout_ms = ms;
        }
        if let Some(secs) = number("PORTAL_REFRESH_MARGIN_SECS") {
            self.refresh_margin_secs = secs;
        }
        if let Some(path) = lookup("PORTAL_DEVICE_ID_PATH") {
            self.device_id_path = Some(path);
        }
        if let Some(section) = lookup("PORTAL_SIGNING_SECTION") {
            self.default_signing_section = section;
        }
        if let Some(ms) = number("PORTAL_MAX_CLOCK_SKEW_MS") {
            self.max_clock_skew_ms = ms;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.request_timeout_ms == 0 {
            return Err("Request timeout must be greater than 0".to_string());
        }
        if self.handshake_timeout_ms == 0 {
            return Err("Handshake timeout must be greater than 0".to_string());
        }
        if self.max_clock_skew_ms == 0 {
            return Err("Max clock skew must be greater than 0".to_string());
        }
        if self.default_signing_section.trim().is_empty() {
            return Err("Default signing section must not be empty".to_string());
        }
        if !self.handshake_path.starts_with('/') {
            return Err(format!(
                "Handshake path '{}' must start with '/'",
                self.handshake_path
            ));
        }

        let mut seen = HashSet::new();
        for schema in &self.schemas {
            if !seen.insert(schema.id.as_str()) {
                return Err(format!("Duplicate schema id '{}'", schema.id));
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Whether a signed request timestamp falls inside the accepted skew
    /// window around `now_ms`
    pub fn is_timestamp_fresh(&self, timestamp_ms: u64, now_ms: u64) -> bool {
        signing::is_timestamp_fresh(timestamp_ms, now_ms, self.max_clock_skew_ms)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            refresh_margin: Duration::from_secs(self.refresh_margin_secs),
        }
    }

    /// Registry holding every configured schema and section plus the
    /// default signing section
    pub fn build_schema_registry(&self) -> Result<SchemaRegistry, ConfigError> {
        let mut registry = SchemaRegistry::new();
        for schema in &self.schemas {
            registry
                .register(FieldSchema::new(
                    schema.id.clone(),
                    schema.section.clone(),
                    schema.fields.iter().cloned(),
                ))
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        for section in self
            .sections
            .iter()
            .chain(std::iter::once(&self.default_signing_section))
        {
            registry
                .register_section(section.clone())
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        Ok(registry)
    }
}
