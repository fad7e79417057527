// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Endpoint-keyed registry of session managers
//!
//! Built once at application startup and shared by handle. Each backend
//! endpoint gets exactly one [`SessionManager`]; creating it is cheap and
//! performs no I/O.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;
use url::Url;

use super::error::SessionError;
use super::handshake::{Handshaker, HttpHandshaker};
use super::manager::{SessionManager, SessionSettings};
use crate::transport::http::HttpTransport;

/// Builds the handshaker used by a newly created manager
pub type HandshakerFactory = Arc<dyn Fn(&str) -> Arc<dyn Handshaker> + Send + Sync>;

pub struct SessionRegistry {
    managers: RwLock<HashMap<String, Arc<SessionManager>>>,
    device_id: String,
    settings: SessionSettings,
    handshakers: HandshakerFactory,
}

impl SessionRegistry {
    pub fn new(
        device_id: impl Into<String>,
        settings: SessionSettings,
        handshakers: HandshakerFactory,
    ) -> Self {
        Self {
            managers: RwLock::new(HashMap::new()),
            device_id: device_id.into(),
            settings,
            handshakers,
        }
    }

    /// Registry whose managers all handshake over `http` at `handshake_path`
    pub fn with_http(
        http: Arc<dyn HttpTransport>,
        handshake_path: impl Into<String>,
        device_id: impl Into<String>,
        settings: SessionSettings,
    ) -> Self {
        let handshake_path = handshake_path.into();
        let factory: HandshakerFactory = Arc::new(move |_endpoint: &str| {
            Arc::new(HttpHandshaker::new(Arc::clone(&http), handshake_path.clone()))
                as Arc<dyn Handshaker>
        });
        Self::new(device_id, settings, factory)
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// The manager for `endpoint`, created on first request
    pub fn manager(&self, endpoint: &str) -> Result<Arc<SessionManager>, SessionError> {
        let key = normalize_endpoint(endpoint)?;

        if let Some(existing) = self
            .managers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(Arc::clone(existing));
        }

        let mut managers = self.managers.write().unwrap_or_else(PoisonError::into_inner);
        let manager = managers.entry(key.clone()).or_insert_with(|| {
            info!("Created session manager for {}", key);
            Arc::new(SessionManager::new(
                key.clone(),
                self.device_id.clone(),
                (self.handshakers)(&key),
                self.settings,
            ))
        });
        Ok(Arc::clone(manager))
    }

    /// Endpoints with a manager, sorted
    pub fn endpoints(&self) -> Vec<String> {
        let mut endpoints: Vec<String> = self
            .managers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        endpoints.sort();
        endpoints
    }

    /// Invalidate every session, e.g. on logout
    pub fn invalidate_all(&self) {
        let managers = self.managers.read().unwrap_or_else(PoisonError::into_inner);
        for manager in managers.values() {
            manager.invalidate();
        }
    }
}

/// Validate an endpoint base URL and strip trailing slashes
pub fn normalize_endpoint(endpoint: &str) -> Result<String, SessionError> {
    let trimmed = endpoint.trim().trim_end_matches('/');
    let parsed =
        Url::parse(trimmed).map_err(|_| SessionError::InvalidEndpoint(endpoint.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(SessionError::InvalidEndpoint(endpoint.to_string()));
    }
    Ok(trimmed.to_string())
}
