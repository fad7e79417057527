// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Transport Facade
//!
//! The one entry point the rest of the application calls. Per request:
//!
//! 1. ensure a live session for the endpoint
//! 2. borrow the section's derived keys from the session manager
//! 3. encode the body, then sign exactly the encoded bytes
//! 4. send under a timeout and cancellation token
//! 5. detect and decode an encrypted response
//!
//! The facade keeps no per-call state; session state lives in the
//! [`SessionRegistry`]'s managers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::{
    is_encrypted_response, parse_body, EncryptionOptions, PayloadCodec, ResponseEncryption,
    SchemaRegistry,
};
use crate::config::TransportConfig;
use crate::crypto::signing::{self, CANONICAL_DELIMITER};
use crate::error::TransportError;
use crate::session::{
    DerivedKeySet, DeviceIdStore, EncryptionSession, FileDeviceIdStore, MemoryDeviceIdStore,
    SessionError, SessionManager, SessionRegistry,
};

use super::headers;
use super::http::{HttpRequest, HttpTransport, ReqwestTransport};

/// Whether an outgoing request carried a signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningStatus {
    Signed,
    /// No session was available; the request went out unsigned
    Skipped,
}

impl SigningStatus {
    pub fn is_signed(self) -> bool {
        self == SigningStatus::Signed
    }
}

/// One outbound call
#[derive(Debug, Clone, PartialEq)]
pub struct SecureRequest {
    pub endpoint: String,
    pub method: String,
    /// Path plus query string, exactly as sent
    pub path: String,
    pub body: Option<Value>,
    pub encryption: Option<EncryptionOptions>,
    pub headers: Vec<(String, String)>,
}

impl SecureRequest {
    pub fn new(
        method: impl Into<String>,
        endpoint: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: method.into().to_ascii_uppercase(),
            path: path.into(),
            body: None,
            encryption: None,
            headers: Vec::new(),
        }
    }

    pub fn get(endpoint: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new("GET", endpoint, path)
    }

    pub fn post(endpoint: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new("POST", endpoint, path)
    }

    pub fn put(endpoint: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new("PUT", endpoint, path)
    }

    pub fn delete(endpoint: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new("DELETE", endpoint, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_encryption(mut self, options: EncryptionOptions) -> Self {
        self.encryption = Some(options);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn validate(&self) -> Result<(), TransportError> {
        if self.method.is_empty() || !self.method.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(TransportError::InvalidRequest(format!(
                "invalid method '{}'",
                self.method
            )));
        }
        if !self.path.starts_with('/') || self.path.contains(CANONICAL_DELIMITER) {
            return Err(TransportError::InvalidRequest(format!(
                "invalid path '{}'",
                self.path
            )));
        }
        Ok(())
    }
}

/// Decoded response
#[derive(Debug, Clone, PartialEq)]
pub struct SecureResponse {
    pub status: u16,
    /// Lower-cased header names
    pub headers: HashMap<String, String>,
    pub body: Value,
    pub signing: SigningStatus,
    /// True when any part of the body was decrypted
    pub decrypted: bool,
}

impl SecureResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Encoded, signed, ready to send
struct PreparedRequest {
    body: Option<Vec<u8>>,
    headers: Vec<(String, String)>,
    signing: SigningStatus,
    /// Keys the request was sent under, held until its response is decoded
    keys: Option<Arc<DerivedKeySet>>,
}

/// Replace any existing header of the same name (case-insensitive)
fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: impl Into<String>) {
    headers.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
    headers.push((name.to_string(), value.into()));
}

pub struct SecureTransport {
    registry: Arc<SessionRegistry>,
    http: Arc<dyn HttpTransport>,
    codec: PayloadCodec,
    request_timeout: Duration,
    default_signing_section: String,
}

impl SecureTransport {
    pub fn new(
        registry: Arc<SessionRegistry>,
        http: Arc<dyn HttpTransport>,
        schemas: Arc<SchemaRegistry>,
        config: &TransportConfig,
    ) -> Self {
        Self {
            registry,
            http,
            codec: PayloadCodec::new(schemas),
            request_timeout: config.request_timeout(),
            default_signing_section: config.default_signing_section.clone(),
        }
    }

    /// Build the full production stack from configuration
    pub fn from_config(config: &TransportConfig) -> Result<Self, TransportError> {
        config.validate().map_err(TransportError::Config)?;

        let device_id = match &config.device_id_path {
            Some(path) => FileDeviceIdStore::new(path).load_or_create()?,
            None => MemoryDeviceIdStore::new().load_or_create()?,
        };
        let http: Arc<dyn HttpTransport> =
            Arc::new(ReqwestTransport::new(config.request_timeout())?);
        let schemas = Arc::new(config.build_schema_registry()?);
        let registry = Arc::new(SessionRegistry::with_http(
            Arc::clone(&http),
            config.handshake_path.clone(),
            device_id,
            config.session_settings(),
        ));

        info!(
            "🔐 Secure transport ready ({} schemas, device {})",
            schemas.len(),
            registry.device_id()
        );
        Ok(Self::new(registry, http, schemas, config))
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn codec(&self) -> &PayloadCodec {
        &self.codec
    }

    pub fn session_manager(&self, endpoint: &str) -> Result<Arc<SessionManager>, TransportError> {
        Ok(self.registry.manager(endpoint)?)
    }

    /// Bind the endpoint's current session to an authenticated identity
    pub fn bind_to_user(
        &self,
        endpoint: &str,
        identity: &str,
    ) -> Result<Arc<EncryptionSession>, TransportError> {
        Ok(self.registry.manager(endpoint)?.bind_to_user(identity)?)
    }

    /// Discard the endpoint's session, e.g. on logout
    pub fn invalidate(&self, endpoint: &str) -> Result<(), TransportError> {
        self.registry.manager(endpoint)?.invalidate();
        Ok(())
    }

    pub async fn send(&self, request: SecureRequest) -> Result<SecureResponse, TransportError> {
        self.send_with_cancel(request, CancellationToken::new()).await
    }

    /// Send, abandoning the call as soon as `cancel` fires.
    ///
    /// Abandoning a call never leaves a half-established session behind.
    pub async fn send_with_cancel(
        &self,
        request: SecureRequest,
        cancel: CancellationToken,
    ) -> Result<SecureResponse, TransportError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("{} {} cancelled", request.method, request.path);
                Err(TransportError::Cancelled)
            }
            result = self.execute(&request) => result,
        }
    }

    async fn execute(&self, request: &SecureRequest) -> Result<SecureResponse, TransportError> {
        request.validate()?;
        let manager = self.registry.manager(&request.endpoint)?;
        let section = match &request.encryption {
            Some(options) => self.codec.section_for(options)?,
            None => self.default_signing_section.clone(),
        };

        let mut session = self.session_for(&manager, request).await?;
        let mut reensured = false;
        let prepared = loop {
            let Some(live) = &session else {
                break self.prepare_unsigned(request)?;
            };
            match self.prepare_signed(&manager, live, request, &section) {
                Err(TransportError::Session(SessionError::SessionExpired)) if !reensured => {
                    debug!(
                        "Session replaced while preparing {} {}, re-ensuring",
                        request.method, request.path
                    );
                    reensured = true;
                    session = self.session_for(&manager, request).await?;
                }
                other => break other?,
            }
        };

        let mut outgoing_headers = prepared.headers;
        set_header(&mut outgoing_headers, headers::DEVICE_ID, self.registry.device_id());
        if prepared.body.is_some() {
            set_header(&mut outgoing_headers, headers::CONTENT_TYPE, headers::JSON_CONTENT_TYPE);
        }

        let http_request = HttpRequest {
            method: request.method.clone(),
            url: format!("{}{}", manager.endpoint(), request.path),
            headers: outgoing_headers,
            body: prepared.body,
        };

        let timeout_ms = self.request_timeout.as_millis() as u64;
        let response = tokio::time::timeout(self.request_timeout, self.http.send(http_request))
            .await
            .map_err(|_| TransportError::Timeout { timeout_ms })??;

        let signal = ResponseEncryption::from_response(&response);
        let options = request.encryption.as_ref();
        let parsed = parse_body(&response.body);
        if options.is_none() && !is_encrypted_response(&signal, &parsed) {
            return Ok(SecureResponse {
                status: response.status,
                headers: response.headers,
                body: parsed,
                signing: prepared.signing,
                decrypted: false,
            });
        }

        // Decode with the keys of the session the request went out under,
        // even if another call has replaced that session meanwhile
        let keys = match (self.codec.response_section(options, &signal, &parsed)?, &session) {
            (Some(response_section), Some(live)) => match prepared.keys {
                Some(keys) if keys.section() == response_section => Some(keys),
                _ => Some(Arc::new(DerivedKeySet::derive(live, &response_section).map_err(
                    |e| SessionError::KeyDerivationFailed {
                        section: response_section.clone(),
                        reason: e.to_string(),
                    },
                )?)),
            },
            _ => None,
        };
        let decoded =
            self.codec
                .decode_response(&response.body, options, &signal, keys.as_deref())?;
        debug!(
            "{} {} -> {} (decrypted: {})",
            request.method, request.path, response.status, decoded.decrypted
        );

        Ok(SecureResponse {
            status: response.status,
            headers: response.headers,
            body: decoded.body,
            signing: prepared.signing,
            decrypted: decoded.decrypted,
        })
    }

    /// Encrypted calls need a session; plain calls degrade to unsigned
    async fn session_for(
        &self,
        manager: &SessionManager,
        request: &SecureRequest,
    ) -> Result<Option<Arc<EncryptionSession>>, TransportError> {
        match manager.ensure_session().await {
            Ok(session) => Ok(Some(session)),
            Err(e) if request.encryption.is_none() => {
                warn!(
                    "No session for {}, sending {} {} unsigned: {}",
                    manager.endpoint(),
                    request.method,
                    request.path,
                    e
                );
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn prepare_signed(
        &self,
        manager: &SessionManager,
        session: &EncryptionSession,
        request: &SecureRequest,
        section: &str,
    ) -> Result<PreparedRequest, TransportError> {
        let keys = manager.keys_for(session.session_id(), section)?;
        let encoded = self.codec.encode_request(
            request.body.as_ref(),
            request.encryption.as_ref(),
            Some(&keys),
        )?;

        let body_bytes = encoded.body.as_deref().unwrap_or_default();
        let envelope = signing::sign(
            &request.method,
            &request.path,
            body_bytes,
            keys.signing_key(),
        )?;

        let mut outgoing = request.headers.clone();
        for (name, value) in encoded.headers {
            set_header(&mut outgoing, &name, value);
        }
        set_header(&mut outgoing, headers::SESSION_ID, session.session_id());
        set_header(&mut outgoing, headers::TIMESTAMP, envelope.timestamp.to_string());
        set_header(&mut outgoing, headers::NONCE, envelope.nonce);
        set_header(&mut outgoing, headers::SIGNATURE, envelope.signature);

        Ok(PreparedRequest {
            body: encoded.body,
            headers: outgoing,
            signing: SigningStatus::Signed,
            keys: Some(keys),
        })
    }

    fn prepare_unsigned(&self, request: &SecureRequest) -> Result<PreparedRequest, TransportError> {
        let encoded = self
            .codec
            .encode_request(request.body.as_ref(), None, None)?;
        debug!("Signing skipped for {} {}", request.method, request.path);
        Ok(PreparedRequest {
            body: encoded.body,
            headers: request.headers.clone(),
            signing: SigningStatus::Skipped,
            keys: None,
        })
    }
}
