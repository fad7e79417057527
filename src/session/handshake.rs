// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Session Handshake
//!
//! Establishes the shared session secret with a backend endpoint.
//!
//! ## Protocol Flow
//!
//! 1. Client generates an ephemeral secp256k1 keypair
//! 2. Client POSTs `{ deviceId, clientPublicKey, boundIdentity? }` to the handshake path
//! 3. Backend replies `{ sessionId, serverPublicKey, expiresIn }`
//! 4. Both sides derive the session secret via ECDH + HKDF-SHA256 (salted, `info = sessionId`)

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::SessionError;
use super::types::EncryptionSession;
use crate::crypto::EphemeralKeypair;
use crate::transport::headers;
use crate::transport::http::{HttpRequest, HttpTransport};

/// Inputs for one handshake attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub endpoint: String,
    pub device_id: String,
    /// Identity carried over from a previous session of this manager
    pub bound_identity: Option<String>,
}

/// Performs the network half of session establishment
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Handshaker: Send + Sync {
    async fn handshake(&self, request: &HandshakeRequest)
        -> Result<EncryptionSession, SessionError>;
}

/// Handshake request body (camelCase on the wire)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeBody {
    pub device_id: String,
    pub client_public_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bound_identity: Option<String>,
}

/// Handshake response body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeReply {
    pub session_id: String,
    pub server_public_key: String,
    /// Session lifetime in seconds
    pub expires_in: u64,
}

/// [`Handshaker`] speaking the JSON handshake over an [`HttpTransport`]
pub struct HttpHandshaker {
    http: Arc<dyn HttpTransport>,
    handshake_path: String,
}

impl HttpHandshaker {
    pub fn new(http: Arc<dyn HttpTransport>, handshake_path: impl Into<String>) -> Self {
        Self {
            http,
            handshake_path: handshake_path.into(),
        }
    }

    fn failed(endpoint: &str, reason: impl Into<String>) -> SessionError {
        SessionError::HandshakeFailed {
            endpoint: endpoint.to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Handshaker for HttpHandshaker {
    async fn handshake(
        &self,
        request: &HandshakeRequest,
    ) -> Result<EncryptionSession, SessionError> {
        let endpoint = request.endpoint.as_str();
        let keypair = EphemeralKeypair::generate();

        let body = HandshakeBody {
            device_id: request.device_id.clone(),
            client_public_key: keypair.public_key_hex(),
            bound_identity: request.bound_identity.clone(),
        };
        let body = serde_json::to_vec(&body)
            .map_err(|e| Self::failed(endpoint, format!("encode request: {}", e)))?;

        let http_request = HttpRequest {
            method: "POST".to_string(),
            url: format!("{}{}", endpoint, self.handshake_path),
            headers: vec![
                (
                    headers::CONTENT_TYPE.to_string(),
                    headers::JSON_CONTENT_TYPE.to_string(),
                ),
                (headers::DEVICE_ID.to_string(), request.device_id.clone()),
            ],
            body: Some(body),
        };

        let response = self
            .http
            .send(http_request)
            .await
            .map_err(|e| Self::failed(endpoint, e.to_string()))?;
        if !response.is_success() {
            return Err(Self::failed(
                endpoint,
                format!("backend returned status {}", response.status),
            ));
        }

        let reply: HandshakeReply = serde_json::from_slice(&response.body)
            .map_err(|e| Self::failed(endpoint, format!("malformed reply: {}", e)))?;
        if reply.session_id.is_empty() {
            return Err(Self::failed(endpoint, "empty session id"));
        }

        let server_key = hex::decode(
            reply
                .server_public_key
                .strip_prefix("0x")
                .unwrap_or(&reply.server_public_key),
        )
        .map_err(|e| Self::failed(endpoint, format!("server public key: {}", e)))?;
        let secret = keypair
            .agree(&server_key, &reply.session_id)
            .map_err(|e| Self::failed(endpoint, e.to_string()))?;

        if reply.expires_in == 0 {
            return Err(Self::failed(endpoint, "session issued with zero lifetime"));
        }
        let lifetime = i64::try_from(reply.expires_in)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| Self::failed(endpoint, "expiresIn out of range"))?;
        let now = Utc::now();
        debug!(
            "Handshake with {} issued session {} (expires in {}s)",
            endpoint, reply.session_id, reply.expires_in
        );

        Ok(EncryptionSession::new(
            reply.session_id,
            secret.to_vec(),
            now,
            now + lifetime,
        ))
    }
}
