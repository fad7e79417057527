// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! In-process portal backend
//!
//! Speaks the handshake, verifies every signed request, decrypts encrypted
//! bodies and echoes the plaintext back encrypted the same way.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::{Duration, Utc};
use k256::{elliptic_curve::rand_core::OsRng, SecretKey};
use portal_secure_transport::codec::{
    EncryptionMode, EncryptionOptions, PayloadCodec, ResponseEncryption,
};
use portal_secure_transport::config::{SchemaConfig, TransportConfig};
use portal_secure_transport::crypto::signing::current_timestamp_ms;
use portal_secure_transport::crypto::{
    derive_session_secret, encode_public_key, verify_signature, SignedRequestEnvelope,
};
use portal_secure_transport::session::handshake::{HandshakeBody, HandshakeReply};
use portal_secure_transport::session::DerivedKeySet;
use portal_secure_transport::transport::headers as wire;
use portal_secure_transport::EncryptionSession;
use serde_json::{json, Value};

pub const FIELD_SCHEMA: &str = "patient-update";

/// Client configuration matching what the backend understands
pub fn client_config() -> TransportConfig {
    TransportConfig {
        sections: vec!["auth-login".to_string()],
        schemas: vec![SchemaConfig {
            id: FIELD_SCHEMA.to_string(),
            section: "health".to_string(),
            fields: vec!["ssn".to_string(), "allergies".to_string()],
        }],
        ..TransportConfig::default()
    }
}

pub struct BackendState {
    server_key: SecretKey,
    config: TransportConfig,
    secrets: Mutex<HashMap<String, Vec<u8>>>,
    codec: PayloadCodec,
    lifetime_secs: u64,
    pub fail_handshakes: AtomicBool,
    pub handshakes: AtomicUsize,
    pub verified: AtomicUsize,
    pub unsigned: AtomicUsize,
    pub stale: AtomicUsize,
    pub device_ids: Mutex<Vec<String>>,
    pub bound_identities: Mutex<Vec<Option<String>>>,
    pub last_plaintext: Mutex<Option<Value>>,
    pub last_wire_body: Mutex<Option<Value>>,
}

pub struct MockBackend {
    pub endpoint: String,
    pub state: Arc<BackendState>,
}

impl MockBackend {
    pub async fn start() -> Self {
        Self::start_with_lifetime(600).await
    }

    pub async fn start_with_lifetime(lifetime_secs: u64) -> Self {
        let config = client_config();
        let schemas = config.build_schema_registry().unwrap();
        let state = Arc::new(BackendState {
            server_key: SecretKey::random(&mut OsRng),
            config,
            secrets: Mutex::new(HashMap::new()),
            codec: PayloadCodec::new(Arc::new(schemas)),
            lifetime_secs,
            fail_handshakes: AtomicBool::new(false),
            handshakes: AtomicUsize::new(0),
            verified: AtomicUsize::new(0),
            unsigned: AtomicUsize::new(0),
            stale: AtomicUsize::new(0),
            device_ids: Mutex::new(Vec::new()),
            bound_identities: Mutex::new(Vec::new()),
            last_plaintext: Mutex::new(None),
            last_wire_body: Mutex::new(None),
        });

        let app = Router::new()
            .route("/api/session/handshake", post(handshake))
            .fallback(echo)
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            endpoint: format!("http://{}", addr),
            state,
        }
    }

    pub fn handshakes(&self) -> usize {
        self.state.handshakes.load(Ordering::SeqCst)
    }

    pub fn verified(&self) -> usize {
        self.state.verified.load(Ordering::SeqCst)
    }

    pub fn unsigned(&self) -> usize {
        self.state.unsigned.load(Ordering::SeqCst)
    }

    pub fn stale(&self) -> usize {
        self.state.stale.load(Ordering::SeqCst)
    }
}

async fn handshake(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Json(body): Json<HandshakeBody>,
) -> Response {
    if state.fail_handshakes.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, "maintenance").into_response();
    }

    let n = state.handshakes.fetch_add(1, Ordering::SeqCst) + 1;
    let session_id = format!("srv-{}", n);
    let client_key = match hex::decode(&body.client_public_key) {
        Ok(key) => key,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    let secret = match derive_session_secret(&state.server_key, &client_key, &session_id) {
        Ok(secret) => secret,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    state
        .secrets
        .lock()
        .unwrap()
        .insert(session_id.clone(), secret.to_vec());
    if let Some(device) = headers.get(wire::DEVICE_ID).and_then(|v| v.to_str().ok()) {
        state.device_ids.lock().unwrap().push(device.to_string());
    }
    state
        .bound_identities
        .lock()
        .unwrap()
        .push(body.bound_identity.clone());

    Json(HandshakeReply {
        session_id,
        server_public_key: encode_public_key(&state.server_key.public_key()),
        expires_in: state.lifetime_secs,
    })
    .into_response()
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn keys_for(state: &BackendState, session_id: &str, section: &str) -> Option<DerivedKeySet> {
    let secret = state.secrets.lock().unwrap().get(session_id).cloned()?;
    let now = Utc::now();
    let session = EncryptionSession::new(session_id, secret, now, now + Duration::hours(1));
    DerivedKeySet::derive(&session, section).ok()
}

async fn echo(
    State(state): State<Arc<BackendState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());
    let encrypted = wire::is_true(header(&headers, wire::ENCRYPTED));
    let section = header(&headers, wire::ENCRYPTION_SECTION)
        .unwrap_or("request")
        .to_string();

    let keys = match (
        header(&headers, wire::SIGNATURE),
        header(&headers, wire::SESSION_ID),
    ) {
        (Some(signature), Some(session_id)) => {
            let timestamp: u64 = header(&headers, wire::TIMESTAMP)
                .and_then(|t| t.parse().ok())
                .unwrap_or_default();
            if !state.config.is_timestamp_fresh(timestamp, current_timestamp_ms()) {
                state.stale.fetch_add(1, Ordering::SeqCst);
                return (StatusCode::UNAUTHORIZED, "stale timestamp").into_response();
            }
            let Some(keys) = keys_for(&state, session_id, &section) else {
                return StatusCode::UNAUTHORIZED.into_response();
            };
            let envelope = SignedRequestEnvelope {
                method: method.as_str().to_string(),
                path: path.clone(),
                timestamp,
                nonce: header(&headers, wire::NONCE).unwrap_or_default().to_string(),
                body_hash: String::new(),
                signature: signature.to_string(),
            };
            if verify_signature(&envelope, &body, keys.signing_key()).is_err() {
                return (StatusCode::UNAUTHORIZED, "bad signature").into_response();
            }
            state.verified.fetch_add(1, Ordering::SeqCst);
            Some(keys)
        }
        _ => {
            state.unsigned.fetch_add(1, Ordering::SeqCst);
            None
        }
    };

    *state.last_wire_body.lock().unwrap() = serde_json::from_slice(&body).ok();

    if !encrypted {
        let reply = json!({
            "method": method.as_str(),
            "path": path,
            "signed": keys.is_some(),
        });
        return Json(reply).into_response();
    }

    let Some(keys) = keys else {
        return (StatusCode::BAD_REQUEST, "encrypted request must be signed").into_response();
    };
    let mode = header(&headers, wire::ENCRYPTION_TYPE).and_then(EncryptionMode::from_header_value);
    let signal = ResponseEncryption {
        encrypted: true,
        mode,
        section: Some(section.clone()),
    };
    let plaintext = match state.codec.decode_response(&body, None, &signal, Some(&keys)) {
        Ok(decoded) => decoded.body,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    *state.last_plaintext.lock().unwrap() = Some(plaintext.clone());

    let options = match mode {
        Some(EncryptionMode::Full) => EncryptionOptions::full_payload(section),
        _ => EncryptionOptions::fields(FIELD_SCHEMA),
    };
    let encoded = match state
        .codec
        .encode_request(Some(&plaintext), Some(&options), Some(&keys))
    {
        Ok(encoded) => encoded,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(wire::CONTENT_TYPE, wire::JSON_CONTENT_TYPE);
    for (name, value) in encoded.headers {
        response = response.header(name, value);
    }
    response
        .body(Body::from(encoded.body.unwrap_or_default()))
        .unwrap()
}
