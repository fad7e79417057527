// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! End-to-end: real reqwest client against the in-process backend

use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures_util::future::join_all;
use portal_secure_transport::crypto::signing::current_timestamp_ms;
use portal_secure_transport::crypto::sign_at;
use portal_secure_transport::transport::headers as wire;
use portal_secure_transport::{
    EncryptionOptions, SecureRequest, SecureTransport, SessionError, SigningStatus,
    TransportError,
};
use serde_json::json;

use super::backend::{client_config, MockBackend, FIELD_SCHEMA};

fn transport() -> SecureTransport {
    SecureTransport::from_config(&client_config()).unwrap()
}

#[tokio::test]
async fn test_plain_request_signed_and_verified() {
    let backend = MockBackend::start().await;
    let transport = transport();

    let response = transport
        .send(SecureRequest::get(&backend.endpoint, "/api/appointments?day=2025-03-01"))
        .await
        .unwrap();

    assert!(response.is_success());
    assert_eq!(response.signing, SigningStatus::Signed);
    assert!(!response.decrypted);
    assert_eq!(response.body["signed"], json!(true));
    assert_eq!(response.body["path"], json!("/api/appointments?day=2025-03-01"));
    assert_eq!(backend.verified(), 1);
    assert_eq!(backend.handshakes(), 1);
}

#[tokio::test]
async fn test_field_encrypted_patient_update() {
    let backend = MockBackend::start().await;
    let transport = transport();
    let body = json!({"ssn": "123-45-6789", "name": "Ana", "allergies": "penicillin"});

    let response = transport
        .send(
            SecureRequest::put(&backend.endpoint, "/api/patients/7")
                .with_body(body.clone())
                .with_encryption(EncryptionOptions::fields(FIELD_SCHEMA)),
        )
        .await
        .unwrap();

    let wire = backend.state.last_wire_body.lock().unwrap().clone().unwrap();
    assert_eq!(wire["name"], json!("Ana"));
    assert!(wire["ssn"]["ciphertext"].is_string());
    assert!(wire["allergies"]["ciphertext"].is_string());

    let seen = backend.state.last_plaintext.lock().unwrap().clone();
    assert_eq!(seen, Some(body.clone()));

    assert!(response.decrypted);
    assert_eq!(response.header("x-encryption-type"), Some("field"));
    assert_eq!(response.body, body);
}

#[tokio::test]
async fn test_full_payload_login() {
    let backend = MockBackend::start().await;
    let transport = transport();
    let body = json!({"username": "ana@example.com", "password": "correct horse"});

    let response = transport
        .send(
            SecureRequest::post(&backend.endpoint, "/api/auth/login")
                .with_body(body.clone())
                .with_encryption(EncryptionOptions::full_payload("auth-login")),
        )
        .await
        .unwrap();

    let wire = backend.state.last_wire_body.lock().unwrap().clone().unwrap();
    assert_eq!(wire["encrypted"], json!(true));
    assert!(!wire.to_string().contains("correct horse"));

    assert!(response.decrypted);
    assert_eq!(response.body, body);
    assert_eq!(response.signing, SigningStatus::Signed);
}

#[tokio::test]
async fn test_concurrent_first_calls_handshake_once() {
    let backend = MockBackend::start().await;
    let transport = Arc::new(transport());

    let calls = (0..10).map(|i| {
        let transport = Arc::clone(&transport);
        let endpoint = backend.endpoint.clone();
        async move {
            transport
                .send(SecureRequest::get(endpoint, format!("/api/items/{}", i)))
                .await
        }
    });

    for result in join_all(calls).await {
        assert_eq!(result.unwrap().signing, SigningStatus::Signed);
    }
    assert_eq!(backend.handshakes(), 1);
    assert_eq!(backend.verified(), 10);
}

#[tokio::test]
async fn test_login_bind_and_logout() {
    let backend = MockBackend::start().await;
    let transport = transport();

    transport
        .send(
            SecureRequest::post(&backend.endpoint, "/api/auth/login")
                .with_body(json!({"username": "dr.lee", "password": "pw"}))
                .with_encryption(EncryptionOptions::full_payload("auth-login")),
        )
        .await
        .unwrap();

    let bound = transport.bind_to_user(&backend.endpoint, "doctor-17").unwrap();
    assert_eq!(bound.bound_identity(), Some("doctor-17"));
    assert!(matches!(
        transport.bind_to_user(&backend.endpoint, "doctor-18"),
        Err(TransportError::Session(
            SessionError::AlreadyBoundToDifferentIdentity { .. }
        ))
    ));

    transport.invalidate(&backend.endpoint).unwrap();
    transport
        .send(SecureRequest::get(&backend.endpoint, "/api/public/news"))
        .await
        .unwrap();

    assert_eq!(backend.handshakes(), 2);
    let identities = backend.state.bound_identities.lock().unwrap().clone();
    assert_eq!(identities, vec![None, None]);
}

#[tokio::test]
async fn test_device_id_stable_across_sessions() {
    let backend = MockBackend::start().await;
    let transport = transport();

    transport
        .send(SecureRequest::get(&backend.endpoint, "/a"))
        .await
        .unwrap();
    transport.invalidate(&backend.endpoint).unwrap();
    transport
        .send(SecureRequest::get(&backend.endpoint, "/b"))
        .await
        .unwrap();

    let devices = backend.state.device_ids.lock().unwrap().clone();
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0], devices[1]);
    assert_eq!(devices[0], transport.registry().device_id());
}

#[tokio::test]
async fn test_handshake_outage_degrades_plain_calls_only() {
    let backend = MockBackend::start().await;
    backend.state.fail_handshakes.store(true, Ordering::SeqCst);
    let transport = transport();

    let plain = transport
        .send(SecureRequest::get(&backend.endpoint, "/api/public/status"))
        .await
        .unwrap();
    assert_eq!(plain.signing, SigningStatus::Skipped);
    assert_eq!(plain.body["signed"], json!(false));
    assert_eq!(backend.unsigned(), 1);

    let err = transport
        .send(
            SecureRequest::put(&backend.endpoint, "/api/patients/7")
                .with_body(json!({"ssn": "123-45-6789"}))
                .with_encryption(EncryptionOptions::fields(FIELD_SCHEMA)),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TransportError::Session(SessionError::HandshakeFailed { .. })
    ));
    assert!(err.is_retryable());
    assert!(!err.is_integrity_violation());

    // Backend recovers; the manager is not wedged
    backend.state.fail_handshakes.store(false, Ordering::SeqCst);
    let recovered = transport
        .send(SecureRequest::get(&backend.endpoint, "/api/public/status"))
        .await
        .unwrap();
    assert_eq!(recovered.signing, SigningStatus::Signed);
}

#[tokio::test]
async fn test_unreachable_backend_is_network_error() {
    let transport = transport();
    let err = transport
        .send(
            SecureRequest::post("http://127.0.0.1:9", "/api/auth/login")
                .with_body(json!({"u": "x"}))
                .with_encryption(EncryptionOptions::full_payload("auth-login")),
        )
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_backend_rejects_timestamp_outside_clock_skew() {
    let backend = MockBackend::start().await;
    let transport = transport();
    transport
        .send(SecureRequest::get(&backend.endpoint, "/api/records"))
        .await
        .unwrap();

    let manager = transport.session_manager(&backend.endpoint).unwrap();
    let session = manager.current_session().unwrap();
    let keys = manager.keys_for(session.session_id(), "request").unwrap();
    let skew = client_config().max_clock_skew_ms;
    let client = reqwest::Client::new();

    let send_at = |timestamp: u64, nonce: &str| {
        let envelope = sign_at(
            "GET",
            "/api/records",
            b"",
            keys.signing_key(),
            timestamp,
            nonce.to_string(),
        )
        .unwrap();
        client
            .get(format!("{}/api/records", backend.endpoint))
            .header(wire::SESSION_ID, session.session_id())
            .header(wire::TIMESTAMP, envelope.timestamp.to_string())
            .header(wire::NONCE, envelope.nonce)
            .header(wire::SIGNATURE, envelope.signature)
            .send()
    };

    let stale = send_at(current_timestamp_ms() - skew - 60_000, "n-1")
        .await
        .unwrap();
    assert_eq!(stale.status(), reqwest::StatusCode::UNAUTHORIZED);
    assert_eq!(backend.stale(), 1);
    assert_eq!(backend.verified(), 1);

    let fresh = send_at(current_timestamp_ms(), "n-2").await.unwrap();
    assert!(fresh.status().is_success());
    assert_eq!(backend.stale(), 1);
    assert_eq!(backend.verified(), 2);
}
