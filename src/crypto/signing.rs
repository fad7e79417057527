// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Request Signing (HMAC-SHA256)
//!
//! Every outgoing request is bound to its method, path, a millisecond
//! timestamp, a fresh random nonce and the SHA-256 of the exact body bytes
//! sent on the wire. The canonical string is:
//!
//! ```text
//! METHOD \n path \n timestamp \n nonce \n hex(sha256(body))
//! ```
//!
//! Field order and the `\n` delimiter are part of the wire contract and must
//! match the backend verifier byte-for-byte.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

use super::error::{CryptoError, CryptoResult};

type HmacSha256 = Hmac<Sha256>;

/// Delimiter between canonical string components
pub const CANONICAL_DELIMITER: char = '\n';

/// Random bytes per request nonce (hex-encoded on the wire)
pub const SIGNING_NONCE_SIZE: usize = 16;

/// Everything needed to attach and later verify one request signature.
///
/// Lives only for the duration of a single outgoing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequestEnvelope {
    pub method: String,
    pub path: String,
    pub timestamp: u64,
    pub nonce: String,
    pub body_hash: String,
    /// Base64-encoded HMAC-SHA256 over the canonical string
    pub signature: String,
}

impl SignedRequestEnvelope {
    pub fn canonical_string(&self) -> String {
        canonical_string(
            &self.method,
            &self.path,
            self.timestamp,
            &self.nonce,
            &self.body_hash,
        )
    }
}

/// Hex-encoded SHA-256 of the request body (empty body hashes the empty string)
pub fn body_hash(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

pub fn canonical_string(
    method: &str,
    path: &str,
    timestamp: u64,
    nonce: &str,
    body_hash: &str,
) -> String {
    let d = CANONICAL_DELIMITER;
    format!(
        "{}{d}{path}{d}{timestamp}{d}{nonce}{d}{body_hash}",
        method.to_ascii_uppercase()
    )
}

/// Current time in milliseconds since the Unix epoch
pub fn current_timestamp_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Fresh hex-encoded request nonce
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; SIGNING_NONCE_SIZE];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Sign a request with the current time and a fresh nonce
pub fn sign(
    method: &str,
    path: &str,
    body: &[u8],
    signing_key: &[u8],
) -> CryptoResult<SignedRequestEnvelope> {
    sign_at(
        method,
        path,
        body,
        signing_key,
        current_timestamp_ms(),
        generate_nonce(),
    )
}

/// Sign with an explicit timestamp and nonce
pub fn sign_at(
    method: &str,
    path: &str,
    body: &[u8],
    signing_key: &[u8],
    timestamp: u64,
    nonce: String,
) -> CryptoResult<SignedRequestEnvelope> {
    for (field, value) in [("method", method), ("path", path), ("nonce", nonce.as_str())] {
        if value.contains(CANONICAL_DELIMITER) {
            return Err(CryptoError::InvalidEncoding {
                field: field.to_string(),
                reason: "contains the canonical delimiter".to_string(),
            });
        }
    }

    let body_hash = body_hash(body);
    let canonical = canonical_string(method, path, timestamp, &nonce, &body_hash);
    let mut mac = new_mac(signing_key)?;
    mac.update(canonical.as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());

    Ok(SignedRequestEnvelope {
        method: method.to_ascii_uppercase(),
        path: path.to_string(),
        timestamp,
        nonce,
        body_hash,
        signature,
    })
}

/// Verify a request signature against the body bytes actually received.
///
/// The body hash is recomputed from `body` rather than trusted from the
/// envelope. Comparison is constant-time.
pub fn verify_signature(
    envelope: &SignedRequestEnvelope,
    body: &[u8],
    signing_key: &[u8],
) -> CryptoResult<()> {
    let expected = STANDARD.decode(&envelope.signature)?;
    let canonical = canonical_string(
        &envelope.method,
        &envelope.path,
        envelope.timestamp,
        &envelope.nonce,
        &body_hash(body),
    );
    let mut mac = new_mac(signing_key)?;
    mac.update(canonical.as_bytes());
    mac.verify_slice(&expected)
        .map_err(|_| CryptoError::InvalidSignature)
}

/// Whether `timestamp_ms` lies within `max_skew_ms` of `now_ms` in either direction
pub fn is_timestamp_fresh(timestamp_ms: u64, now_ms: u64, max_skew_ms: u64) -> bool {
    timestamp_ms.abs_diff(now_ms) <= max_skew_ms
}

fn new_mac(signing_key: &[u8]) -> CryptoResult<HmacSha256> {
    if signing_key.is_empty() {
        return Err(CryptoError::InvalidKey {
            key_type: "signing_key".to_string(),
            reason: "empty key".to_string(),
        });
    }
    HmacSha256::new_from_slice(signing_key).map_err(|e| CryptoError::InvalidKey {
        key_type: "signing_key".to_string(),
        reason: e.to_string(),
    })
}
