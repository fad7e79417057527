// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! ECDH Key Agreement for the session handshake
//!
//! The client sends an ephemeral secp256k1 public key, the backend answers
//! with its own, and both sides run ECDH followed by HKDF-SHA256 (salted,
//! with the session id as `info`) to arrive at the same 32-byte session
//! secret. The secret itself never crosses the wire.

use hkdf::Hkdf;
use k256::{
    ecdh::EphemeralSecret,
    elliptic_curve::{rand_core::OsRng, sec1::ToEncodedPoint},
    PublicKey, SecretKey,
};
use sha2::Sha256;
use zeroize::Zeroizing;

use super::error::{CryptoError, CryptoResult};

/// Salt for turning the raw ECDH output into a session secret
pub const HANDSHAKE_SALT: &[u8] = b"portal-transport/v1/handshake";

/// Size of the derived session secret in bytes
pub const SESSION_SECRET_SIZE: usize = 32;

/// Client half of a handshake, used once and dropped
pub struct EphemeralKeypair {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl EphemeralKeypair {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Compressed SEC1 public key, hex-encoded for the handshake body
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public.to_encoded_point(true).as_bytes())
    }

    /// Complete the agreement against the backend's public key
    pub fn agree(
        &self,
        server_public_key: &[u8],
        session_id: &str,
    ) -> CryptoResult<Zeroizing<[u8; SESSION_SECRET_SIZE]>> {
        let peer = parse_public_key(server_public_key, "server_public_key")?;
        let shared = self.secret.diffie_hellman(&peer);
        expand_session_secret(shared.raw_secret_bytes().as_slice(), session_id)
    }
}

/// Backend side of the agreement.
///
/// Used by backends (and the in-process test backend) holding a static or
/// per-session secp256k1 key.
pub fn derive_session_secret(
    own_secret: &SecretKey,
    client_public_key: &[u8],
    session_id: &str,
) -> CryptoResult<Zeroizing<[u8; SESSION_SECRET_SIZE]>> {
    let peer = parse_public_key(client_public_key, "client_public_key")?;
    let shared = k256::ecdh::diffie_hellman(own_secret.to_nonzero_scalar(), peer.as_affine());
    expand_session_secret(shared.raw_secret_bytes().as_slice(), session_id)
}

/// Hex-encoded compressed SEC1 form of a public key
pub fn encode_public_key(public: &PublicKey) -> String {
    hex::encode(public.to_encoded_point(true).as_bytes())
}

fn parse_public_key(bytes: &[u8], key_type: &str) -> CryptoResult<PublicKey> {
    // Compressed (33 bytes) or uncompressed (65 bytes)
    if bytes.len() != 33 && bytes.len() != 65 {
        return Err(CryptoError::InvalidKey {
            key_type: key_type.to_string(),
            reason: format!("expected 33 or 65 bytes, got {}", bytes.len()),
        });
    }
    PublicKey::from_sec1_bytes(bytes).map_err(|e| CryptoError::InvalidKey {
        key_type: key_type.to_string(),
        reason: e.to_string(),
    })
}

fn expand_session_secret(
    shared: &[u8],
    session_id: &str,
) -> CryptoResult<Zeroizing<[u8; SESSION_SECRET_SIZE]>> {
    let hkdf = Hkdf::<Sha256>::new(Some(HANDSHAKE_SALT), shared);
    let mut secret = Zeroizing::new([0u8; SESSION_SECRET_SIZE]);
    hkdf.expand(session_id.as_bytes(), secret.as_mut())
        .map_err(|e| CryptoError::KeyDerivationFailed {
            operation: "handshake".to_string(),
            reason: e.to_string(),
        })?;
    Ok(secret)
}
