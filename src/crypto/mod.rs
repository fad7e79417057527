// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Cryptographic primitives for the secure transport
//!
//! - **ECDH**: secp256k1 key agreement used by the session handshake
//! - **KDF**: HKDF-SHA256 derivation of per-section encryption and signing keys
//! - **Encryption**: XChaCha20-Poly1305 AEAD for payload units
//! - **Signing**: HMAC-SHA256 over a canonical request string
//!
//! ## Security Considerations
//!
//! - Session secrets are held in memory only and zeroized on drop
//! - Every AEAD unit uses a fresh random 24-byte nonce
//! - Each request carries a fresh 16-byte nonce and a millisecond timestamp

pub mod ecdh;
pub mod encryption;
pub mod error;
pub mod kdf;
pub mod signing;

pub use ecdh::{derive_session_secret, encode_public_key, EphemeralKeypair};
pub use encryption::{decrypt_with_aead, encrypt_with_aead, open, seal, SealedUnit};
pub use error::{CryptoError, CryptoResult};
pub use kdf::{derive, KeyPurpose};
pub use signing::{
    body_hash, canonical_string, is_timestamp_fresh, sign, sign_at, verify_signature,
    SignedRequestEnvelope,
};
