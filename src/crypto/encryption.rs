// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! XChaCha20-Poly1305 Encryption/Decryption
//!
//! Authenticated encryption for request and response payloads. Every call to
//! [`seal`] draws a fresh 24-byte nonce, so one derived key can protect any
//! number of units without nonce bookkeeping.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::{rngs::OsRng, RngCore};

use super::error::{CryptoError, CryptoResult};

/// Size of the symmetric key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of the XChaCha20 nonce in bytes
pub const NONCE_SIZE: usize = 24;

/// Size of the Poly1305 authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// One authenticated ciphertext unit, kept as its three parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedUnit {
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_SIZE],
}

/// Encrypt data using XChaCha20-Poly1305 AEAD
///
/// # Arguments
///
/// * `plaintext` - Data to encrypt
/// * `nonce` - 24-byte nonce (must be unique for this key)
/// * `aad` - Additional authenticated data (can be empty)
/// * `key` - 32-byte encryption key
///
/// # Returns
///
/// Encrypted ciphertext with the 16-byte authentication tag appended
pub fn encrypt_with_aead(
    plaintext: &[u8],
    nonce: &[u8],
    aad: &[u8],
    key: &[u8],
) -> CryptoResult<Vec<u8>> {
    // 1. Validate nonce size (24 bytes for XChaCha20)
    if nonce.len() != NONCE_SIZE {
        return Err(CryptoError::EncryptionFailed {
            reason: format!(
                "invalid nonce size: expected {} bytes, got {}",
                NONCE_SIZE,
                nonce.len()
            ),
        });
    }

    // 2. Create cipher instance (rejects keys that are not 32 bytes)
    let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::InvalidKey {
        key_type: "encryption_key".to_string(),
        reason: format!("expected {} bytes, got {}", KEY_SIZE, key.len()),
    })?;

    // 3. Encrypt and append authentication tag
    cipher
        .encrypt(XNonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|e| CryptoError::EncryptionFailed {
            reason: e.to_string(),
        })
}

/// Decrypt data using XChaCha20-Poly1305 AEAD
///
/// `ciphertext` must include the trailing authentication tag.
///
/// # Errors
///
/// Returns `DecryptionFailed` if the tag does not verify (tampered data,
/// wrong key or wrong AAD) or the nonce has the wrong size.
pub fn decrypt_with_aead(
    ciphertext: &[u8],
    nonce: &[u8],
    aad: &[u8],
    key: &[u8],
) -> CryptoResult<Vec<u8>> {
    if nonce.len() != NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed {
            reason: format!(
                "invalid nonce size: expected {} bytes, got {}",
                NONCE_SIZE,
                nonce.len()
            ),
        });
    }

    let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::InvalidKey {
        key_type: "encryption_key".to_string(),
        reason: format!("expected {} bytes, got {}", KEY_SIZE, key.len()),
    })?;

    let plaintext = cipher.decrypt(XNonce::from_slice(nonce), Payload { msg: ciphertext, aad })?;
    Ok(plaintext)
}

/// Encrypt `plaintext` under a fresh random nonce and split off the tag
pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8], aad: &[u8]) -> CryptoResult<SealedUnit> {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let mut combined = encrypt_with_aead(plaintext, &nonce, aad, key)?;
    let split_at = combined
        .len()
        .checked_sub(TAG_SIZE)
        .ok_or_else(|| CryptoError::EncryptionFailed {
            reason: "cipher output shorter than tag".to_string(),
        })?;
    let mut tag = [0u8; TAG_SIZE];
    tag.copy_from_slice(&combined[split_at..]);
    combined.truncate(split_at);

    Ok(SealedUnit {
        nonce,
        ciphertext: combined,
        tag,
    })
}

/// Verify and decrypt a [`SealedUnit`]
pub fn open(key: &[u8; KEY_SIZE], unit: &SealedUnit, aad: &[u8]) -> CryptoResult<Vec<u8>> {
    let mut combined = Vec::with_capacity(unit.ciphertext.len() + TAG_SIZE);
    combined.extend_from_slice(&unit.ciphertext);
    combined.extend_from_slice(&unit.tag);
    decrypt_with_aead(&combined, &unit.nonce, aad, key)
}
