// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Purpose-scoped key derivation
//!
//! Turns one session secret into independent keys per `(section, purpose)`
//! pair using HKDF-SHA256. The application salt is fixed; the HKDF `info`
//! is `purpose label || 0x00 || section`, so no section name can collide
//! with another purpose's label.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use super::encryption::KEY_SIZE;
use super::error::{CryptoError, CryptoResult};

/// Application-level salt acting as the domain separator for all derived keys
pub const KDF_SALT: &[u8] = b"portal-transport/v1/key-derivation";

/// What a derived key is allowed to be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyPurpose {
    Encryption,
    Signing,
}

impl KeyPurpose {
    fn label(self) -> &'static [u8] {
        match self {
            KeyPurpose::Encryption => b"enc",
            KeyPurpose::Signing => b"sig",
        }
    }
}

/// Derive a 32-byte key for `section` and `purpose` from the session secret.
///
/// Deterministic for identical inputs, which is what lets the session
/// manager cache the result for the lifetime of a session.
pub fn derive(
    session_secret: &[u8],
    section: &str,
    purpose: KeyPurpose,
) -> CryptoResult<Zeroizing<[u8; KEY_SIZE]>> {
    if session_secret.is_empty() {
        return Err(CryptoError::KeyDerivationFailed {
            operation: "derive".to_string(),
            reason: "session secret is empty".to_string(),
        });
    }
    if section.is_empty() {
        return Err(CryptoError::KeyDerivationFailed {
            operation: "derive".to_string(),
            reason: "section must not be empty".to_string(),
        });
    }

    let label = purpose.label();
    let mut info = Vec::with_capacity(label.len() + 1 + section.len());
    info.extend_from_slice(label);
    info.push(0);
    info.extend_from_slice(section.as_bytes());

    let hkdf = Hkdf::<Sha256>::new(Some(KDF_SALT), session_secret);
    let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(&info, okm.as_mut())
        .map_err(|e| CryptoError::KeyDerivationFailed {
            operation: "hkdf_expand".to_string(),
            reason: e.to_string(),
        })?;

    Ok(okm)
}
