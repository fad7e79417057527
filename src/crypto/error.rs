// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Crypto Error Types
//!
//! Error type shared by the low-level primitives (HKDF, AEAD, ECDH, HMAC).
//! Higher layers wrap these into `CodecError` or `SessionError` with the
//! field, section or endpoint that was being processed.
//!
//! ## Error Variants
//!
//! - **KeyDerivationFailed**: HKDF expansion or ECDH agreement failed
//! - **EncryptionFailed**: AEAD sealing failed
//! - **DecryptionFailed**: AEAD opening failed (wrong key, tampered data, AAD mismatch)
//! - **InvalidKey**: key has the wrong size or is not a valid curve point
//! - **InvalidEncoding**: hex/base64 input could not be decoded
//! - **InvalidSignature**: request MAC did not verify

use std::fmt;

/// Error type for all cryptographic operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key derivation failed (HKDF or ECDH)
    KeyDerivationFailed {
        /// Which derivation was being performed
        operation: String,
        /// Specific failure reason
        reason: String,
    },

    /// AEAD encryption failed
    EncryptionFailed {
        /// Specific failure reason
        reason: String,
    },

    /// AEAD decryption failed
    ///
    /// This error occurs when:
    /// - Authentication tag verification fails (ciphertext tampered or wrong key)
    /// - Nonce has the wrong size
    /// - AAD doesn't match
    DecryptionFailed {
        /// Specific failure reason
        reason: String,
    },

    /// Invalid cryptographic key
    InvalidKey {
        /// Type of key that failed (e.g., "server_public_key", "signing_key")
        key_type: String,
        /// Specific failure reason
        reason: String,
    },

    /// Hex or base64 decoding failed
    InvalidEncoding {
        /// Which value failed to decode
        field: String,
        /// Specific failure reason
        reason: String,
    },

    /// MAC verification failed
    InvalidSignature,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CryptoError::KeyDerivationFailed { operation, reason } => {
                write!(f, "Key derivation failed during {}: {}", operation, reason)
            }
            CryptoError::EncryptionFailed { reason } => {
                write!(f, "Encryption failed: {}", reason)
            }
            CryptoError::DecryptionFailed { reason } => {
                write!(f, "Decryption failed: {}", reason)
            }
            CryptoError::InvalidKey { key_type, reason } => {
                write!(f, "Invalid key ({}): {}", key_type, reason)
            }
            CryptoError::InvalidEncoding { field, reason } => {
                write!(f, "Invalid encoding for '{}': {}", field, reason)
            }
            CryptoError::InvalidSignature => write!(f, "Signature verification failed"),
        }
    }
}

impl std::error::Error for CryptoError {}

impl From<hex::FromHexError> for CryptoError {
    fn from(err: hex::FromHexError) -> Self {
        CryptoError::InvalidEncoding {
            field: "hex_field".to_string(),
            reason: format!("hex decode error: {}", err),
        }
    }
}

impl From<base64::DecodeError> for CryptoError {
    fn from(err: base64::DecodeError) -> Self {
        CryptoError::InvalidEncoding {
            field: "base64_field".to_string(),
            reason: format!("base64 decode error: {}", err),
        }
    }
}

impl From<chacha20poly1305::aead::Error> for CryptoError {
    fn from(err: chacha20poly1305::aead::Error) -> Self {
        CryptoError::DecryptionFailed {
            reason: format!("authentication error: {}", err),
        }
    }
}

/// Result type for cryptographic operations
pub type CryptoResult<T> = Result<T, CryptoError>;
