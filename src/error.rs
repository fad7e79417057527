// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Errors returned by the secure transport facade

use thiserror::Error;

use crate::codec::CodecError;
use crate::config::ConfigError;
use crate::crypto::CryptoError;
use crate::session::{DeviceIdError, SessionError};
use crate::transport::http::HttpError;

/// What callers of [`SecureTransport`](crate::transport::SecureTransport) see.
///
/// Use [`is_retryable`](Self::is_retryable) and
/// [`is_integrity_violation`](Self::is_integrity_violation) to decide how
/// to react; the two sets are disjoint.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Request signing failed: {0}")]
    Signing(#[from] CryptoError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Device id error: {0}")]
    DeviceId(#[from] DeviceIdError),
}

impl From<HttpError> for TransportError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Network(reason) => TransportError::Network(reason),
            HttpError::InvalidRequest(reason) => TransportError::InvalidRequest(reason),
        }
    }
}

impl From<ConfigError> for TransportError {
    fn from(err: ConfigError) -> Self {
        TransportError::Config(err.to_string())
    }
}

impl TransportError {
    /// Transient failures: the same call may succeed later
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Session(e) => e.is_retryable(),
            TransportError::Network(_)
            | TransportError::Timeout { .. }
            | TransportError::Cancelled => true,
            _ => false,
        }
    }

    /// Decryption or signature failures; never retry with the same payload
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            TransportError::Codec(CodecError::DecryptionFailed { .. })
                | TransportError::Signing(CryptoError::InvalidSignature)
                | TransportError::Signing(CryptoError::DecryptionFailed { .. })
        )
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            TransportError::Session(e) => e.error_code(),
            TransportError::Codec(e) => e.error_code(),
            TransportError::Signing(_) => "SIGNING_FAILED",
            TransportError::Network(_) => "NETWORK_ERROR",
            TransportError::Timeout { .. } => "TIMEOUT",
            TransportError::Cancelled => "CANCELLED",
            TransportError::InvalidRequest(_) => "INVALID_REQUEST",
            TransportError::Config(_) => "CONFIG_ERROR",
            TransportError::DeviceId(_) => "DEVICE_ID_ERROR",
        }
    }
}
