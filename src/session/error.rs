// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Session lifecycle errors

use thiserror::Error;

/// Errors raised by the session manager and its handshake collaborator.
///
/// `Clone` because a single handshake outcome is delivered to every caller
/// that joined the in-flight establishment.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Handshake with the backend failed (network, status, malformed reply, timeout)
    #[error("Handshake with {endpoint} failed: {reason}")]
    HandshakeFailed { endpoint: String, reason: String },

    /// The session used for this operation has expired or was replaced
    #[error("Encryption session expired")]
    SessionExpired,

    /// No session has been established yet
    #[error("No active encryption session")]
    NoActiveSession,

    /// The session is already bound to another authenticated identity
    #[error("Session already bound to '{bound}', cannot bind to '{requested}'")]
    AlreadyBoundToDifferentIdentity { bound: String, requested: String },

    /// Per-section key derivation failed
    #[error("Key derivation failed for section '{section}': {reason}")]
    KeyDerivationFailed { section: String, reason: String },

    /// Endpoint string is not a usable base URL
    #[error("Invalid backend endpoint '{0}'")]
    InvalidEndpoint(String),
}

impl SessionError {
    /// Whether calling `ensure_session()` again later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::HandshakeFailed { .. }
                | SessionError::SessionExpired
                | SessionError::NoActiveSession
        )
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            SessionError::HandshakeFailed { .. } => "HANDSHAKE_FAILED",
            SessionError::SessionExpired => "SESSION_EXPIRED",
            SessionError::NoActiveSession => "NO_ACTIVE_SESSION",
            SessionError::AlreadyBoundToDifferentIdentity { .. } => {
                "ALREADY_BOUND_TO_DIFFERENT_IDENTITY"
            }
            SessionError::KeyDerivationFailed { .. } => "KEY_DERIVATION_FAILED",
            SessionError::InvalidEndpoint(_) => "INVALID_ENDPOINT",
        }
    }
}
