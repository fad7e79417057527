// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Payload codec errors

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// No schema registered under this id
    #[error("Unknown field-encryption schema '{0}'")]
    UnknownSchema(String),

    /// Section is not known to the schema registry
    #[error("Unknown encryption section '{0}'")]
    UnknownSection(String),

    /// A schema with this id is already registered
    #[error("Duplicate field-encryption schema '{0}'")]
    DuplicateSchema(String),

    #[error("Encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    /// Tag mismatch, malformed envelope or unknown section; never partial
    #[error("Decryption failed: {reason}")]
    DecryptionFailed { reason: String },

    /// Body is not valid JSON or has the wrong shape for the requested mode
    #[error("Invalid body: {0}")]
    InvalidBody(String),
}

impl CodecError {
    pub(crate) fn encryption(reason: impl Into<String>) -> Self {
        CodecError::EncryptionFailed {
            reason: reason.into(),
        }
    }

    pub(crate) fn decryption(reason: impl Into<String>) -> Self {
        CodecError::DecryptionFailed {
            reason: reason.into(),
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            CodecError::UnknownSchema(_) => "UNKNOWN_SCHEMA",
            CodecError::UnknownSection(_) => "UNKNOWN_SECTION",
            CodecError::DuplicateSchema(_) => "DUPLICATE_SCHEMA",
            CodecError::EncryptionFailed { .. } => "ENCRYPTION_FAILED",
            CodecError::DecryptionFailed { .. } => "DECRYPTION_FAILED",
            CodecError::InvalidBody(_) => "INVALID_BODY",
        }
    }
}
