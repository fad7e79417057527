// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Per-call encryption options

use serde::{Deserialize, Serialize};

/// How a request body should be encrypted. `None` at the call site means plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum EncryptionOptions {
    /// Encrypt the fields listed by a registered schema
    #[serde(rename_all = "camelCase")]
    Fields { schema_id: String },
    /// Encrypt the whole serialized body as one unit
    FullPayload { section: String },
}

impl EncryptionOptions {
    pub fn fields(schema_id: impl Into<String>) -> Self {
        EncryptionOptions::Fields {
            schema_id: schema_id.into(),
        }
    }

    pub fn full_payload(section: impl Into<String>) -> Self {
        EncryptionOptions::FullPayload {
            section: section.into(),
        }
    }

    pub fn mode(&self) -> EncryptionMode {
        match self {
            EncryptionOptions::Fields { .. } => EncryptionMode::Field,
            EncryptionOptions::FullPayload { .. } => EncryptionMode::Full,
        }
    }
}

/// Value of the `X-Encryption-Type` header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionMode {
    Field,
    Full,
}

impl EncryptionMode {
    pub fn as_header_value(self) -> &'static str {
        match self {
            EncryptionMode::Field => "field",
            EncryptionMode::Full => "full",
        }
    }

    pub fn from_header_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "field" => Some(EncryptionMode::Field),
            "full" => Some(EncryptionMode::Full),
            _ => None,
        }
    }
}
