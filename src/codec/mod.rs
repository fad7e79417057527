// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Request/response payload encryption
//!
//! - **options**: per-call `EncryptionOptions` (field-level or full-payload)
//! - **schema**: registry of `FieldSchema`s, fixed after startup
//! - **payload**: the codec itself and response-encryption detection

pub mod error;
pub mod options;
pub mod payload;
pub mod schema;

pub use error::CodecError;
pub use options::{EncryptionMode, EncryptionOptions};
pub use payload::{
    is_encrypted_response, parse_body, DecodedBody, EncodedRequest, EncryptedEnvelope,
    EncryptedUnit, PayloadCodec, ResponseEncryption,
};
pub use schema::{FieldSchema, SchemaRegistry};
