// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Payload Codec
//!
//! Encrypts request bodies and decrypts response bodies, either field by
//! field (driven by a registered [`FieldSchema`](super::FieldSchema)) or as
//! one full-payload unit.
//!
//! ## Wire shapes
//!
//! Ciphertext unit (one per encrypted field, or the full payload):
//!
//! ```json
//! { "nonce": "<b64>", "ciphertext": "<b64>", "tag": "<b64>" }
//! ```
//!
//! Full-payload body:
//!
//! ```json
//! { "encrypted": true, "section": "health", "payload": { ...unit... } }
//! ```
//!
//! The AAD is `section` for full payloads and `section:field` for fields,
//! so units cannot be moved between fields or sections.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::error::CodecError;
use super::options::{EncryptionMode, EncryptionOptions};
use super::schema::SchemaRegistry;
use crate::crypto::encryption::{self, SealedUnit, NONCE_SIZE, TAG_SIZE};
use crate::session::DerivedKeySet;
use crate::transport::headers;
use crate::transport::http::HttpResponse;

/// Structural marker key of a full-payload envelope
pub const ENVELOPE_MARKER: &str = "encrypted";

/// One authenticated ciphertext unit as it appears in JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncryptedUnit {
    pub nonce: String,
    pub ciphertext: String,
    pub tag: String,
}

impl EncryptedUnit {
    fn seal(key: &[u8; 32], plaintext: &[u8], aad: &[u8]) -> Result<Self, CodecError> {
        let sealed =
            encryption::seal(key, plaintext, aad).map_err(|e| CodecError::encryption(e.to_string()))?;
        Ok(Self {
            nonce: STANDARD.encode(sealed.nonce),
            ciphertext: STANDARD.encode(&sealed.ciphertext),
            tag: STANDARD.encode(sealed.tag),
        })
    }

    fn open(&self, key: &[u8; 32], aad: &[u8]) -> Result<Vec<u8>, CodecError> {
        let nonce: [u8; NONCE_SIZE] = decode_fixed(&self.nonce, "nonce")?;
        let tag: [u8; TAG_SIZE] = decode_fixed(&self.tag, "tag")?;
        let ciphertext = STANDARD
            .decode(&self.ciphertext)
            .map_err(|e| CodecError::decryption(format!("ciphertext: {}", e)))?;

        encryption::open(
            key,
            &SealedUnit {
                nonce,
                ciphertext,
                tag,
            },
            aad,
        )
        .map_err(|e| CodecError::decryption(e.to_string()))
    }

    fn into_value(self) -> Result<Value, CodecError> {
        serde_json::to_value(self).map_err(|e| CodecError::encryption(e.to_string()))
    }
}

/// Full-payload request/response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    pub encrypted: bool,
    pub section: String,
    pub payload: EncryptedUnit,
}

/// Encryption metadata a response carries in its headers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseEncryption {
    pub encrypted: bool,
    pub mode: Option<EncryptionMode>,
    pub section: Option<String>,
}

impl ResponseEncryption {
    pub fn from_response(response: &HttpResponse) -> Self {
        Self {
            encrypted: headers::is_true(response.header(headers::ENCRYPTED)),
            mode: response
                .header(headers::ENCRYPTION_TYPE)
                .and_then(EncryptionMode::from_header_value),
            section: response
                .header(headers::ENCRYPTION_SECTION)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        }
    }
}

/// Encoded request body plus the encryption headers to send with it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedRequest {
    pub body: Option<Vec<u8>>,
    pub headers: Vec<(String, String)>,
}

/// Decoded response body
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBody {
    pub body: Value,
    pub decrypted: bool,
}

/// Whether the server says this response is encrypted.
///
/// True when the `X-Encrypted` header says so or the body carries the
/// full-payload structural marker.
pub fn is_encrypted_response(signal: &ResponseEncryption, body: &Value) -> bool {
    signal.encrypted || has_envelope_marker(body)
}

fn has_envelope_marker(body: &Value) -> bool {
    body.get(ENVELOPE_MARKER) == Some(&Value::Bool(true))
}

/// Parse a raw body: empty → `null`, JSON → value, anything else → string
pub fn parse_body(raw: &[u8]) -> Value {
    parse_json(raw).unwrap_or_else(|| Value::String(String::from_utf8_lossy(raw).into_owned()))
}

/// `None` when a non-empty body is not JSON
fn parse_json(raw: &[u8]) -> Option<Value> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Some(Value::Null);
    }
    serde_json::from_slice(raw).ok()
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn field_aad(section: &str, field: &str) -> Vec<u8> {
    format!("{}:{}", section, field).into_bytes()
}

fn decode_fixed<const N: usize>(encoded: &str, what: &str) -> Result<[u8; N], CodecError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| CodecError::decryption(format!("{}: {}", what, e)))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        CodecError::decryption(format!("{}: expected {} bytes, got {}", what, N, b.len()))
    })
}

/// Strictly parse `value` as a ciphertext unit if it claims to be one
fn unit_in(value: &Value) -> Result<Option<EncryptedUnit>, CodecError> {
    match value {
        Value::Object(map) if map.contains_key("ciphertext") => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| CodecError::decryption(format!("malformed ciphertext unit: {}", e))),
        _ => Ok(None),
    }
}

fn to_json_bytes(value: &Value) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(value).map_err(|e| CodecError::InvalidBody(e.to_string()))
}

/// Schema-driven request/response transformer
#[derive(Debug, Clone)]
pub struct PayloadCodec {
    schemas: Arc<SchemaRegistry>,
}

impl PayloadCodec {
    pub fn new(schemas: Arc<SchemaRegistry>) -> Self {
        Self { schemas }
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// Section whose keys protect a call made with `options`
    pub fn section_for(&self, options: &EncryptionOptions) -> Result<String, CodecError> {
        match options {
            EncryptionOptions::Fields { schema_id } => {
                Ok(self.schemas.get(schema_id)?.section().to_string())
            }
            EncryptionOptions::FullPayload { section } => {
                if self.schemas.has_section(section) {
                    Ok(section.clone())
                } else {
                    Err(CodecError::UnknownSection(section.clone()))
                }
            }
        }
    }

    /// Section needed to decode a response.
    ///
    /// The response's own `X-Encryption-Section` wins over the request's;
    /// an envelope's `section` is the last resort.
    pub fn response_section(
        &self,
        options: Option<&EncryptionOptions>,
        signal: &ResponseEncryption,
        body: &Value,
    ) -> Result<Option<String>, CodecError> {
        let section = match (&signal.section, options) {
            (Some(section), _) => Some(section.clone()),
            (None, Some(options)) => Some(self.section_for(options)?),
            (None, None) if has_envelope_marker(body) => body
                .get("section")
                .and_then(Value::as_str)
                .map(str::to_string),
            (None, None) => None,
        };
        match section {
            Some(section) if !self.schemas.has_section(&section) => Err(CodecError::decryption(
                format!("unknown section '{}'", section),
            )),
            other => Ok(other),
        }
    }

    /// Transform a request body according to `options`.
    ///
    /// Without options the body is serialized as-is and no headers are added.
    pub fn encode_request(
        &self,
        body: Option<&Value>,
        options: Option<&EncryptionOptions>,
        keys: Option<&DerivedKeySet>,
    ) -> Result<EncodedRequest, CodecError> {
        let Some(options) = options else {
            return Ok(EncodedRequest {
                body: body.map(to_json_bytes).transpose()?,
                headers: Vec::new(),
            });
        };

        let section = self.section_for(options)?;
        let keys = keys.ok_or_else(|| CodecError::encryption("no session keys available"))?;
        if keys.section() != section {
            return Err(CodecError::encryption(format!(
                "keys for section '{}' cannot encrypt section '{}'",
                keys.section(),
                section
            )));
        }

        let (encoded_body, sealed) = match options {
            EncryptionOptions::Fields { schema_id } => {
                (self.encrypt_fields(body, schema_id, keys)?, true)
            }
            EncryptionOptions::FullPayload { .. } => Self::encrypt_full(body, keys)?,
        };

        // An empty full payload goes out plain and must not claim encryption.
        // The section header still names the keys the request is signed with.
        let mut encoded_headers = Vec::with_capacity(4);
        if sealed {
            encoded_headers.push((headers::ENCRYPTED.to_string(), "true".to_string()));
            encoded_headers.push((
                headers::ENCRYPTION_TYPE.to_string(),
                options.mode().as_header_value().to_string(),
            ));
        }
        encoded_headers.push((headers::ENCRYPTION_SECTION.to_string(), section));
        encoded_headers.push((headers::SESSION_ID.to_string(), keys.session_id().to_string()));

        Ok(EncodedRequest {
            body: encoded_body,
            headers: encoded_headers,
        })
    }

    fn encrypt_fields(
        &self,
        body: Option<&Value>,
        schema_id: &str,
        keys: &DerivedKeySet,
    ) -> Result<Option<Vec<u8>>, CodecError> {
        let schema = self.schemas.get(schema_id)?;
        let map = match body {
            None => return Ok(None),
            Some(Value::Null) => return Ok(Some(b"null".to_vec())),
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(CodecError::InvalidBody(
                    "field-level encryption requires a JSON object body".to_string(),
                ))
            }
        };

        let mut out = map.clone();
        for field in schema.fields() {
            let Some(value) = map.get(field) else {
                continue;
            };
            if is_empty_value(value) {
                continue;
            }
            let unit = EncryptedUnit::seal(
                keys.encryption_key(),
                &to_json_bytes(value)?,
                &field_aad(schema.section(), field),
            )?;
            out.insert(field.clone(), unit.into_value()?);
        }

        to_json_bytes(&Value::Object(out)).map(Some)
    }

    /// Envelope bytes, and whether anything was sealed
    fn encrypt_full(
        body: Option<&Value>,
        keys: &DerivedKeySet,
    ) -> Result<(Option<Vec<u8>>, bool), CodecError> {
        let value = match body {
            None => return Ok((None, false)),
            Some(value) if is_empty_value(value) => {
                return Ok((Some(to_json_bytes(value)?), false))
            }
            Some(value) => value,
        };

        let payload = EncryptedUnit::seal(
            keys.encryption_key(),
            &to_json_bytes(value)?,
            keys.section().as_bytes(),
        )?;
        let envelope = EncryptedEnvelope {
            encrypted: true,
            section: keys.section().to_string(),
            payload,
        };
        serde_json::to_vec(&envelope)
            .map(|bytes| (Some(bytes), true))
            .map_err(|e| CodecError::encryption(e.to_string()))
    }

    /// Reverse the encryption applied by the server.
    ///
    /// Runs when the caller asked for encryption or the response says it is
    /// encrypted. Each unit either decrypts completely or the whole call
    /// fails; no partially-decrypted body is ever returned.
    pub fn decode_response(
        &self,
        raw_body: &[u8],
        options: Option<&EncryptionOptions>,
        signal: &ResponseEncryption,
        keys: Option<&DerivedKeySet>,
    ) -> Result<DecodedBody, CodecError> {
        let body = parse_body(raw_body);
        if options.is_none() && !is_encrypted_response(signal, &body) {
            return Ok(DecodedBody {
                body,
                decrypted: false,
            });
        }

        if parse_json(raw_body).is_none() {
            if signal.encrypted {
                return Err(CodecError::decryption("malformed envelope: body is not JSON"));
            }
            debug!("Plaintext non-JSON response to encrypted request, passing through");
            return Ok(DecodedBody {
                body,
                decrypted: false,
            });
        }

        let mode = signal
            .mode
            .or_else(|| has_envelope_marker(&body).then_some(EncryptionMode::Full))
            .or_else(|| options.map(EncryptionOptions::mode))
            .unwrap_or(EncryptionMode::Field);

        match mode {
            EncryptionMode::Full => self.decrypt_full(body, signal, keys),
            EncryptionMode::Field => self.decrypt_fields(body, options, signal, keys),
        }
    }

    fn decrypt_full(
        &self,
        body: Value,
        signal: &ResponseEncryption,
        keys: Option<&DerivedKeySet>,
    ) -> Result<DecodedBody, CodecError> {
        if !has_envelope_marker(&body) {
            if signal.encrypted {
                return Err(CodecError::decryption("malformed envelope: missing marker"));
            }
            return Ok(DecodedBody {
                body,
                decrypted: false,
            });
        }

        let envelope: EncryptedEnvelope = serde_json::from_value(body)
            .map_err(|e| CodecError::decryption(format!("malformed envelope: {}", e)))?;
        let keys = keys.ok_or_else(|| CodecError::decryption("no session keys available"))?;
        if envelope.section != keys.section() {
            return Err(CodecError::decryption(format!(
                "envelope section '{}' does not match '{}'",
                envelope.section,
                keys.section()
            )));
        }

        let plaintext = envelope
            .payload
            .open(keys.encryption_key(), envelope.section.as_bytes())?;
        let body = serde_json::from_slice(&plaintext)
            .map_err(|e| CodecError::decryption(format!("decrypted payload is not JSON: {}", e)))?;
        Ok(DecodedBody {
            body,
            decrypted: true,
        })
    }

    fn decrypt_fields(
        &self,
        body: Value,
        options: Option<&EncryptionOptions>,
        signal: &ResponseEncryption,
        keys: Option<&DerivedKeySet>,
    ) -> Result<DecodedBody, CodecError> {
        let map = match body {
            Value::Object(map) => map,
            other if other.is_null() || !signal.encrypted => {
                return Ok(DecodedBody {
                    body: other,
                    decrypted: false,
                })
            }
            _ => {
                return Err(CodecError::decryption(
                    "field-encrypted response is not a JSON object",
                ))
            }
        };

        let candidates: Vec<String> = match options {
            Some(EncryptionOptions::Fields { schema_id }) => self.schemas.get(schema_id)?.fields().to_vec(),
            _ => map
                .iter()
                .filter(|(_, value)| matches!(value, Value::Object(o) if o.contains_key("ciphertext")))
                .map(|(field, _)| field.clone())
                .collect(),
        };

        let mut units = Vec::new();
        for field in candidates {
            if let Some(unit) = map.get(&field).map(unit_in).transpose()?.flatten() {
                units.push((field, unit));
            }
        }
        if units.is_empty() {
            return Ok(DecodedBody {
                body: Value::Object(map),
                decrypted: false,
            });
        }

        let keys = keys.ok_or_else(|| CodecError::decryption("no session keys available"))?;
        let mut out: Map<String, Value> = map;
        for (field, unit) in units {
            let plaintext = unit
                .open(keys.encryption_key(), &field_aad(keys.section(), &field))
                .map_err(|e| CodecError::decryption(format!("field '{}': {}", field, e)))?;
            let value = serde_json::from_slice(&plaintext).map_err(|e| {
                CodecError::decryption(format!("field '{}' is not JSON: {}", field, e))
            })?;
            out.insert(field, value);
        }

        Ok(DecodedBody {
            body: Value::Object(out),
            decrypted: true,
        })
    }
}
