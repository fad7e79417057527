// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Header names exchanged with the backend. Byte-for-byte wire contract.

pub const DEVICE_ID: &str = "X-Device-Id";
pub const SESSION_ID: &str = "X-Session-Id";
pub const ENCRYPTED: &str = "X-Encrypted";
pub const ENCRYPTION_TYPE: &str = "X-Encryption-Type";
pub const ENCRYPTION_SECTION: &str = "X-Encryption-Section";
pub const TIMESTAMP: &str = "X-Timestamp";
pub const NONCE: &str = "X-Nonce";
pub const SIGNATURE: &str = "X-Signature";

pub const CONTENT_TYPE: &str = "Content-Type";
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// `"true"` in any letter case
pub fn is_true(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}
