// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Session value objects
//!
//! **Security**: secrets and derived keys are held in zeroizing buffers and
//! never appear in `Debug` output.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use zeroize::Zeroizing;

use crate::crypto::{
    encryption::KEY_SIZE,
    kdf::{self, KeyPurpose},
    CryptoResult,
};

/// One encryption session with a backend endpoint
#[derive(Clone)]
pub struct EncryptionSession {
    session_id: String,
    secret: Zeroizing<Vec<u8>>,
    established_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    bound_identity: Option<String>,
}

impl EncryptionSession {
    /// Create an anonymous session from handshake output
    pub fn new(
        session_id: impl Into<String>,
        secret: impl Into<Vec<u8>>,
        established_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            secret: Zeroizing::new(secret.into()),
            established_at,
            expires_at,
            bound_identity: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn bound_identity(&self) -> Option<&str> {
        self.bound_identity.as_deref()
    }

    pub fn is_bound(&self) -> bool {
        self.bound_identity.is_some()
    }

    /// Time between establishment and expiry
    pub fn lifetime(&self) -> Duration {
        self.expires_at - self.established_at
    }

    /// `now < expires_at`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// True once the session is inside `margin` of its expiry (or past it)
    pub fn needs_refresh_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now + margin >= self.expires_at
    }

    pub(crate) fn secret(&self) -> &[u8] {
        &self.secret
    }

    /// Copy of this session carrying `identity`; key material is unchanged
    pub(crate) fn with_bound_identity(&self, identity: impl Into<String>) -> Self {
        let mut bound = self.clone();
        bound.bound_identity = Some(identity.into());
        bound
    }
}

impl fmt::Debug for EncryptionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionSession")
            .field("session_id", &self.session_id)
            .field("secret", &"<redacted>")
            .field("established_at", &self.established_at)
            .field("expires_at", &self.expires_at)
            .field("bound_identity", &self.bound_identity)
            .finish()
    }
}

/// Encryption and signing keys for one section of one session
pub struct DerivedKeySet {
    session_id: String,
    section: String,
    encryption_key: Zeroizing<[u8; KEY_SIZE]>,
    signing_key: Zeroizing<[u8; KEY_SIZE]>,
}

impl DerivedKeySet {
    /// Derive both keys for `section` from the session's secret
    pub fn derive(session: &EncryptionSession, section: &str) -> CryptoResult<Self> {
        Ok(Self {
            session_id: session.session_id.clone(),
            section: section.to_string(),
            encryption_key: kdf::derive(session.secret(), section, KeyPurpose::Encryption)?,
            signing_key: kdf::derive(session.secret(), section, KeyPurpose::Signing)?,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn section(&self) -> &str {
        &self.section
    }

    pub fn encryption_key(&self) -> &[u8; KEY_SIZE] {
        &self.encryption_key
    }

    pub fn signing_key(&self) -> &[u8; KEY_SIZE] {
        &self.signing_key
    }
}

impl fmt::Debug for DerivedKeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKeySet")
            .field("session_id", &self.session_id)
            .field("section", &self.section)
            .finish_non_exhaustive()
    }
}
