// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Encryption session lifecycle
//!
//! - **types**: `EncryptionSession` and per-section `DerivedKeySet`
//! - **handshake**: ECDH handshake with the backend
//! - **manager**: single-flight establishment, binding, invalidation, key cache
//! - **registry**: one manager per backend endpoint
//! - **device**: durable `X-Device-Id`

pub mod device;
pub mod error;
pub mod handshake;
pub mod manager;
pub mod registry;
pub mod types;

pub use device::{DeviceIdError, DeviceIdStore, FileDeviceIdStore, MemoryDeviceIdStore};
pub use error::SessionError;
pub use handshake::{HandshakeReply, HandshakeRequest, Handshaker, HttpHandshaker};
#[cfg(test)]
pub use handshake::MockHandshaker;
pub use manager::{SessionManager, SessionSettings, SessionState};
pub use registry::{normalize_endpoint, HandshakerFactory, SessionRegistry};
pub use types::{DerivedKeySet, EncryptionSession};
