// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod cli;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod session;
pub mod transport;

// Re-export the types most callers need
pub use codec::{EncryptionOptions, FieldSchema, PayloadCodec, SchemaRegistry};
pub use config::TransportConfig;
pub use error::TransportError;
pub use session::{EncryptionSession, SessionError, SessionManager, SessionRegistry};
pub use transport::{SecureRequest, SecureResponse, SecureTransport, SigningStatus};
