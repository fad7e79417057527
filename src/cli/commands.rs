// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use clap::Args;
use serde_json::Value;
use tracing::info;

use crate::codec::EncryptionOptions;
use crate::config::TransportConfig;
use crate::crypto::signing::{body_hash, canonical_string};
use crate::transport::{SecureRequest, SecureTransport};

/// Arguments for the handshake command
#[derive(Args, Debug)]
pub struct HandshakeArgs {
    /// Backend base URL
    #[arg(long)]
    pub endpoint: String,
}

/// Arguments for the request command
#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Backend base URL
    #[arg(long)]
    pub endpoint: String,

    /// HTTP method
    #[arg(long, default_value = "GET")]
    pub method: String,

    /// Path including any query string
    #[arg(long)]
    pub path: String,

    /// JSON request body
    #[arg(long)]
    pub body: Option<String>,

    /// Encrypt the fields of this registered schema
    #[arg(long, conflicts_with = "full_section")]
    pub schema: Option<String>,

    /// Encrypt the whole body under this section
    #[arg(long, conflicts_with = "schema")]
    pub full_section: Option<String>,
}

/// Arguments for the canonical command
#[derive(Args, Debug)]
pub struct CanonicalArgs {
    #[arg(long, default_value = "GET")]
    pub method: String,

    #[arg(long)]
    pub path: String,

    /// Body bytes exactly as sent (empty when omitted)
    #[arg(long, default_value = "")]
    pub body: String,

    /// Milliseconds since the Unix epoch
    #[arg(long)]
    pub timestamp: u64,

    #[arg(long)]
    pub nonce: String,
}

/// File config (if any) with environment overrides on top
pub fn load_config(path: Option<&Path>) -> Result<TransportConfig> {
    let config = match path {
        Some(path) => {
            let mut config = TransportConfig::from_file(path)?;
            config.apply_env_overrides();
            config
        }
        None => TransportConfig::from_env(),
    };
    config.validate().map_err(|e| anyhow!(e))?;
    Ok(config)
}

pub async fn handshake(config: &TransportConfig, args: HandshakeArgs) -> Result<()> {
    let transport = SecureTransport::from_config(config)?;
    let manager = transport.session_manager(&args.endpoint)?;

    info!("Handshaking with {}", manager.endpoint());
    let session = manager.ensure_session().await?;

    println!("✅ Session established");
    println!("  Endpoint:   {}", manager.endpoint());
    println!("  Session ID: {}", session.session_id());
    println!("  Device ID:  {}", transport.registry().device_id());
    println!("  Expires at: {}", session.expires_at().to_rfc3339());
    Ok(())
}

pub async fn request(config: &TransportConfig, args: RequestArgs) -> Result<()> {
    let transport = SecureTransport::from_config(config)?;

    let mut request = SecureRequest::new(args.method, args.endpoint, args.path);
    if let Some(body) = args.body {
        let body: Value = serde_json::from_str(&body).context("--body is not valid JSON")?;
        request = request.with_body(body);
    }
    if let Some(schema) = args.schema {
        request = request.with_encryption(EncryptionOptions::fields(schema));
    } else if let Some(section) = args.full_section {
        request = request.with_encryption(EncryptionOptions::full_payload(section));
    }

    let response = transport.send(request).await?;

    println!("📋 Response {}", response.status);
    println!("  Signed:    {}", response.signing.is_signed());
    println!("  Decrypted: {}", response.decrypted);
    println!("{}", serde_json::to_string_pretty(&response.body)?);
    Ok(())
}

pub fn canonical(args: CanonicalArgs) -> Result<()> {
    let hash = body_hash(args.body.as_bytes());
    let canonical = canonical_string(&args.method, &args.path, args.timestamp, &args.nonce, &hash);

    println!("Body hash: {}", hash);
    println!("Canonical string:");
    println!("{}", canonical);
    Ok(())
}
