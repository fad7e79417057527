// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Scripted handshaker shared by the session tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use portal_secure_transport::session::{
    HandshakeRequest, Handshaker, SessionManager, SessionSettings,
};
use portal_secure_transport::{EncryptionSession, SessionError};

pub const ENDPOINT: &str = "https://portal.example.com";

/// Counts calls, sleeps `delay`, then issues `sess-<n>`.
///
/// Session lifetimes are taken from `lifetimes` in order; the last one
/// repeats. A lifetime of `None` makes that call fail.
pub struct CountingHandshaker {
    calls: AtomicUsize,
    delay: Duration,
    lifetimes: Mutex<VecDeque<Option<i64>>>,
    pub identities: Mutex<Vec<Option<String>>>,
}

impl CountingHandshaker {
    pub fn new(delay: Duration, lifetime_secs: i64) -> Arc<Self> {
        Self::scripted(delay, vec![Some(lifetime_secs)])
    }

    pub fn scripted(delay: Duration, lifetimes: Vec<Option<i64>>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            lifetimes: Mutex::new(lifetimes.into()),
            identities: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_lifetime(&self) -> Option<i64> {
        let mut lifetimes = self.lifetimes.lock().unwrap();
        if lifetimes.len() > 1 {
            lifetimes.pop_front().flatten()
        } else {
            lifetimes.front().copied().flatten()
        }
    }
}

#[async_trait]
impl Handshaker for CountingHandshaker {
    async fn handshake(
        &self,
        request: &HandshakeRequest,
    ) -> Result<EncryptionSession, SessionError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;
        self.identities
            .lock()
            .unwrap()
            .push(request.bound_identity.clone());

        let lifetime = self.next_lifetime().ok_or_else(|| SessionError::HandshakeFailed {
            endpoint: request.endpoint.clone(),
            reason: format!("scripted failure #{}", n),
        })?;
        let now = Utc::now();
        Ok(EncryptionSession::new(
            format!("sess-{}", n),
            vec![n as u8; 32],
            now,
            now + chrono::Duration::seconds(lifetime),
        ))
    }
}

pub fn manager(handshaker: &Arc<CountingHandshaker>) -> SessionManager {
    manager_with_settings(handshaker, SessionSettings::default())
}

pub fn manager_with_settings(
    handshaker: &Arc<CountingHandshaker>,
    settings: SessionSettings,
) -> SessionManager {
    SessionManager::new(
        ENDPOINT,
        "device-test",
        Arc::clone(handshaker) as Arc<dyn Handshaker>,
        settings,
    )
}
