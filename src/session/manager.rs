// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Session Manager
//!
//! Owns the encryption session for one backend endpoint: establishes it on
//! demand, refreshes it before expiry, binds it to an authenticated identity
//! and invalidates it. The session secret and the per-section key cache never
//! leave this type; callers borrow derived keys through [`SessionManager::with_keys`]
//! for the duration of a closure.
//!
//! ## Single-flight establishment
//!
//! At most one handshake is in flight per manager. The pending handshake is a
//! `futures::future::Shared` future; the manager keeps only a weak handle to
//! it, so concurrent callers join the same handshake, and a handshake whose
//! callers were all cancelled is dropped without touching the stored session.
//! The handshake future clears the pending handle itself when it settles,
//! whether it succeeded or failed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use tracing::{debug, info, warn};

use super::error::SessionError;
use super::handshake::{HandshakeRequest, Handshaker};
use super::types::{DerivedKeySet, EncryptionSession};

type HandshakeOutcome = Result<Arc<EncryptionSession>, SessionError>;
type PendingHandshake = Shared<BoxFuture<'static, HandshakeOutcome>>;
type WeakPendingHandshake = WeakShared<BoxFuture<'static, HandshakeOutcome>>;

/// Lifecycle timing for a manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Upper bound on a single handshake attempt
    pub handshake_timeout: Duration,
    /// Sessions this close to expiry are re-established on the next call
    pub refresh_margin: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            refresh_margin: Duration::from_secs(30),
        }
    }
}

/// Observable lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Establishing,
    AnonymousActive,
    BoundActive,
    Expired,
    Invalidated,
}

#[derive(Default)]
struct ManagerState {
    active: Option<Arc<EncryptionSession>>,
    keys: HashMap<String, Arc<DerivedKeySet>>,
    pending: Option<WeakPendingHandshake>,
    /// Bumped by `invalidate()`; handshakes started under an older epoch
    /// must not install their result.
    epoch: u64,
    invalidated: bool,
}

struct Inner {
    endpoint: String,
    device_id: String,
    handshaker: Arc<dyn Handshaker>,
    settings: SessionSettings,
    state: Mutex<ManagerState>,
    handshakes_started: AtomicU64,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configured margin, capped at half of `session`'s lifetime so a
    /// short-lived session is reused before it is refreshed
    fn refresh_margin_for(&self, session: &EncryptionSession) -> chrono::Duration {
        let configured = chrono::Duration::from_std(self.settings.refresh_margin)
            .unwrap_or(chrono::Duration::zero());
        configured
            .min(session.lifetime() / 2)
            .max(chrono::Duration::zero())
    }

    async fn establish(
        self: Arc<Self>,
        epoch: u64,
        carried_identity: Option<String>,
    ) -> HandshakeOutcome {
        self.handshakes_started.fetch_add(1, Ordering::SeqCst);
        let request = HandshakeRequest {
            endpoint: self.endpoint.clone(),
            device_id: self.device_id.clone(),
            bound_identity: carried_identity.clone(),
        };

        let outcome =
            match tokio::time::timeout(self.settings.handshake_timeout, self.handshaker.handshake(&request))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(SessionError::HandshakeFailed {
                    endpoint: self.endpoint.clone(),
                    reason: format!(
                        "timed out after {}ms",
                        self.settings.handshake_timeout.as_millis()
                    ),
                }),
            };

        let mut state = self.lock_state();
        if state.epoch == epoch {
            state.pending = None;
        }

        match outcome {
            Ok(session) => {
                // The identity may have been bound while this handshake was in flight
                let identity = if state.epoch == epoch {
                    state
                        .active
                        .as_ref()
                        .and_then(|s| s.bound_identity().map(str::to_owned))
                        .or(carried_identity)
                } else {
                    carried_identity
                };
                let session = match identity {
                    Some(identity) if !session.is_bound() => session.with_bound_identity(identity),
                    _ => session,
                };
                let session = Arc::new(session);
                if state.epoch == epoch {
                    state.active = Some(Arc::clone(&session));
                    state.keys.clear();
                    state.invalidated = false;
                    info!(
                        "🔑 Encryption session {} established with {} (expires {})",
                        session.session_id(),
                        self.endpoint,
                        session.expires_at()
                    );
                } else {
                    debug!(
                        "Discarding session {} from {}: invalidated during handshake",
                        session.session_id(),
                        self.endpoint
                    );
                }
                Ok(session)
            }
            Err(e) => {
                warn!("Handshake with {} failed: {}", self.endpoint, e);
                Err(e)
            }
        }
    }
}

/// Session lifecycle owner for one backend endpoint
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(
        endpoint: impl Into<String>,
        device_id: impl Into<String>,
        handshaker: Arc<dyn Handshaker>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoint: endpoint.into(),
                device_id: device_id.into(),
                handshaker,
                settings,
                state: Mutex::new(ManagerState::default()),
                handshakes_started: AtomicU64::new(0),
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Return a live session, establishing or refreshing it if needed.
    ///
    /// Callers arriving while a handshake is in flight await that same
    /// handshake. Failures are not retried here; they propagate to every
    /// waiter and the next call starts a fresh attempt.
    pub async fn ensure_session(&self) -> Result<Arc<EncryptionSession>, SessionError> {
        let pending: PendingHandshake = {
            let mut state = self.inner.lock_state();
            if let Some(session) = &state.active {
                if !session.needs_refresh_at(Utc::now(), self.inner.refresh_margin_for(session)) {
                    return Ok(Arc::clone(session));
                }
            }

            match state.pending.as_ref().and_then(WeakShared::upgrade) {
                Some(in_flight) => {
                    debug!("Joining in-flight handshake with {}", self.inner.endpoint);
                    in_flight
                }
                None => {
                    let carried = state
                        .active
                        .as_ref()
                        .and_then(|s| s.bound_identity().map(str::to_owned));
                    let handshake = Arc::clone(&self.inner)
                        .establish(state.epoch, carried)
                        .boxed()
                        .shared();
                    state.pending = handshake.downgrade();
                    handshake
                }
            }
        };

        pending.await
    }

    /// Non-blocking `now < expires_at` check on the current session
    pub fn has_valid_session(&self) -> bool {
        self.inner
            .lock_state()
            .active
            .as_ref()
            .is_some_and(|s| s.is_valid_at(Utc::now()))
    }

    /// Current session, live or expired, without triggering a handshake
    pub fn current_session(&self) -> Option<Arc<EncryptionSession>> {
        self.inner.lock_state().active.clone()
    }

    /// Attach an authenticated identity to the current session.
    ///
    /// Key material is unchanged. Binding the same identity twice is a no-op.
    pub fn bind_to_user(&self, identity: &str) -> Result<Arc<EncryptionSession>, SessionError> {
        let mut state = self.inner.lock_state();
        let session = state.active.clone().ok_or(SessionError::NoActiveSession)?;
        if !session.is_valid_at(Utc::now()) {
            return Err(SessionError::SessionExpired);
        }

        match session.bound_identity() {
            Some(bound) if bound == identity => Ok(session),
            Some(bound) => Err(SessionError::AlreadyBoundToDifferentIdentity {
                bound: bound.to_string(),
                requested: identity.to_string(),
            }),
            None => {
                let bound = Arc::new(session.with_bound_identity(identity));
                state.active = Some(Arc::clone(&bound));
                info!(
                    "Session {} bound to authenticated identity",
                    bound.session_id()
                );
                Ok(bound)
            }
        }
    }

    /// Drop the session, its derived keys and any in-flight handshake result
    pub fn invalidate(&self) {
        let mut state = self.inner.lock_state();
        let previous = state.active.take();
        state.keys.clear();
        state.pending = None;
        state.epoch += 1;
        state.invalidated = true;
        match previous {
            Some(session) => info!(
                "🗑️  Session {} with {} invalidated",
                session.session_id(),
                self.inner.endpoint
            ),
            None => debug!("Invalidate on {} with no active session", self.inner.endpoint),
        }
    }

    /// Run `f` with the key set for `section` of session `session_id`.
    ///
    /// Keys are derived on first use and cached until the session is
    /// replaced or invalidated. Fails with `SessionExpired` if `session_id`
    /// is no longer the live session.
    pub fn with_keys<R>(
        &self,
        session_id: &str,
        section: &str,
        f: impl FnOnce(&DerivedKeySet) -> R,
    ) -> Result<R, SessionError> {
        let keys = self.keys_for(session_id, section)?;
        Ok(f(&keys))
    }

    /// Key set for `section` of the live session `session_id`.
    ///
    /// The handle is for one in-flight request: it keeps working after the
    /// session is replaced, so a response can be decoded with the keys its
    /// request was sent under. Do not store it beyond that request.
    pub fn keys_for(
        &self,
        session_id: &str,
        section: &str,
    ) -> Result<Arc<DerivedKeySet>, SessionError> {
        let keys = {
            let mut state = self.inner.lock_state();
            let session = state
                .active
                .as_ref()
                .filter(|s| s.session_id() == session_id && s.is_valid_at(Utc::now()))
                .cloned()
                .ok_or(SessionError::SessionExpired)?;

            match state.keys.get(section) {
                Some(keys) => Arc::clone(keys),
                None => {
                    let keys = DerivedKeySet::derive(&session, section).map_err(|e| {
                        SessionError::KeyDerivationFailed {
                            section: section.to_string(),
                            reason: e.to_string(),
                        }
                    })?;
                    debug!(
                        "Derived keys for section '{}' of session {}",
                        section, session_id
                    );
                    let keys = Arc::new(keys);
                    state.keys.insert(section.to_string(), Arc::clone(&keys));
                    keys
                }
            }
        };

        Ok(keys)
    }

    pub fn state(&self) -> SessionState {
        let state = self.inner.lock_state();
        if state.pending.as_ref().and_then(WeakShared::upgrade).is_some() {
            return SessionState::Establishing;
        }
        match &state.active {
            Some(session) if !session.is_valid_at(Utc::now()) => SessionState::Expired,
            Some(session) if session.is_bound() => SessionState::BoundActive,
            Some(_) => SessionState::AnonymousActive,
            None if state.invalidated => SessionState::Invalidated,
            None => SessionState::Uninitialized,
        }
    }

    /// Number of handshakes started over this manager's lifetime
    pub fn handshake_count(&self) -> u64 {
        self.inner.handshakes_started.load(Ordering::SeqCst)
    }

    /// Number of sections with cached keys for the live session
    pub fn cached_sections(&self) -> usize {
        self.inner.lock_state().keys.len()
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("endpoint", &self.inner.endpoint)
            .field("state", &self.state())
            .finish()
    }
}
