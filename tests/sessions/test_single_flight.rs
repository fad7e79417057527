// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Concurrent establishment performs exactly one handshake

use std::time::Duration;

use futures_util::future::join_all;
use portal_secure_transport::session::SessionState;

use super::support::{manager, CountingHandshaker};

#[tokio::test]
async fn test_concurrent_callers_share_one_handshake() {
    let handshaker = CountingHandshaker::new(Duration::from_millis(50), 600);
    let manager = manager(&handshaker);

    let results = join_all((0..16).map(|_| manager.ensure_session())).await;

    assert_eq!(handshaker.calls(), 1);
    assert_eq!(manager.handshake_count(), 1);
    for result in results {
        assert_eq!(result.unwrap().session_id(), "sess-1");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_flight_across_threads() {
    let handshaker = CountingHandshaker::new(Duration::from_millis(50), 600);
    let manager = manager(&handshaker);

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.ensure_session().await })
        })
        .collect();

    for task in join_all(tasks).await {
        let session = task.unwrap().unwrap();
        assert_eq!(session.session_id(), "sess-1");
    }
    assert_eq!(handshaker.calls(), 1);
}

#[tokio::test]
async fn test_failure_reaches_every_waiter_then_clears() {
    let handshaker = CountingHandshaker::scripted(Duration::from_millis(20), vec![None, Some(600)]);
    let manager = manager(&handshaker);

    let results = join_all((0..8).map(|_| manager.ensure_session())).await;
    assert_eq!(handshaker.calls(), 1);
    assert!(results.iter().all(|r| r.as_ref().is_err_and(|e| e.is_retryable())));
    assert_eq!(manager.state(), SessionState::Uninitialized);

    let session = manager.ensure_session().await.unwrap();
    assert_eq!(session.session_id(), "sess-2");
    assert_eq!(handshaker.calls(), 2);
}

#[tokio::test]
async fn test_abandoned_handshake_leaves_no_session() {
    let handshaker = CountingHandshaker::new(Duration::from_millis(200), 600);
    let manager = manager(&handshaker);

    let abandoned = tokio::time::timeout(Duration::from_millis(20), manager.ensure_session()).await;
    assert!(abandoned.is_err());
    assert!(manager.current_session().is_none());
    assert!(!manager.has_valid_session());
    assert_ne!(manager.state(), SessionState::Establishing);

    let session = manager.ensure_session().await.unwrap();
    assert_eq!(session.session_id(), "sess-2");
}

#[tokio::test]
async fn test_invalidate_during_handshake_discards_result() {
    let handshaker = CountingHandshaker::new(Duration::from_millis(100), 600);
    let manager = manager(&handshaker);

    let waiter = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.ensure_session().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    manager.invalidate();

    let delivered = waiter.await.unwrap().unwrap();
    assert_eq!(delivered.session_id(), "sess-1");
    assert!(manager.current_session().is_none());
    assert_eq!(manager.state(), SessionState::Invalidated);

    let fresh = manager.ensure_session().await.unwrap();
    assert_eq!(fresh.session_id(), "sess-2");
}
