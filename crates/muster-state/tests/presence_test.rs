// Copyright (C) 2026 Muster Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for heartbeat pingers and the presence watcher.
//!
//! All tests run with the tokio clock paused, so intervals and timeouts
//! elapse in virtual time and complete in milliseconds of real time.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::TestContext;
use muster_state::collections;
use muster_state::error::StateError;
use muster_state::presence::{PresenceWatcher, STALE_POLLS};
use muster_store::ops::Op;
use muster_store::store::DocumentStore;

const PING: Duration = Duration::from_millis(10);
const POLL: Duration = Duration::from_millis(25);

fn store(ctx: &TestContext) -> Arc<dyn DocumentStore> {
    ctx.store.clone()
}

/// Let the watcher complete at least `n` polls of virtual time.
async fn polls(n: u32) {
    tokio::time::sleep(POLL * n + Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_unknown_key_is_dead() {
    let ctx = TestContext::new().await;
    let watcher = PresenceWatcher::start(store(&ctx), POLL);
    polls(2).await;
    assert!(!watcher.is_alive("m#0").await);
}

#[tokio::test(start_paused = true)]
async fn test_pinger_makes_key_alive() {
    let ctx = TestContext::new().await;
    let machine = ctx.state.add_machine("0", vec![]).await.unwrap();
    let watcher = PresenceWatcher::start(store(&ctx), POLL);

    let pinger = machine.set_agent_alive(PING);
    polls(2).await;
    assert!(machine.agent_alive(&watcher).await);
    assert!(watcher.is_alive("m#0").await);

    pinger.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stopped_pinger_goes_stale_then_dead() {
    let ctx = TestContext::new().await;
    let machine = ctx.state.add_machine("0", vec![]).await.unwrap();
    let watcher = PresenceWatcher::start(store(&ctx), POLL);

    let pinger = machine.set_agent_alive(PING);
    polls(2).await;
    assert!(watcher.is_alive("m#0").await);

    // stop() leaves the record; death comes from the stale window.
    pinger.stop().await;
    polls(STALE_POLLS + 1).await;
    assert!(!watcher.is_alive("m#0").await);

    let record = ctx
        .store
        .find(collections::PRESENCE, "m#0")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record["alive"], serde_json::json!(true));
}

#[tokio::test(start_paused = true)]
async fn test_killed_pinger_is_dead_on_next_poll() {
    let ctx = TestContext::new().await;
    let machine = ctx.state.add_machine("0", vec![]).await.unwrap();
    let watcher = PresenceWatcher::start(store(&ctx), POLL);

    let pinger = machine.set_agent_alive(PING);
    polls(2).await;
    assert!(watcher.is_alive("m#0").await);

    pinger.kill().await.unwrap();
    polls(1).await;
    assert!(!watcher.is_alive("m#0").await);

    let record = ctx
        .store
        .find(collections::PRESENCE, "m#0")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record["alive"], serde_json::json!(false));
}

#[tokio::test(start_paused = true)]
async fn test_vanished_record_is_dead() {
    let ctx = TestContext::new().await;
    let machine = ctx.state.add_machine("0", vec![]).await.unwrap();
    let watcher = PresenceWatcher::start(store(&ctx), POLL);

    let pinger = machine.set_agent_alive(PING);
    polls(2).await;
    assert!(watcher.is_alive("m#0").await);
    pinger.stop().await;

    ctx.store
        .apply(&[Op::remove(collections::PRESENCE, "m#0")])
        .await
        .unwrap();
    polls(1).await;
    assert!(!watcher.is_alive("m#0").await);
}

#[tokio::test(start_paused = true)]
async fn test_watch_delivers_current_state_immediately() {
    let ctx = TestContext::new().await;
    let watcher = PresenceWatcher::start(store(&ctx), POLL);
    polls(1).await;

    let mut changes = watcher.watch("m#0").await;
    let first = changes.recv().await.unwrap();
    assert_eq!(first.key, "m#0");
    assert!(!first.alive);

    // The alive transition arrives as a change.
    let machine = ctx.state.add_machine("0", vec![]).await.unwrap();
    let pinger = machine.set_agent_alive(PING);
    let change = changes.recv().await.unwrap();
    assert!(change.alive);
    pinger.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_wait_alive_returns_when_agent_comes_up() {
    let ctx = TestContext::new().await;
    let machine = ctx.state.add_machine("0", vec![]).await.unwrap();
    let watcher = PresenceWatcher::start(store(&ctx), POLL);

    // Start the agent only after the wait is already in flight.
    let (waited, pinger) = tokio::join!(
        machine.wait_agent_alive(&watcher, Duration::from_secs(10)),
        async {
            polls(3).await;
            machine.set_agent_alive(PING)
        },
    );
    waited.unwrap();
    assert!(watcher.is_alive("m#0").await);
    pinger.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_wait_alive_times_out() {
    let ctx = TestContext::new().await;
    let machine = ctx.state.add_machine("0", vec![]).await.unwrap();
    let watcher = PresenceWatcher::start(store(&ctx), POLL);

    let err = machine
        .wait_agent_alive(&watcher, Duration::from_millis(200))
        .await
        .unwrap_err();
    match err {
        StateError::PresenceTimeout { key } => assert_eq!(key, "m#0"),
        other => panic!("expected PresenceTimeout, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_wait_alive_already_alive_returns_immediately() {
    let ctx = TestContext::new().await;
    let machine = ctx.state.add_machine("0", vec![]).await.unwrap();
    let watcher = PresenceWatcher::start(store(&ctx), POLL);

    let pinger = machine.set_agent_alive(PING);
    polls(2).await;

    machine
        .wait_agent_alive(&watcher, Duration::from_millis(1))
        .await
        .unwrap();
    pinger.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stopping_watcher_fails_waiters() {
    let ctx = TestContext::new().await;
    let machine = ctx.state.add_machine("0", vec![]).await.unwrap();
    let watcher = PresenceWatcher::start(store(&ctx), POLL);

    let (waited, ()) = tokio::join!(
        machine.wait_agent_alive(&watcher, Duration::from_secs(60)),
        async {
            polls(2).await;
            watcher.stop().await;
        },
    );
    assert!(matches!(
        waited.unwrap_err(),
        StateError::WatcherTerminated { .. }
    ));

    // A dead watcher answers point queries from its last poll but never
    // again observes anything.
    let pinger = machine.set_agent_alive(PING);
    polls(3).await;
    assert!(!watcher.is_alive("m#0").await);
    pinger.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_two_pingers_same_key_coexist() {
    let ctx = TestContext::new().await;
    let machine = ctx.state.add_machine("0", vec![]).await.unwrap();
    let watcher = PresenceWatcher::start(store(&ctx), POLL);

    // A restarted agent overlapping with its predecessor must not flap
    // the key dead; generation bumps interleave safely.
    let old = machine.set_agent_alive(PING);
    let new = machine.set_agent_alive(PING);
    polls(3).await;
    assert!(watcher.is_alive("m#0").await);

    old.stop().await;
    polls(STALE_POLLS + 1).await;
    assert!(watcher.is_alive("m#0").await);
    new.stop().await;
}
