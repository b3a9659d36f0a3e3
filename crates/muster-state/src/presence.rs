// Copyright (C) 2026 Muster Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Agent liveness: heartbeat pingers and the presence watcher.
//!
//! Liveness is generation-based, not timestamp-based, so it needs no
//! clock agreement between writers and readers. A [`Pinger`] bumps a
//! generation counter on its key's presence record every period. The
//! [`PresenceWatcher`] polls the presence collection and calls a key
//! alive while its generation keeps advancing between polls; a record
//! whose generation sits still for [`STALE_POLLS`] consecutive polls,
//! or that is marked `alive: false`, or that is missing, is dead.
//!
//! An unknown key is dead. New subscribers immediately receive the
//! current state for their key, then a change per transition.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use muster_store::error::StoreError;
use muster_store::ops::{Assert, Op, field_set};
use muster_store::store::DocumentStore;
use serde::{Deserialize, Serialize};
use serde_json::{json, to_value};
use tokio::sync::{Mutex, Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::collections;
use crate::error::{Result, StateError};

/// Default interval between heartbeat writes.
pub const DEFAULT_PING_PERIOD: Duration = Duration::from_millis(500);

/// Default interval between watcher polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Polls a generation may sit unchanged before its key is dead. Two, so
/// a ping landing just after a poll still has a full interval to land
/// before the verdict.
pub const STALE_POLLS: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PresenceDoc {
    generation: i64,
    alive: bool,
}

/// A liveness transition for one presence key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// The presence key that changed.
    pub key: String,
    /// The new aliveness verdict.
    pub alive: bool,
}

/// Background heartbeat for one presence key.
///
/// Dropping a pinger aborts its task without touching the record; the
/// watcher will declare the key dead once the generation goes stale.
pub struct Pinger {
    store: Arc<dyn DocumentStore>,
    key: String,
    shutdown: Arc<Notify>,
    handle: Option<JoinHandle<()>>,
}

impl Pinger {
    /// Start pinging `key` every `period`. The first ping is written
    /// immediately.
    pub fn start(store: Arc<dyn DocumentStore>, key: String, period: Duration) -> Self {
        let shutdown = Arc::new(Notify::new());
        let task_store = store.clone();
        let task_key = key.clone();
        let task_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = task_shutdown.notified() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = bump_generation(task_store.as_ref(), &task_key).await {
                            warn!(key = %task_key, error = %err, "presence ping failed");
                        }
                    }
                }
            }
            debug!(key = %task_key, "pinger stopped");
        });
        Pinger {
            store,
            key,
            shutdown,
            handle: Some(handle),
        }
    }

    /// The key this pinger maintains.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Stop pinging, leaving the record in place. The key will read as
    /// dead once the watcher sees the generation go stale.
    pub async fn stop(mut self) {
        self.shutdown.notify_one();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    /// Stop pinging and mark the record not alive, so the key reads as
    /// dead on the watcher's next poll rather than after the stale
    /// window.
    pub async fn kill(mut self) -> Result<()> {
        self.shutdown.notify_one();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        mark_dead(self.store.as_ref(), &self.key).await
    }
}

impl Drop for Pinger {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

/// Insert-or-advance of a presence record. Retried on rejection: only
/// another writer on the same key can invalidate the generation assert.
async fn bump_generation(store: &dyn DocumentStore, key: &str) -> Result<()> {
    for _ in 0..3 {
        let op = match read_doc(store, key).await? {
            None => Op::insert(
                collections::PRESENCE,
                key,
                to_value(PresenceDoc {
                    generation: 1,
                    alive: true,
                })
                .map_err(StoreError::from)?,
            ),
            Some(doc) => Op::update(
                collections::PRESENCE,
                key,
                Assert::fields([("generation", json!(doc.generation))]),
                field_set([
                    ("generation", json!(doc.generation + 1)),
                    ("alive", json!(true)),
                ]),
            ),
        };
        match store.apply(&[op]).await {
            Ok(()) => return Ok(()),
            Err(err) if err.is_rejected() => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Err(StateError::ExcessiveContention)
}

async fn mark_dead(store: &dyn DocumentStore, key: &str) -> Result<()> {
    for _ in 0..3 {
        let op = match read_doc(store, key).await? {
            None => Op::insert(
                collections::PRESENCE,
                key,
                to_value(PresenceDoc {
                    generation: 1,
                    alive: false,
                })
                .map_err(StoreError::from)?,
            ),
            Some(doc) => Op::update(
                collections::PRESENCE,
                key,
                Assert::fields([("generation", json!(doc.generation))]),
                field_set([("alive", json!(false))]),
            ),
        };
        match store.apply(&[op]).await {
            Ok(()) => return Ok(()),
            Err(err) if err.is_rejected() => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Err(StateError::ExcessiveContention)
}

async fn read_doc(store: &dyn DocumentStore, key: &str) -> Result<Option<PresenceDoc>> {
    let Some(value) = store.find(collections::PRESENCE, key).await? else {
        return Ok(None);
    };
    Ok(Some(
        serde_json::from_value(value).map_err(StoreError::from)?,
    ))
}

struct KeyState {
    generation: i64,
    stale_polls: u32,
    alive: bool,
}

#[derive(Default)]
struct WatcherInner {
    states: HashMap<String, KeyState>,
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<Change>>>,
}

/// Background poller deriving per-key aliveness verdicts and fanning
/// transitions out to subscribers.
pub struct PresenceWatcher {
    inner: Arc<Mutex<WatcherInner>>,
    shutdown: Arc<Notify>,
    terminal: watch::Receiver<Option<String>>,
    handle: Option<JoinHandle<()>>,
}

impl PresenceWatcher {
    /// Start polling the presence collection every `poll_interval`.
    pub fn start(store: Arc<dyn DocumentStore>, poll_interval: Duration) -> Self {
        let inner = Arc::new(Mutex::new(WatcherInner::default()));
        let shutdown = Arc::new(Notify::new());
        let (terminal_tx, terminal_rx) = watch::channel(None);

        let task_inner = inner.clone();
        let task_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            let reason = loop {
                tokio::select! {
                    _ = task_shutdown.notified() => break "watcher stopped".to_string(),
                    _ = ticker.tick() => {
                        if let Err(err) = poll_once(store.as_ref(), &task_inner).await {
                            error!(error = %err, "presence poll failed, watcher terminating");
                            break err.to_string();
                        }
                    }
                }
            };
            // Waiters learn of termination through the watch channel and
            // through their change channels closing.
            task_inner.lock().await.subscribers.clear();
            let _ = terminal_tx.send(Some(reason));
        });

        PresenceWatcher {
            inner,
            shutdown,
            terminal: terminal_rx,
            handle: Some(handle),
        }
    }

    /// Whether `key` was alive as of the last completed poll. Unknown
    /// keys are dead.
    pub async fn is_alive(&self, key: &str) -> bool {
        let inner = self.inner.lock().await;
        inner.states.get(key).is_some_and(|s| s.alive)
    }

    /// Subscribe to liveness transitions for `key`. The current state is
    /// delivered immediately; the channel closes when the watcher
    /// terminates.
    pub async fn watch(&self, key: &str) -> mpsc::UnboundedReceiver<Change> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().await;
        let alive = inner.states.get(key).is_some_and(|s| s.alive);
        let _ = tx.send(Change {
            key: key.to_string(),
            alive,
        });
        inner
            .subscribers
            .entry(key.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Block until `key` is alive.
    ///
    /// The first observation is the current state; a not-alive current
    /// state just means we wait for the transition. Subscribers receive
    /// every transition in order, so a second not-alive observation
    /// requires the intervening alive transition to have been lost; that
    /// is a delivery-invariant breach reported as
    /// [`StateError::InvariantViolated`], not a condition to wait out.
    pub async fn wait_alive(&self, key: &str, timeout: Duration) -> Result<()> {
        if let Some(reason) = self.terminal.borrow().clone() {
            return Err(StateError::WatcherTerminated { reason });
        }
        let mut changes = self.watch(key).await;
        let mut terminal = self.terminal.clone();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let mut dead_observations = 0u32;
        loop {
            tokio::select! {
                _ = &mut deadline => {
                    return Err(StateError::PresenceTimeout {
                        key: key.to_string(),
                    });
                }
                changed = terminal.changed() => {
                    let reason = match changed {
                        Ok(()) => terminal
                            .borrow()
                            .clone()
                            .unwrap_or_else(|| "watcher stopped".to_string()),
                        Err(_) => "watcher stopped".to_string(),
                    };
                    return Err(StateError::WatcherTerminated { reason });
                }
                change = changes.recv() => match change {
                    Some(change) if change.alive => return Ok(()),
                    Some(_) => {
                        dead_observations += 1;
                        if dead_observations >= 2 {
                            return Err(StateError::InvariantViolated {
                                detail: format!(
                                    "presence key {} reported dead twice while waiting",
                                    key,
                                ),
                            });
                        }
                    }
                    None => {
                        return Err(StateError::WatcherTerminated {
                            reason: "watcher stopped".to_string(),
                        });
                    }
                },
            }
        }
    }

    /// Stop the watcher and wait until it has terminated. Outstanding
    /// waiters fail with [`StateError::WatcherTerminated`].
    pub async fn stop(&self) {
        self.shutdown.notify_one();
        let mut terminal = self.terminal.clone();
        while terminal.borrow_and_update().is_none() {
            if terminal.changed().await.is_err() {
                break;
            }
        }
    }
}

impl Drop for PresenceWatcher {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

/// One poll pass: read the whole presence collection, update per-key
/// verdicts, fan out transitions.
async fn poll_once(store: &dyn DocumentStore, inner: &Mutex<WatcherInner>) -> Result<()> {
    let docs = store.list(collections::PRESENCE).await?;

    let mut inner = inner.lock().await;
    let mut transitions = Vec::new();
    let mut seen = HashMap::new();

    for (key, value) in docs {
        let doc: PresenceDoc = serde_json::from_value(value).map_err(StoreError::from)?;
        let previous = inner.states.get(&key);
        let state = match previous {
            Some(prev) if prev.generation == doc.generation => {
                let stale_polls = prev.stale_polls + 1;
                KeyState {
                    generation: doc.generation,
                    stale_polls,
                    alive: doc.alive && stale_polls < STALE_POLLS && prev.alive,
                }
            }
            _ => KeyState {
                generation: doc.generation,
                stale_polls: 0,
                alive: doc.alive,
            },
        };
        let was_alive = previous.is_some_and(|s| s.alive);
        if state.alive != was_alive {
            transitions.push(Change {
                key: key.clone(),
                alive: state.alive,
            });
        }
        seen.insert(key, state);
    }

    // Keys whose record vanished are dead.
    for (key, state) in inner.states.drain() {
        if state.alive && !seen.contains_key(&key) {
            transitions.push(Change {
                key,
                alive: false,
            });
        }
    }
    inner.states = seen;

    for change in transitions {
        debug!(key = %change.key, alive = change.alive, "presence transition");
        if let Some(senders) = inner.subscribers.get_mut(&change.key) {
            senders.retain(|tx| tx.send(change.clone()).is_ok());
        }
    }
    Ok(())
}
