// Copyright (C) 2026 Muster Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Muster State - Lifecycle, Migration & Presence Core
//!
//! This crate is the consistency core of the muster orchestrator: it tracks
//! the lifecycle of managed entities in a shared document store accessed
//! concurrently by many controller and agent processes, with no central
//! lock manager. Every state transition is an optimistic transaction whose
//! assertions prove, at commit time, that the state it was built from still
//! holds; racing writers lose the atomic apply and either converge on a
//! no-op or surface a definitive guard failure.
//!
//! # Machine lifecycle
//!
//! ```text
//!           ┌───────┐  destroy   ┌───────┐  ensure_dead  ┌──────┐  remove
//!           │ ALIVE │───────────▶│ DYING │──────────────▶│ DEAD │─────────▶ (gone)
//!           └───────┘            └───────┘               └──────┘
//! ```
//!
//! Guards: a machine holding the cluster-manager role, with units assigned,
//! or hosting containers never leaves Alive. Life never decreases once
//! persisted.
//!
//! # Migration phases
//!
//! ```text
//! QUIESCE ─▶ READONLY ─▶ PRECHECK ─▶ IMPORT ─▶ VALIDATION ─▶ SUCCESS
//!    │          │           │          │           │             │
//!    └──────────┴───────────┴──────────┴───────────┘          LOGTRANSFER
//!                           │                                     │
//!                           ▼                                   REAP
//!                         ABORT ─▶ ABORTDONE            ┌─────────┴────────┐
//!                                                       ▼                  ▼
//!                                                     DONE            REAPFAILED
//! ```
//!
//! Terminal phases (DONE, REAPFAILED, ABORTDONE) atomically delete the
//! per-model active-migration marker in the same op set that records the
//! phase.
//!
//! # Modules
//!
//! - [`collections`]: Logical collection names in the backing store
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error taxonomy for state operations
//! - [`life`]: The ordered Alive/Dying/Dead lifecycle value
//! - [`machine`]: Machine entities and the lifecycle state machine
//! - [`migration`]: Model migration phases, documents, and operations
//! - [`model`]: The owning model document
//! - [`presence`]: Heartbeat pinger and liveness watcher
//! - [`state`]: The per-model `State` handle everything hangs off

#![deny(missing_docs)]

/// Logical collection names in the backing document store.
pub mod collections;

/// Configuration loaded from environment variables.
pub mod config;

/// Error types for state operations.
pub mod error;

/// The ordered entity lifecycle value.
pub mod life;

/// Machine entities and the lifecycle state machine.
pub mod machine;

/// Model migration phase state machine.
pub mod migration;

/// The owning model document.
pub mod model;

/// Heartbeat-based agent liveness.
pub mod presence;

/// The per-model state handle.
pub mod state;
