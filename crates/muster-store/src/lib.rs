// Copyright (C) 2026 Muster Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Muster Store - Document Store & Optimistic Transaction Engine
//!
//! This crate provides the persistence primitive the rest of muster is built
//! on: a collection-oriented document store whose single write primitive is
//! "apply this list of per-document (assert, mutate) ops atomically, or
//! reject the whole list". On top of that primitive sits an optimistic
//! transaction engine that retries a caller-supplied transaction descriptor
//! a bounded number of times when a concurrent writer invalidates its
//! assertions.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    muster-state                             │
//! │   (machine lifecycle, model migration, presence)            │
//! └─────────────────────────────────────────────────────────────┘
//!            │ transaction descriptors          │ reads
//!            ▼                                  ▼
//! ┌───────────────────────┐        ┌────────────────────────────┐
//! │   engine::run         │───────▶│   DocumentStore            │
//! │ reconcile / build_ops │ apply  │  apply / find / list /     │
//! │   bounded retry       │        │  next_sequence             │
//! └───────────────────────┘        └────────────────────────────┘
//!                                        │              │
//!                                        ▼              ▼
//!                                  ┌──────────┐  ┌─────────────┐
//!                                  │ Memory   │  │  SQLite     │
//!                                  │ Store    │  │  Store      │
//!                                  └──────────┘  └─────────────┘
//! ```
//!
//! # Consistency contract
//!
//! A committed op set was built from a state snapshot that still held at the
//! instant of commit: every assertion in the set is checked against current
//! state inside the same atomic apply that performs the mutations. Two
//! op sets racing on the same document-level assertion commit at most one
//! per round; the loser surfaces as [`error::StoreError::Rejected`] and is
//! retried by the engine until its attempt budget runs out, at which point
//! the caller sees [`error::StoreError::ExcessiveContention`].
//!
//! # Modules
//!
//! - [`clock`]: Injected time source so timestamping is deterministic in tests
//! - [`engine`]: Bounded-retry optimistic transaction engine
//! - [`error`]: Store error types
//! - [`memory`]: In-memory backend for tests and embedded use
//! - [`ops`]: Per-document (assert, mutate) op values
//! - [`sqlite`]: SQLite-backed store
//! - [`store`]: The `DocumentStore` trait

#![deny(missing_docs)]

/// Injected clock so timestamp behavior is deterministically testable.
pub mod clock;

/// Optimistic transaction engine: reconcile / build_ops / bounded retry.
pub mod engine;

/// Error types for store operations.
pub mod error;

/// In-memory document store backend.
pub mod memory;

/// Transaction op values: assertions and mutations against one document.
pub mod ops;

/// SQLite-backed document store.
pub mod sqlite;

/// The document store trait implemented by every backend.
pub mod store;
