// Copyright (C) 2026 Muster Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Optimistic transaction engine.
//!
//! A caller expresses a state transition as a [`Transaction`] descriptor:
//! `reconcile` inspects the latest persisted state relevant to the
//! transition (never mutating anything), then `build_ops` produces the op
//! set whose atomic application performs it, including whatever assertions
//! make it safe to apply only if the state has not changed since
//! `reconcile` observed it. The engine submits the set and, when a
//! concurrent writer invalidates an assertion, loops - up to a bound the
//! caller chooses, because the right bound is transition-specific.

use async_trait::async_trait;
use tracing::debug;

use crate::error::StoreError;
use crate::ops::Op;
use crate::store::DocumentStore;

/// What `reconcile` concluded about the transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconcile {
    /// The transition is still wanted; build and submit ops.
    Proceed,
    /// The target is already in the desired state (or gone past it);
    /// succeed without applying anything.
    Done,
}

/// How a successful run concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    /// An op set was applied.
    Applied,
    /// Nothing needed to be written.
    NoOp,
}

/// A transaction descriptor driven by [`run`].
#[async_trait]
pub trait Transaction {
    /// The caller's error type. Guard failures discovered during
    /// `reconcile` surface as this type and abort the run immediately;
    /// engine-level conditions convert in through `From<StoreError>`.
    type Error: From<StoreError> + Send;

    /// Inspect current persisted state and update descriptor-local fields.
    /// Must be safe to call repeatedly and must not mutate persisted state.
    /// `attempt` is 0 on the first try; descriptors typically skip the
    /// refetch on attempt 0 and work from the state they already hold.
    async fn reconcile(
        &mut self,
        store: &dyn DocumentStore,
        attempt: usize,
    ) -> Result<Reconcile, Self::Error>;

    /// Produce the op set representing the intended transition, built from
    /// the fields `reconcile` just observed.
    fn build_ops(&mut self) -> Result<Vec<Op>, Self::Error>;
}

/// Run a transaction descriptor against the store with a bounded number of
/// attempts.
///
/// Each attempt reconciles, builds ops, and submits. A rejected op set
/// costs one attempt; any other store error propagates unchanged.
/// Exhausting the budget without a definitive outcome surfaces as
/// [`StoreError::ExcessiveContention`] converted into the caller's error
/// type.
pub async fn run<T>(
    store: &dyn DocumentStore,
    txn: &mut T,
    max_attempts: usize,
) -> Result<Commit, T::Error>
where
    T: Transaction + Send,
{
    for attempt in 0..max_attempts {
        match txn.reconcile(store, attempt).await? {
            Reconcile::Done => return Ok(Commit::NoOp),
            Reconcile::Proceed => {}
        }

        let ops = txn.build_ops()?;
        match store.apply(&ops).await {
            Ok(()) => return Ok(Commit::Applied),
            Err(StoreError::Rejected) => {
                debug!(attempt, "op set rejected by concurrent writer, retrying");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Err(StoreError::ExcessiveContention.into())
}
