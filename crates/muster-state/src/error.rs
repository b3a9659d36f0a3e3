// Copyright (C) 2026 Muster Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for state operations.
//!
//! The taxonomy separates conditions the caller can resolve by changing
//! state ([`StateError::HasAssignedUnits`], [`StateError::HasContainers`],
//! ...) from single-shot check failures ([`StateError::IllegalPhaseChange`],
//! [`StateError::PhaseAlreadyChanged`]) and from the one condition that
//! means "try again later": [`StateError::ExcessiveContention`]. Messages
//! name the offending entities because the top-level caller is typically a
//! human-facing operation.

use muster_store::error::StoreError;

use crate::migration::Phase;

/// Result type using StateError.
pub type Result<T> = std::result::Result<T, StateError>;

/// Errors that can occur during lifecycle, migration, and presence
/// operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StateError {
    /// A referenced entity or document is absent.
    #[error("{what} not found")]
    NotFound {
        /// Description of what was being looked up.
        what: String,
    },

    /// A machine cannot leave Alive while units are assigned to it.
    #[error("machine {machine_id} has units {} assigned", .unit_names.join(", "))]
    HasAssignedUnits {
        /// The machine that was asked to advance its lifecycle.
        machine_id: String,
        /// The principal units still assigned.
        unit_names: Vec<String>,
    },

    /// A machine cannot leave Alive while it hosts containers.
    #[error("machine {machine_id} is hosting containers {}", .container_ids.join(", "))]
    HasContainers {
        /// The machine that was asked to advance its lifecycle.
        machine_id: String,
        /// Ids of the hosted containers.
        container_ids: Vec<String>,
    },

    /// A machine holding the cluster-manager role can never die.
    #[error("machine {machine_id} is required by the cluster")]
    RequiredByCluster {
        /// The manager machine.
        machine_id: String,
    },

    /// The entity must be Alive for the requested operation.
    #[error("{what} is not alive")]
    NotAlive {
        /// Description of the entity.
        what: String,
    },

    /// The machine is already Dead, which forbids the operation.
    #[error("machine {machine_id} is dead")]
    MachineDead {
        /// The dead machine.
        machine_id: String,
    },

    /// Removal requires the machine to have reached Dead first.
    #[error("machine {machine_id} is not dead")]
    NotDead {
        /// The machine that was asked to be removed.
        machine_id: String,
    },

    /// Provisioning identifiers are set at most once.
    #[error("machine {machine_id} already has an instance id")]
    AlreadyProvisioned {
        /// The provisioned machine.
        machine_id: String,
    },

    /// A document that must be created exactly once already exists.
    #[error("{what} already exists")]
    AlreadyExists {
        /// Description of the conflicting document.
        what: String,
    },

    /// The requested phase is not reachable from the current phase.
    #[error("illegal phase change: {from} -> {to}")]
    IllegalPhaseChange {
        /// The phase the migration was observed in.
        from: Phase,
        /// The requested next phase.
        to: Phase,
    },

    /// Someone else advanced the phase first; re-read and re-decide.
    #[error("phase already changed")]
    PhaseAlreadyChanged,

    /// A migration is already running for the model.
    #[error("migration already in progress for model {model_uuid}")]
    MigrationInProgress {
        /// The model with the active migration.
        model_uuid: String,
    },

    /// The owning model must be Alive to start a migration.
    #[error("model {model_uuid} is not alive")]
    ModelNotAlive {
        /// The model's UUID.
        model_uuid: String,
    },

    /// Caller-supplied input failed validation.
    #[error("invalid {what}: {reason}")]
    InvalidSpec {
        /// What was being validated.
        what: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// A should-never-happen structural condition was observed. Surfaced
    /// as an error rather than a panic: this subsystem runs inside
    /// long-lived multi-tenant server processes.
    #[error("invariant violated: {detail}")]
    InvariantViolated {
        /// Description of the violated invariant.
        detail: String,
    },

    /// A retry budget was exhausted without a definitive guard failure.
    /// The only condition that implies "try again later".
    #[error("state is changing too quickly; try again later")]
    ExcessiveContention,

    /// The agent did not come alive within the caller's timeout.
    #[error("agent {key} still not alive after timeout")]
    PresenceTimeout {
        /// The watched presence key.
        key: String,
    },

    /// The presence watcher's background task died; fatal for all waiters
    /// on that watcher instance.
    #[error("presence watcher terminated: {reason}")]
    WatcherTerminated {
        /// The watcher's terminal error.
        reason: String,
    },

    /// A store-level failure other than rejection, propagated unchanged.
    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

impl StateError {
    /// Whether this error reports an absent entity.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StateError::NotFound { .. })
    }

    /// Whether retrying the same operation later can succeed without the
    /// caller changing anything first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StateError::ExcessiveContention)
    }
}

impl From<StoreError> for StateError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ExcessiveContention => StateError::ExcessiveContention,
            other => StateError::Store(other),
        }
    }
}
