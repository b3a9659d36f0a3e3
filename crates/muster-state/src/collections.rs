// Copyright (C) 2026 Muster Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Logical collection names in the backing document store.

/// Machine entity documents, keyed by machine id.
pub const MACHINES: &str = "machines";

/// Child-container references per machine, keyed by parent machine id.
pub const CONTAINER_REFS: &str = "container_refs";

/// Model documents, keyed by model UUID.
pub const MODELS: &str = "models";

/// Immutable migration descriptors, keyed by `"<model_uuid>:<attempt>"`.
pub const MIGRATIONS: &str = "migrations";

/// Mutable migration status documents, same keys as [`MIGRATIONS`].
pub const MIGRATIONS_STATUS: &str = "migrations_status";

/// Active-migration markers, keyed by model UUID. A document exists here
/// iff a migration is currently in progress for that model.
pub const MIGRATIONS_ACTIVE: &str = "migrations_active";

/// Presence heartbeat records, keyed by watched key.
pub const PRESENCE: &str = "presence";

/// Per-entity status documents, removed during machine cleanup.
pub const STATUSES: &str = "statuses";

/// Per-entity provisioning constraints, removed during machine cleanup.
pub const CONSTRAINTS: &str = "constraints";

/// Per-entity annotation maps, removed during machine cleanup.
pub const ANNOTATIONS: &str = "annotations";
