// Copyright (C) 2026 Muster Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The document store trait implemented by every backend.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;
use crate::ops::Op;

/// A collection-oriented document store with a single write primitive:
/// apply a list of per-document ops atomically, or reject the whole list.
///
/// Backends must linearize each applied op set against all other op sets
/// touching the same documents. There is no ordering guarantee across
/// independently submitted sets beyond what their assertions enforce.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Apply the op set atomically. Every assertion is checked against
    /// current state (as mutated by earlier ops in the same set); if any
    /// fails, nothing is written and [`StoreError::Rejected`] is returned.
    async fn apply(&self, ops: &[Op]) -> Result<(), StoreError>;

    /// Fetch a single document by id.
    async fn find(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError>;

    /// Fetch all documents in a collection whose named top-level field
    /// equals the given value, sorted by document id.
    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<(String, Value)>, StoreError>;

    /// Fetch every document in a collection, sorted by document id.
    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>, StoreError>;

    /// Allocate the next value of a monotonic per-name sequence. The first
    /// call for a name returns 1.
    async fn next_sequence(&self, name: &str) -> Result<i64, StoreError>;
}
