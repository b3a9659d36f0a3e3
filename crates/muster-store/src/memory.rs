// Copyright (C) 2026 Muster Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory document store backend.
//!
//! Used by tests and embedded scenarios. A single async mutex over the
//! collection maps makes every `apply` atomic and linearized against all
//! concurrent callers, which is exactly the contract the SQLite backend
//! provides through database transactions.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::ops::{Mutate, Op};
use crate::store::DocumentStore;

type Collections = HashMap<String, BTreeMap<String, Value>>;

#[derive(Default)]
struct Inner {
    collections: Collections,
    sequences: HashMap<String, i64>,
    committed_writes: u64,
}

/// In-memory [`DocumentStore`] implementation.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed op sets that contained at least one mutation.
    /// Lets tests assert that an operation succeeded with zero writes.
    pub async fn committed_writes(&self) -> u64 {
        self.inner.lock().await.committed_writes
    }
}

/// Check one op against the staged state and apply its mutation.
///
/// Ops later in a set observe the mutations of earlier ops, so patterns
/// like remove-then-insert of the same id work; a failed assertion (or a
/// structurally inapplicable mutation) rejects the whole set.
fn check_and_apply(staged: &mut Collections, op: &Op) -> Result<(), StoreError> {
    let docs = staged.entry(op.collection.to_string()).or_default();
    let current = docs.get(&op.id);
    if !op.assert.holds(current) {
        return Err(StoreError::Rejected);
    }
    match &op.mutate {
        Mutate::Insert(doc) => {
            if current.is_some() {
                return Err(StoreError::Rejected);
            }
            docs.insert(op.id.clone(), doc.clone());
        }
        Mutate::Update(fields) => {
            let Some(Value::Object(obj)) = docs.get_mut(&op.id) else {
                return Err(StoreError::Rejected);
            };
            for (name, value) in fields {
                obj.insert(name.clone(), value.clone());
            }
        }
        Mutate::Remove => {
            if docs.remove(&op.id).is_none() {
                return Err(StoreError::Rejected);
            }
        }
        Mutate::None => {}
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn apply(&self, ops: &[Op]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        // Stage on a copy; swap in only when the whole set applies.
        let mut staged = inner.collections.clone();
        for op in ops {
            check_and_apply(&mut staged, op)?;
        }
        inner.collections = staged;
        if ops.iter().any(|op| op.mutate != Mutate::None) {
            inner.committed_writes += 1;
        }
        Ok(())
    }

    async fn find(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        let inner = self.inner.lock().await;
        let Some(docs) = inner.collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(docs
            .iter()
            .filter(|(_, doc)| doc.get(field) == Some(value))
            .map(|(id, doc)| (id.clone(), doc.clone()))
            .collect())
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let inner = self.inner.lock().await;
        let Some(docs) = inner.collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(docs
            .iter()
            .map(|(id, doc)| (id.clone(), doc.clone()))
            .collect())
    }

    async fn next_sequence(&self, name: &str) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().await;
        let value = inner.sequences.entry(name.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{Assert, field_set};
    use serde_json::json;

    #[tokio::test]
    async fn test_rejected_set_applies_nothing() {
        let store = MemoryStore::new();
        store
            .apply(&[Op::insert("c", "a", json!({"v": 1}))])
            .await
            .unwrap();

        // Second op fails its Missing assert; first op must not stick.
        let err = store
            .apply(&[
                Op::insert("c", "b", json!({"v": 2})),
                Op::insert("c", "a", json!({"v": 9})),
            ])
            .await
            .unwrap_err();
        assert!(err.is_rejected());
        assert!(store.find("c", "b").await.unwrap().is_none());
        assert_eq!(store.find("c", "a").await.unwrap().unwrap()["v"], json!(1));
        assert_eq!(store.committed_writes().await, 1);
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let store = MemoryStore::new();
        store
            .apply(&[Op::insert("c", "a", json!({"v": 1, "w": "x"}))])
            .await
            .unwrap();
        store
            .apply(&[Op::update(
                "c",
                "a",
                Assert::Exists,
                field_set([("v", json!(2))]),
            )])
            .await
            .unwrap();

        let doc = store.find("c", "a").await.unwrap().unwrap();
        assert_eq!(doc, json!({"v": 2, "w": "x"}));
    }

    #[tokio::test]
    async fn test_later_ops_see_earlier_mutations() {
        let store = MemoryStore::new();
        store
            .apply(&[Op::insert("c", "a", json!({"v": 1}))])
            .await
            .unwrap();

        // Remove-then-insert of the same id in one set.
        store
            .apply(&[
                Op::remove("c", "a"),
                Op::insert("c", "a", json!({"v": 2})),
            ])
            .await
            .unwrap();
        assert_eq!(store.find("c", "a").await.unwrap().unwrap()["v"], json!(2));
    }

    #[tokio::test]
    async fn test_assert_only_op_pins_other_document() {
        let store = MemoryStore::new();
        store
            .apply(&[Op::insert("models", "m", json!({"life": "alive"}))])
            .await
            .unwrap();

        let guarded = [
            Op::assert_only("models", "m", Assert::fields([("life", json!("alive"))])),
            Op::insert("c", "a", json!({})),
        ];
        store.apply(&guarded).await.unwrap();

        // Flip the model's life; the same guarded set now rejects.
        store
            .apply(&[
                Op::remove("c", "a"),
                Op::update(
                    "models",
                    "m",
                    Assert::Exists,
                    field_set([("life", json!("dying"))]),
                ),
            ])
            .await
            .unwrap();
        assert!(store.apply(&guarded).await.unwrap_err().is_rejected());
    }

    #[tokio::test]
    async fn test_sequences_are_monotonic_per_name() {
        let store = MemoryStore::new();
        assert_eq!(store.next_sequence("a").await.unwrap(), 1);
        assert_eq!(store.next_sequence("a").await.unwrap(), 2);
        assert_eq!(store.next_sequence("b").await.unwrap(), 1);
        assert_eq!(store.next_sequence("a").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_find_by_field() {
        let store = MemoryStore::new();
        store
            .apply(&[
                Op::insert("m", "x:1", json!({"model": "x", "n": 1})),
                Op::insert("m", "x:2", json!({"model": "x", "n": 2})),
                Op::insert("m", "y:1", json!({"model": "y", "n": 1})),
            ])
            .await
            .unwrap();

        let xs = store.find_by_field("m", "model", &json!("x")).await.unwrap();
        assert_eq!(xs.len(), 2);
        assert_eq!(xs[0].0, "x:1");
        assert_eq!(xs[1].0, "x:2");
    }
}
