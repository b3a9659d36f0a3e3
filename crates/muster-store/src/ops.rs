// Copyright (C) 2026 Muster Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Transaction ops: per-document (assert, mutate) instructions.
//!
//! An [`Op`] targets exactly one document. A list of ops submitted together
//! through [`crate::store::DocumentStore::apply`] either applies in full or
//! rejects in full.

use serde_json::{Map, Value};

/// A predicate evaluated against the current state of one document at the
/// moment the op set is applied.
#[derive(Debug, Clone, PartialEq)]
pub enum Assert {
    /// The document must exist.
    Exists,
    /// The document must not exist.
    Missing,
    /// The document must exist and each named field must equal the given
    /// value. A field asserted as `null` matches an absent field.
    Fields(Map<String, Value>),
}

impl Assert {
    /// Build a field-equality assertion from (name, value) pairs.
    pub fn fields<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, Value)>,
    {
        let mut map = Map::new();
        for (name, value) in pairs {
            map.insert(name.to_string(), value);
        }
        Assert::Fields(map)
    }

    /// Evaluate this assertion against the document's current state.
    pub(crate) fn holds(&self, doc: Option<&Value>) -> bool {
        match self {
            Assert::Exists => doc.is_some(),
            Assert::Missing => doc.is_none(),
            Assert::Fields(fields) => match doc {
                Some(Value::Object(obj)) => fields.iter().all(|(name, want)| match obj.get(name) {
                    Some(have) => have == want,
                    None => want.is_null(),
                }),
                _ => false,
            },
        }
    }
}

/// The mutation half of an op.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutate {
    /// Insert the document. Rejected if the document already exists.
    Insert(Value),
    /// Merge the given fields into the document. Rejected if the document
    /// does not exist.
    Update(Map<String, Value>),
    /// Delete the document. Rejected if the document does not exist.
    Remove,
    /// No mutation; the op only pins its assertion into the atomic set.
    None,
}

/// A single (collection, document id, assertion, mutation) instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Op {
    /// Logical collection the document lives in.
    pub collection: &'static str,
    /// Document id within the collection.
    pub id: String,
    /// Predicate that must hold for the whole op set to apply.
    pub assert: Assert,
    /// Mutation performed when every assertion in the set holds.
    pub mutate: Mutate,
}

impl Op {
    /// Insert a new document, asserting it does not exist yet.
    pub fn insert(collection: &'static str, id: impl Into<String>, doc: Value) -> Self {
        Op {
            collection,
            id: id.into(),
            assert: Assert::Missing,
            mutate: Mutate::Insert(doc),
        }
    }

    /// Update fields of an existing document under the given assertion.
    pub fn update(
        collection: &'static str,
        id: impl Into<String>,
        assert: Assert,
        fields: Map<String, Value>,
    ) -> Self {
        Op {
            collection,
            id: id.into(),
            assert,
            mutate: Mutate::Update(fields),
        }
    }

    /// Remove a document, asserting it currently exists.
    pub fn remove(collection: &'static str, id: impl Into<String>) -> Self {
        Op {
            collection,
            id: id.into(),
            assert: Assert::Exists,
            mutate: Mutate::Remove,
        }
    }

    /// Assert-only op: pins a predicate into the atomic set without
    /// mutating the target document.
    pub fn assert_only(collection: &'static str, id: impl Into<String>, assert: Assert) -> Self {
        Op {
            collection,
            id: id.into(),
            assert,
            mutate: Mutate::None,
        }
    }
}

/// Build an update field set from (name, value) pairs.
pub fn field_set<I>(pairs: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (&'static str, Value)>,
{
    let mut map = Map::new();
    for (name, value) in pairs {
        map.insert(name.to_string(), value);
    }
    map
}
