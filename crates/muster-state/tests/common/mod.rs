// Copyright (C) 2026 Muster Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for muster-state integration tests.
//!
//! Provides TestContext with an in-memory store, a pinned manual clock,
//! and an initialized model, plus helpers for seeding machine documents
//! in arbitrary states.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};

use muster_state::collections;
use muster_state::migration::{MigrationSpec, TargetInfo};
use muster_state::state::State;
use muster_store::clock::ManualClock;
use muster_store::memory::MemoryStore;
use muster_store::ops::{Assert, Op, field_set};
use muster_store::store::DocumentStore;

pub const MODEL_UUID: &str = "9f2b7a54-6c1e-4b0a-8a53-0d9bb3c1a0f7";

/// Test context bundling store, clock, and an initialized model state.
pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub state: State,
}

impl TestContext {
    pub async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(epoch()));
        let state = State::initialize(
            store.clone() as Arc<dyn DocumentStore>,
            clock.clone(),
            MODEL_UUID,
        )
        .await
        .expect("model initialization must succeed on an empty store");
        TestContext {
            store,
            clock,
            state,
        }
    }

    /// Seed a machine document (and its container-refs document) directly,
    /// bypassing add_machine, so tests can start from arbitrary states.
    pub async fn seed_machine(&self, id: &str, doc: Value) {
        self.store
            .apply(&[
                Op::insert(collections::MACHINES, id, doc),
                Op::insert(collections::CONTAINER_REFS, id, json!({"children": []})),
            ])
            .await
            .expect("seeding a fresh machine must succeed");
    }

    /// Record `child` as a container hosted on `parent`.
    pub async fn add_container(&self, parent: &str, child: &str) {
        let refs = self
            .store
            .find(collections::CONTAINER_REFS, parent)
            .await
            .expect("store read")
            .expect("container refs doc must exist");
        let mut children: Vec<String> =
            serde_json::from_value(refs["children"].clone()).expect("children array");
        children.push(child.to_string());
        self.store
            .apply(&[Op::update(
                collections::CONTAINER_REFS,
                parent,
                Assert::Exists,
                field_set([("children", json!(children))]),
            )])
            .await
            .expect("container ref update");
    }

    /// Assign a principal unit to a machine, as a unit-deployment writer
    /// would.
    pub async fn assign_unit(&self, machine_id: &str, unit: &str) {
        let doc = self
            .store
            .find(collections::MACHINES, machine_id)
            .await
            .expect("store read")
            .expect("machine doc must exist");
        let mut principals: Vec<String> =
            serde_json::from_value(doc["principals"].clone()).expect("principals array");
        principals.push(unit.to_string());
        self.store
            .apply(&[Op::update(
                collections::MACHINES,
                machine_id,
                Assert::Exists,
                field_set([("principals", json!(principals))]),
            )])
            .await
            .expect("principals update");
    }

    /// Set the model's life directly, as a model-teardown writer would.
    pub async fn set_model_life(&self, life: &str) {
        self.store
            .apply(&[Op::update(
                collections::MODELS,
                MODEL_UUID,
                Assert::Exists,
                field_set([("life", json!(life))]),
            )])
            .await
            .expect("model life update");
    }
}

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
        .single()
        .expect("valid fixed timestamp")
}

/// A migration spec that passes validation.
pub fn migration_spec() -> MigrationSpec {
    MigrationSpec {
        initiated_by: "admin".to_string(),
        target: TargetInfo {
            controller_uuid: "11111111-2222-3333-4444-555555555555".to_string(),
            addrs: vec!["10.20.0.5:17070".to_string()],
            ca_cert: "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----".to_string(),
            auth_id: "admin".to_string(),
            password: "hunter2".to_string(),
        },
    }
}
