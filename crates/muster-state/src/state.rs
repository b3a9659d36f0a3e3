// Copyright (C) 2026 Muster Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The per-model state handle.
//!
//! `State` carries the injected store and clock handles that every
//! component receives at construction; there is no ambient global state.
//! Machine operations live in [`crate::machine`], migration operations in
//! [`crate::migration`], both as `impl State` blocks alongside their
//! document types.

use std::sync::Arc;

use muster_store::clock::{Clock, SystemClock};
use muster_store::ops::Op;
use muster_store::sqlite::SqliteStore;
use muster_store::store::DocumentStore;
use serde_json::to_value;
use tracing::info;

use crate::collections;
use crate::config::Config;
use crate::error::{Result, StateError};
use crate::life::Life;
use crate::model::{Model, ModelDoc};
use crate::presence::PresenceWatcher;

/// Handle on the state of one model within the shared document store.
#[derive(Clone)]
pub struct State {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    model_uuid: String,
}

impl State {
    /// Open a handle on an already-initialized model.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        model_uuid: impl Into<String>,
    ) -> Self {
        State {
            store,
            clock,
            model_uuid: model_uuid.into(),
        }
    }

    /// Initialize state for a new model and return a handle on it.
    ///
    /// Fails with [`StateError::AlreadyExists`] if the model document is
    /// already present.
    pub async fn initialize(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        model_uuid: impl Into<String>,
    ) -> Result<Self> {
        let model_uuid = model_uuid.into();
        let doc = ModelDoc {
            uuid: model_uuid.clone(),
            life: Life::Alive,
        };
        let op = Op::insert(
            collections::MODELS,
            model_uuid.clone(),
            to_value(&doc).map_err(muster_store::error::StoreError::from)?,
        );
        match store.apply(&[op]).await {
            Ok(()) => {}
            Err(err) if err.is_rejected() => {
                return Err(StateError::AlreadyExists {
                    what: format!("model {}", model_uuid),
                });
            }
            Err(err) => return Err(err.into()),
        }
        info!(model_uuid = %model_uuid, "model state initialized");
        Ok(State::new(store, clock, model_uuid))
    }

    /// Open state on the configured SQLite database with the system
    /// clock, creating the model document if this is the first open.
    pub async fn open(config: &Config, model_uuid: impl Into<String>) -> Result<Self> {
        let store: Arc<dyn DocumentStore> =
            Arc::new(SqliteStore::from_url(&config.database_url).await?);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let model_uuid = model_uuid.into();
        match State::initialize(store.clone(), clock.clone(), model_uuid.clone()).await {
            Ok(state) => Ok(state),
            Err(StateError::AlreadyExists { .. }) => Ok(State::new(store, clock, model_uuid)),
            Err(err) => Err(err),
        }
    }

    /// Start a presence watcher over this state's store, polling at the
    /// configured interval.
    pub fn presence_watcher(&self, config: &Config) -> PresenceWatcher {
        PresenceWatcher::start(self.store.clone(), config.presence_poll_interval)
    }

    /// The UUID of the model this handle is scoped to.
    pub fn model_uuid(&self) -> &str {
        &self.model_uuid
    }

    /// The backing document store.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// The injected clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Fetch the model document.
    pub async fn model(&self) -> Result<Model> {
        let doc = self
            .store
            .find(collections::MODELS, &self.model_uuid)
            .await?
            .ok_or_else(|| StateError::NotFound {
                what: format!("model {}", self.model_uuid),
            })?;
        let doc: ModelDoc =
            serde_json::from_value(doc).map_err(muster_store::error::StoreError::from)?;
        Ok(Model { doc })
    }
}
