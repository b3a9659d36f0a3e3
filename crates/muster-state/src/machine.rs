// Copyright (C) 2026 Muster Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Machine entities and the lifecycle state machine.
//!
//! A machine advances Alive -> Dying -> Dead and never backwards. Every
//! mutation goes through the optimistic transaction engine: the op set
//! asserts the exact guard state it was built from (life, jobs,
//! principals), so a concurrent writer that adds a unit or advances the
//! life first causes a rejection and a re-read rather than a lost update.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use muster_store::engine::{self, Reconcile, Transaction};
use muster_store::error::StoreError;
use muster_store::ops::{Assert, Op, field_set};
use muster_store::store::DocumentStore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json, to_value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::collections;
use crate::error::{Result, StateError};
use crate::life::Life;
use crate::presence::{Pinger, PresenceWatcher};
use crate::state::State;

/// Attempts per lifecycle transition: one with held data, one with
/// refreshed data, and a final one to determine the cause of the
/// preceding failure. Tunable policy, not load-bearing for correctness.
const LIFECYCLE_ATTEMPTS: usize = 3;

/// Roles a machine's agent may be expected to fulfil.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MachineJob {
    /// The machine hosts deployed units.
    HostUnits,
    /// The machine is part of the cluster's management plane.
    ManageCluster,
}

impl std::fmt::Display for MachineJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MachineJob::HostUnits => "host-units",
            MachineJob::ManageCluster => "manage-cluster",
        };
        write!(f, "{}", s)
    }
}

/// Reference to the agent binary version a machine runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTools {
    /// Version string of the agent binary.
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct MachineDoc {
    pub id: String,
    pub life: Life,
    #[serde(default)]
    pub jobs: Vec<MachineJob>,
    #[serde(default)]
    pub principals: Vec<String>,
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub tools: Option<AgentTools>,
    #[serde(default)]
    pub password_hash: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ContainerRefsDoc {
    #[serde(default)]
    children: Vec<String>,
}

/// A machine entity backed by its document in the store.
#[derive(Clone)]
pub struct Machine {
    store: Arc<dyn DocumentStore>,
    doc: MachineDoc,
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("doc", &self.doc)
            .finish_non_exhaustive()
    }
}

impl State {
    /// Fetch a machine by id.
    pub async fn machine(&self, id: &str) -> Result<Machine> {
        let doc = fetch_machine_doc(self.store().as_ref(), id)
            .await?
            .ok_or_else(|| StateError::NotFound {
                what: format!("machine {}", id),
            })?;
        Ok(Machine {
            store: self.store().clone(),
            doc,
        })
    }

    /// Create a machine, Alive, with the given jobs.
    pub async fn add_machine(&self, id: &str, jobs: Vec<MachineJob>) -> Result<Machine> {
        let doc = MachineDoc {
            id: id.to_string(),
            life: Life::Alive,
            jobs,
            principals: Vec::new(),
            instance_id: None,
            nonce: None,
            tools: None,
            password_hash: None,
        };
        let ops = [
            Op::insert(
                collections::MACHINES,
                id,
                to_value(&doc).map_err(StoreError::from)?,
            ),
            Op::insert(
                collections::CONTAINER_REFS,
                id,
                to_value(ContainerRefsDoc::default()).map_err(StoreError::from)?,
            ),
        ];
        match self.store().apply(&ops).await {
            Ok(()) => {}
            Err(err) if err.is_rejected() => {
                return Err(StateError::AlreadyExists {
                    what: format!("machine {}", id),
                });
            }
            Err(err) => return Err(err.into()),
        }
        info!(machine_id = %id, "machine added");
        Ok(Machine {
            store: self.store().clone(),
            doc,
        })
    }
}

async fn fetch_machine_doc(
    store: &dyn DocumentStore,
    id: &str,
) -> Result<Option<MachineDoc>> {
    let Some(doc) = store.find(collections::MACHINES, id).await? else {
        return Ok(None);
    };
    Ok(Some(
        serde_json::from_value(doc).map_err(StoreError::from)?,
    ))
}

impl Machine {
    /// The machine id.
    pub fn id(&self) -> &str {
        &self.doc.id
    }

    /// Whether the machine is Alive, Dying or Dead.
    pub fn life(&self) -> Life {
        self.doc.life
    }

    /// The roles the machine's agent must fulfil.
    pub fn jobs(&self) -> &[MachineJob] {
        &self.doc.jobs
    }

    /// Names of the principal units assigned to the machine.
    pub fn principals(&self) -> &[String] {
        &self.doc.principals
    }

    /// The provider instance id, if the machine has been provisioned.
    pub fn instance_id(&self) -> Option<&str> {
        self.doc.instance_id.as_deref()
    }

    /// The agent tools version, if set.
    pub fn agent_tools(&self) -> Option<&AgentTools> {
        self.doc.tools.as_ref()
    }

    /// Whether the machine was provisioned with the given nonce.
    pub fn check_provisioned(&self, nonce: &str) -> bool {
        self.doc.instance_id.is_some() && self.doc.nonce.as_deref() == Some(nonce)
    }

    /// The global presence key for the machine's agent.
    pub fn global_key(&self) -> String {
        format!("m#{}", self.doc.id)
    }

    /// Ids of containers hosted on this machine.
    pub async fn containers(&self) -> Result<Vec<String>> {
        let Some(doc) = self
            .store
            .find(collections::CONTAINER_REFS, &self.doc.id)
            .await?
        else {
            return Ok(Vec::new());
        };
        let refs: ContainerRefsDoc = serde_json::from_value(doc).map_err(StoreError::from)?;
        Ok(refs.children)
    }

    /// Re-read the machine document from the store.
    pub async fn refresh(&mut self) -> Result<()> {
        match fetch_machine_doc(self.store.as_ref(), &self.doc.id).await? {
            Some(doc) => {
                self.doc = doc;
                Ok(())
            }
            None => Err(StateError::NotFound {
                what: format!("machine {}", self.doc.id),
            }),
        }
    }

    /// Set the machine's lifecycle to Dying if it is Alive. Does nothing
    /// if the life has already advanced past Alive.
    pub async fn destroy(&mut self) -> Result<()> {
        self.advance_lifecycle(Life::Dying).await
    }

    /// Set the machine's lifecycle to Dead if it is Alive or Dying. Does
    /// nothing if the machine is already Dead.
    pub async fn ensure_dead(&mut self) -> Result<()> {
        self.advance_lifecycle(Life::Dead).await
    }

    /// Ensure the machine's lifecycle is no earlier than `target`.
    ///
    /// Fails immediately, with no transaction attempted, on conditions a
    /// retry cannot resolve: hosted containers, the cluster-manager role,
    /// or assigned principal units. Contention beyond the attempt budget
    /// surfaces as [`StateError::ExcessiveContention`].
    async fn advance_lifecycle(&mut self, target: Life) -> Result<()> {
        if target == Life::Alive {
            return Err(StateError::InvariantViolated {
                detail: format!("cannot advance lifecycle of machine {} to alive", self.doc.id),
            });
        }

        let containers = self.containers().await?;
        if !containers.is_empty() {
            return Err(StateError::HasContainers {
                machine_id: self.doc.id.clone(),
                container_ids: containers,
            });
        }

        let mut txn = AdvanceLifecycle {
            target,
            doc: self.doc.clone(),
            vanished: false,
        };
        engine::run(self.store.as_ref(), &mut txn, LIFECYCLE_ATTEMPTS).await?;

        // Record the advanced life; a racing writer may have taken it
        // further than requested, and a vanished machine is past Dead.
        self.doc.life = if txn.vanished {
            Life::Dead
        } else {
            txn.doc.life.max(target)
        };
        debug!(machine_id = %self.doc.id, life = %self.doc.life, "lifecycle advanced");
        Ok(())
    }

    /// Set the provider instance id and nonce. Both must be non-empty and
    /// can be set at most once, while the machine is Alive.
    pub async fn set_provisioned(&mut self, instance_id: &str, nonce: &str) -> Result<()> {
        if instance_id.is_empty() || nonce.is_empty() {
            return Err(StateError::InvalidSpec {
                what: "provisioning",
                reason: "instance id and nonce cannot be empty".to_string(),
            });
        }

        let mut txn = Provision {
            doc: self.doc.clone(),
            instance_id: instance_id.to_string(),
            nonce: nonce.to_string(),
        };
        engine::run(self.store.as_ref(), &mut txn, LIFECYCLE_ATTEMPTS).await?;

        self.doc.instance_id = Some(instance_id.to_string());
        self.doc.nonce = Some(nonce.to_string());
        info!(machine_id = %self.doc.id, instance_id = %instance_id, "machine provisioned");
        Ok(())
    }

    /// Set the agent tools version. Fails if the machine is Dead.
    pub async fn set_agent_tools(&mut self, version: &str) -> Result<()> {
        let tools = AgentTools {
            version: version.to_string(),
        };
        self.guarded_update(field_set([(
            "tools",
            to_value(&tools).map_err(StoreError::from)?,
        )]))
        .await?;
        self.doc.tools = Some(tools);
        Ok(())
    }

    /// Set the password for the machine's agent. Previous passwords are
    /// invalidated. Fails if the machine is Dead.
    pub async fn set_password(&mut self, password: &str) -> Result<()> {
        let hash = hash_password(password);
        self.guarded_update(field_set([("password_hash", json!(hash))]))
            .await?;
        self.doc.password_hash = Some(hash);
        Ok(())
    }

    /// Whether the given password matches the agent's current password.
    pub fn password_valid(&self, password: &str) -> bool {
        self.doc.password_hash.as_deref() == Some(hash_password(password).as_str())
    }

    async fn guarded_update(&mut self, fields: Map<String, Value>) -> Result<()> {
        let mut txn = NotDeadUpdate {
            doc: self.doc.clone(),
            fields,
        };
        engine::run(self.store.as_ref(), &mut txn, LIFECYCLE_ATTEMPTS).await?;
        self.doc.life = txn.doc.life;
        Ok(())
    }

    /// Remove the machine from state. The machine must be Dead. Dependent
    /// status, constraints, and annotation documents are cleaned up best
    /// effort; their deletion is not atomic with the machine's.
    pub async fn remove(&self) -> Result<()> {
        if self.doc.life != Life::Dead {
            return Err(StateError::NotDead {
                machine_id: self.doc.id.clone(),
            });
        }

        let ops = [
            Op::remove(collections::MACHINES, self.doc.id.clone()),
            Op::remove(collections::CONTAINER_REFS, self.doc.id.clone()),
        ];
        match self.store.apply(&ops).await {
            // The only abort condition in play is that the machine has
            // already been removed.
            Ok(()) | Err(StoreError::Rejected) => {}
            Err(err) => return Err(err.into()),
        }

        let global_key = self.global_key();
        for collection in [
            collections::STATUSES,
            collections::CONSTRAINTS,
            collections::ANNOTATIONS,
        ] {
            let op = Op::remove(collection, global_key.clone());
            match self.store.apply(&[op]).await {
                Ok(()) | Err(StoreError::Rejected) => {}
                Err(err) => return Err(err.into()),
            }
        }
        info!(machine_id = %self.doc.id, "machine removed");
        Ok(())
    }

    /// Whether the machine's agent is currently reported alive.
    pub async fn agent_alive(&self, watcher: &PresenceWatcher) -> bool {
        watcher.is_alive(&self.global_key()).await
    }

    /// Block until the machine's agent is reported alive, or the timeout
    /// elapses, or the watcher terminates.
    pub async fn wait_agent_alive(
        &self,
        watcher: &PresenceWatcher,
        timeout: Duration,
    ) -> Result<()> {
        watcher.wait_alive(&self.global_key(), timeout).await
    }

    /// Start a pinger signalling that the machine's agent is alive.
    pub fn set_agent_alive(&self, period: Duration) -> Pinger {
        Pinger::start(self.store.clone(), self.global_key(), period)
    }
}

fn hash_password(password: &str) -> String {
    BASE64.encode(Sha256::digest(password.as_bytes()))
}

/// Lifecycle-advance transaction descriptor.
struct AdvanceLifecycle {
    target: Life,
    doc: MachineDoc,
    vanished: bool,
}

#[async_trait]
impl Transaction for AdvanceLifecycle {
    type Error = StateError;

    async fn reconcile(
        &mut self,
        store: &dyn DocumentStore,
        attempt: usize,
    ) -> Result<Reconcile> {
        if attempt > 0 {
            match fetch_machine_doc(store, &self.doc.id).await? {
                Some(doc) => self.doc = doc,
                None => {
                    // Already gone past the target.
                    self.vanished = true;
                    return Ok(Reconcile::Done);
                }
            }
        }
        if self.doc.life >= self.target {
            return Ok(Reconcile::Done);
        }
        // Structural guards: the current observation already proves the
        // machine cannot transition right now, so retrying is pointless.
        if self.doc.jobs.contains(&MachineJob::ManageCluster) {
            return Err(StateError::RequiredByCluster {
                machine_id: self.doc.id.clone(),
            });
        }
        if !self.doc.principals.is_empty() {
            return Err(StateError::HasAssignedUnits {
                machine_id: self.doc.id.clone(),
                unit_names: self.doc.principals.clone(),
            });
        }
        Ok(Reconcile::Proceed)
    }

    fn build_ops(&mut self) -> Result<Vec<Op>> {
        // Pin every guard the transition depends on: if life, jobs, or
        // principals change before commit, the set rejects and we re-read.
        let assert = Assert::fields([
            ("life", to_value(self.doc.life).map_err(StoreError::from)?),
            ("jobs", to_value(&self.doc.jobs).map_err(StoreError::from)?),
            ("principals", json!([])),
        ]);
        Ok(vec![Op::update(
            collections::MACHINES,
            self.doc.id.clone(),
            assert,
            field_set([("life", to_value(self.target).map_err(StoreError::from)?)]),
        )])
    }
}

/// Set-once provisioning transaction descriptor.
struct Provision {
    doc: MachineDoc,
    instance_id: String,
    nonce: String,
}

#[async_trait]
impl Transaction for Provision {
    type Error = StateError;

    async fn reconcile(
        &mut self,
        store: &dyn DocumentStore,
        attempt: usize,
    ) -> Result<Reconcile> {
        if attempt > 0 {
            match fetch_machine_doc(store, &self.doc.id).await? {
                Some(doc) => self.doc = doc,
                None => {
                    return Err(StateError::NotFound {
                        what: format!("machine {}", self.doc.id),
                    });
                }
            }
        }
        if self.doc.life != Life::Alive {
            return Err(StateError::NotAlive {
                what: format!("machine {}", self.doc.id),
            });
        }
        if self.doc.instance_id.is_some() {
            return Err(StateError::AlreadyProvisioned {
                machine_id: self.doc.id.clone(),
            });
        }
        Ok(Reconcile::Proceed)
    }

    fn build_ops(&mut self) -> Result<Vec<Op>> {
        let assert = Assert::fields([
            ("life", json!("alive")),
            ("instance_id", json!(null)),
            ("nonce", json!(null)),
        ]);
        Ok(vec![Op::update(
            collections::MACHINES,
            self.doc.id.clone(),
            assert,
            field_set([
                ("instance_id", json!(self.instance_id)),
                ("nonce", json!(self.nonce)),
            ]),
        )])
    }
}

/// Field update guarded by "the machine is not Dead".
struct NotDeadUpdate {
    doc: MachineDoc,
    fields: Map<String, Value>,
}

#[async_trait]
impl Transaction for NotDeadUpdate {
    type Error = StateError;

    async fn reconcile(
        &mut self,
        store: &dyn DocumentStore,
        attempt: usize,
    ) -> Result<Reconcile> {
        if attempt > 0 {
            match fetch_machine_doc(store, &self.doc.id).await? {
                Some(doc) => self.doc = doc,
                None => {
                    return Err(StateError::NotFound {
                        what: format!("machine {}", self.doc.id),
                    });
                }
            }
        }
        if self.doc.life == Life::Dead {
            return Err(StateError::MachineDead {
                machine_id: self.doc.id.clone(),
            });
        }
        Ok(Reconcile::Proceed)
    }

    fn build_ops(&mut self) -> Result<Vec<Op>> {
        Ok(vec![Op::update(
            collections::MACHINES,
            self.doc.id.clone(),
            Assert::fields([("life", to_value(self.doc.life).map_err(StoreError::from)?)]),
            self.fields.clone(),
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_round_trip() {
        let hash = hash_password("sekrit");
        assert_ne!(hash, "sekrit");
        assert_eq!(hash, hash_password("sekrit"));
        assert_ne!(hash, hash_password("other"));
    }

    #[test]
    fn test_machine_job_serde_names() {
        assert_eq!(
            serde_json::to_string(&MachineJob::ManageCluster).unwrap(),
            "\"manage-cluster\""
        );
        assert_eq!(MachineJob::HostUnits.to_string(), "host-units");
    }

    #[test]
    fn test_machine_doc_defaults_for_optional_fields() {
        let doc: MachineDoc =
            serde_json::from_value(json!({"id": "0", "life": "alive"})).unwrap();
        assert!(doc.jobs.is_empty());
        assert!(doc.principals.is_empty());
        assert!(doc.instance_id.is_none());
        assert!(doc.tools.is_none());
    }
}
