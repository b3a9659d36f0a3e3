// Copyright (C) 2026 Muster Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Model migration phase state machine.
//!
//! A migration is three documents: an immutable descriptor (one per
//! attempt, id `"<model-uuid>:<attempt>"`), a mutable status document
//! under the same id, and an active marker keyed by model uuid whose
//! existence means "a migration is in progress". The marker lets
//! "is a migration running?" stay a single point read, and its insert
//! with a Missing assert makes creation single-winner under races.
//!
//! Phase changes are single-shot: the op set asserts the phase it was
//! built from, and a rejection means another writer changed the phase
//! first. There is no retry; the caller re-reads and reconsiders.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use muster_store::clock::Clock;
use muster_store::error::StoreError;
use muster_store::ops::{Assert, Op, field_set};
use muster_store::store::DocumentStore;
use serde::{Deserialize, Serialize};
use serde_json::to_value;
use tracing::info;

use crate::collections;
use crate::error::{Result, StateError};
use crate::state::State;

/// Phase of a model migration.
///
/// The success path runs Quiesce through Done in order; every phase
/// before Success can divert to Abort. Once Success is reached the
/// migration cannot be aborted, only wound down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    /// Agents are being quiesced ahead of the migration.
    Quiesce,
    /// The model is read-only on the source controller.
    ReadOnly,
    /// Prechecks are running against source and target.
    Precheck,
    /// The model is being imported into the target controller.
    Import,
    /// The imported model is being validated on the target.
    Validation,
    /// The target has accepted the model; the point of no return.
    Success,
    /// Logs are being transferred to the target.
    LogTransfer,
    /// The model is being removed from the source controller.
    Reap,
    /// The migration completed and the source model was removed.
    Done,
    /// The migration completed but reaping the source model failed.
    ReapFailed,
    /// The migration is being rolled back.
    Abort,
    /// The rollback completed; the model stays on the source.
    AbortDone,
}

impl Phase {
    /// Phases this phase may legally transition to.
    pub fn successors(self) -> &'static [Phase] {
        use Phase::*;
        match self {
            Quiesce => &[ReadOnly, Abort],
            ReadOnly => &[Precheck, Abort],
            Precheck => &[Import, Abort],
            Import => &[Validation, Abort],
            Validation => &[Success, Abort],
            Success => &[LogTransfer],
            LogTransfer => &[Reap],
            Reap => &[Done, ReapFailed],
            Abort => &[AbortDone],
            Done | ReapFailed | AbortDone => &[],
        }
    }

    /// Whether `next` is a legal direct successor of this phase.
    pub fn can_transition_to(self, next: Phase) -> bool {
        self.successors().contains(&next)
    }

    /// Whether the phase is terminal. A terminal migration never changes
    /// phase again and its active marker has been removed.
    pub fn is_terminal(self) -> bool {
        self.successors().is_empty()
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Quiesce => "QUIESCE",
            Phase::ReadOnly => "READONLY",
            Phase::Precheck => "PRECHECK",
            Phase::Import => "IMPORT",
            Phase::Validation => "VALIDATION",
            Phase::Success => "SUCCESS",
            Phase::LogTransfer => "LOGTRANSFER",
            Phase::Reap => "REAP",
            Phase::Done => "DONE",
            Phase::ReapFailed => "REAPFAILED",
            Phase::Abort => "ABORT",
            Phase::AbortDone => "ABORTDONE",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Phase {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self> {
        let phase = match s {
            "QUIESCE" => Phase::Quiesce,
            "READONLY" => Phase::ReadOnly,
            "PRECHECK" => Phase::Precheck,
            "IMPORT" => Phase::Import,
            "VALIDATION" => Phase::Validation,
            "SUCCESS" => Phase::Success,
            "LOGTRANSFER" => Phase::LogTransfer,
            "REAP" => Phase::Reap,
            "DONE" => Phase::Done,
            "REAPFAILED" => Phase::ReapFailed,
            "ABORT" => Phase::Abort,
            "ABORTDONE" => Phase::AbortDone,
            _ => {
                return Err(StateError::InvariantViolated {
                    detail: format!("unknown migration phase {:?}", s),
                });
            }
        };
        Ok(phase)
    }
}

/// Connection details for the migration's target controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetInfo {
    /// UUID of the target controller.
    pub controller_uuid: String,
    /// API addresses of the target controller.
    pub addrs: Vec<String>,
    /// CA certificate the target's API presents.
    pub ca_cert: String,
    /// Identity to authenticate as on the target.
    pub auth_id: String,
    /// Password for `auth_id`.
    pub password: String,
}

impl TargetInfo {
    fn validate(&self) -> Result<()> {
        let reason = if self.controller_uuid.is_empty() {
            "missing target controller uuid"
        } else if self.addrs.is_empty() {
            "missing target addresses"
        } else if self.ca_cert.is_empty() {
            "missing target CA certificate"
        } else if self.auth_id.is_empty() {
            "missing target auth identity"
        } else if self.password.is_empty() {
            "missing target password"
        } else {
            return Ok(());
        };
        Err(StateError::InvalidSpec {
            what: "migration target",
            reason: reason.to_string(),
        })
    }
}

/// Everything needed to begin a model migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationSpec {
    /// Who initiated the migration.
    pub initiated_by: String,
    /// Where the model is going.
    pub target: TargetInfo,
}

impl MigrationSpec {
    /// Check that the spec is complete enough to start a migration.
    pub fn validate(&self) -> Result<()> {
        if self.initiated_by.is_empty() {
            return Err(StateError::InvalidSpec {
                what: "migration spec",
                reason: "missing initiator".to_string(),
            });
        }
        self.target.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct MigrationDoc {
    pub id: String,
    pub model_uuid: String,
    pub attempt: i64,
    pub initiated_by: String,
    pub target: TargetInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct MigrationStatusDoc {
    pub phase: Phase,
    pub start_time: DateTime<Utc>,
    pub phase_changed_time: DateTime<Utc>,
    #[serde(default)]
    pub success_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ActiveMarkerDoc {
    migration_id: String,
}

/// A handle on one migration attempt of a model.
#[derive(Clone)]
pub struct ModelMigration {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    doc: MigrationDoc,
    status: MigrationStatusDoc,
}

impl std::fmt::Debug for ModelMigration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelMigration")
            .field("doc", &self.doc)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl State {
    /// Start a migration of this model to another controller.
    ///
    /// Exactly one of any number of concurrent callers wins; the rest get
    /// [`StateError::MigrationInProgress`]. The model must be Alive both
    /// when checked and at the instant the migration documents commit.
    pub async fn create_model_migration(&self, spec: MigrationSpec) -> Result<ModelMigration> {
        spec.validate()?;

        let model = self.model().await?;
        if !model.life().is_alive() {
            return Err(StateError::ModelNotAlive {
                model_uuid: self.model_uuid().to_string(),
            });
        }
        if self.is_migration_active().await? {
            return Err(StateError::MigrationInProgress {
                model_uuid: self.model_uuid().to_string(),
            });
        }

        let sequence = format!("modelmigration-{}", self.model_uuid());
        let attempt = self.store().next_sequence(&sequence).await?;
        let id = format!("{}:{}", self.model_uuid(), attempt);
        let now = self.clock().now();

        let doc = MigrationDoc {
            id: id.clone(),
            model_uuid: self.model_uuid().to_string(),
            attempt,
            initiated_by: spec.initiated_by,
            target: spec.target,
        };
        let status = MigrationStatusDoc {
            phase: Phase::Quiesce,
            start_time: now,
            phase_changed_time: now,
            success_time: None,
            end_time: None,
            status_message: String::new(),
        };
        let marker = ActiveMarkerDoc {
            migration_id: id.clone(),
        };

        let ops = [
            model.assert_alive_op(),
            Op::insert(
                collections::MIGRATIONS,
                id.clone(),
                to_value(&doc).map_err(StoreError::from)?,
            ),
            Op::insert(
                collections::MIGRATIONS_STATUS,
                id.clone(),
                to_value(&status).map_err(StoreError::from)?,
            ),
            Op::insert(
                collections::MIGRATIONS_ACTIVE,
                self.model_uuid(),
                to_value(&marker).map_err(StoreError::from)?,
            ),
        ];

        match self.store().apply(&ops).await {
            Ok(()) => {}
            Err(err) if err.is_rejected() => {
                // Single shot; re-read to report which guard failed.
                if self.is_migration_active().await? {
                    return Err(StateError::MigrationInProgress {
                        model_uuid: self.model_uuid().to_string(),
                    });
                }
                match self.model().await {
                    Ok(model) if model.life().is_alive() => {
                        return Err(StateError::ExcessiveContention);
                    }
                    Ok(_) => {
                        return Err(StateError::ModelNotAlive {
                            model_uuid: self.model_uuid().to_string(),
                        });
                    }
                    Err(err) if err.is_not_found() => {
                        return Err(StateError::ModelNotAlive {
                            model_uuid: self.model_uuid().to_string(),
                        });
                    }
                    Err(err) => return Err(err),
                }
            }
            Err(err) => return Err(err.into()),
        }

        info!(
            migration_id = %id,
            initiated_by = %doc.initiated_by,
            target_controller = %doc.target.controller_uuid,
            "model migration created",
        );
        Ok(ModelMigration {
            store: self.store().clone(),
            clock: self.clock().clone(),
            doc,
            status,
        })
    }

    /// Fetch the most recent migration attempt for this model, if any.
    pub async fn model_migration(&self) -> Result<ModelMigration> {
        let docs = self
            .store()
            .find_by_field(
                collections::MIGRATIONS,
                "model_uuid",
                &to_value(self.model_uuid()).map_err(StoreError::from)?,
            )
            .await?;

        // Newest attempt by the numeric attempt field; ids sort lexically
        // and would put attempt 10 before attempt 2.
        let mut latest: Option<MigrationDoc> = None;
        for (_, value) in docs {
            let doc: MigrationDoc = serde_json::from_value(value).map_err(StoreError::from)?;
            if latest.as_ref().is_none_or(|best| doc.attempt > best.attempt) {
                latest = Some(doc);
            }
        }
        let doc = latest.ok_or_else(|| StateError::NotFound {
            what: format!("migration for model {}", self.model_uuid()),
        })?;

        let status = fetch_status_doc(self.store().as_ref(), &doc.id).await?;
        Ok(ModelMigration {
            store: self.store().clone(),
            clock: self.clock().clone(),
            doc,
            status,
        })
    }

    /// Whether a migration is currently in progress for this model.
    pub async fn is_migration_active(&self) -> Result<bool> {
        let marker = self
            .store()
            .find(collections::MIGRATIONS_ACTIVE, self.model_uuid())
            .await?;
        Ok(marker.is_some())
    }
}

async fn fetch_status_doc(store: &dyn DocumentStore, id: &str) -> Result<MigrationStatusDoc> {
    let value = store
        .find(collections::MIGRATIONS_STATUS, id)
        .await?
        .ok_or_else(|| StateError::NotFound {
            what: format!("status for migration {}", id),
        })?;
    Ok(serde_json::from_value(value).map_err(StoreError::from)?)
}

impl ModelMigration {
    /// The migration's id, `"<model-uuid>:<attempt>"`.
    pub fn id(&self) -> &str {
        &self.doc.id
    }

    /// The UUID of the model being migrated.
    pub fn model_uuid(&self) -> &str {
        &self.doc.model_uuid
    }

    /// Which attempt this migration is for its model, starting at 1.
    pub fn attempt(&self) -> i64 {
        self.doc.attempt
    }

    /// Who initiated the migration.
    pub fn initiated_by(&self) -> &str {
        &self.doc.initiated_by
    }

    /// Connection details for the target controller.
    pub fn target_info(&self) -> &TargetInfo {
        &self.doc.target
    }

    /// The migration's current phase, as of the last read.
    pub fn phase(&self) -> Phase {
        self.status.phase
    }

    /// When the migration was created.
    pub fn start_time(&self) -> DateTime<Utc> {
        self.status.start_time
    }

    /// When the phase last changed.
    pub fn phase_changed_time(&self) -> DateTime<Utc> {
        self.status.phase_changed_time
    }

    /// When the migration reached Success, if it has.
    pub fn success_time(&self) -> Option<DateTime<Utc>> {
        self.status.success_time
    }

    /// When the migration reached a terminal phase, if it has.
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.status.end_time
    }

    /// The last recorded human-readable progress message.
    pub fn status_message(&self) -> &str {
        &self.status.status_message
    }

    /// Move the migration to `next`.
    ///
    /// Setting the current phase again is a no-op. An illegal transition
    /// fails with [`StateError::IllegalPhaseChange`] without touching the
    /// store. If another writer changed the phase between this handle's
    /// last read and the commit, the op set rejects and the caller gets
    /// [`StateError::PhaseAlreadyChanged`]; there is no retry because the
    /// transition was decided against a phase that no longer holds.
    pub async fn set_phase(&mut self, next: Phase) -> Result<()> {
        let current = self.status.phase;
        if next == current {
            return Ok(());
        }
        if !current.can_transition_to(next) {
            return Err(StateError::IllegalPhaseChange {
                from: current,
                to: next,
            });
        }

        let now = self.clock.now();
        let mut fields = field_set([
            ("phase", to_value(next).map_err(StoreError::from)?),
            ("phase_changed_time", to_value(now).map_err(StoreError::from)?),
        ]);
        if next == Phase::Success {
            fields.insert(
                "success_time".to_string(),
                to_value(now).map_err(StoreError::from)?,
            );
        }
        if next.is_terminal() {
            fields.insert(
                "end_time".to_string(),
                to_value(now).map_err(StoreError::from)?,
            );
        }

        let mut ops = vec![Op::update(
            collections::MIGRATIONS_STATUS,
            self.doc.id.clone(),
            Assert::fields([("phase", to_value(current).map_err(StoreError::from)?)]),
            fields,
        )];
        if next.is_terminal() {
            ops.push(Op::remove(
                collections::MIGRATIONS_ACTIVE,
                self.doc.model_uuid.clone(),
            ));
        }

        match self.store.apply(&ops).await {
            Ok(()) => {}
            Err(err) if err.is_rejected() => return Err(StateError::PhaseAlreadyChanged),
            Err(err) => return Err(err.into()),
        }

        self.status.phase = next;
        self.status.phase_changed_time = now;
        if next == Phase::Success {
            self.status.success_time = Some(now);
        }
        if next.is_terminal() {
            self.status.end_time = Some(now);
        }
        info!(migration_id = %self.doc.id, from = %current, to = %next, "migration phase changed");
        Ok(())
    }

    /// Record a human-readable progress message.
    pub async fn set_status_message(&mut self, message: &str) -> Result<()> {
        let op = Op::update(
            collections::MIGRATIONS_STATUS,
            self.doc.id.clone(),
            Assert::Exists,
            field_set([("status_message", serde_json::json!(message))]),
        );
        match self.store.apply(&[op]).await {
            Ok(()) => {}
            Err(err) if err.is_rejected() => {
                return Err(StateError::NotFound {
                    what: format!("status for migration {}", self.doc.id),
                });
            }
            Err(err) => return Err(err.into()),
        }
        self.status.status_message = message.to_string();
        Ok(())
    }

    /// Re-read the status document from the store.
    pub async fn refresh(&mut self) -> Result<()> {
        self.status = fetch_status_doc(self.store.as_ref(), &self.doc.id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_path_is_legal() {
        use Phase::*;
        let path = [
            Quiesce, ReadOnly, Precheck, Import, Validation, Success, LogTransfer, Reap, Done,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} must be legal",
                pair[0],
                pair[1],
            );
        }
    }

    #[test]
    fn test_abort_only_before_success() {
        use Phase::*;
        for phase in [Quiesce, ReadOnly, Precheck, Import, Validation] {
            assert!(phase.can_transition_to(Abort));
        }
        for phase in [Success, LogTransfer, Reap, Done, ReapFailed, Abort, AbortDone] {
            assert!(!phase.can_transition_to(Abort));
        }
        assert!(Abort.can_transition_to(AbortDone));
    }

    #[test]
    fn test_no_backward_transitions() {
        use Phase::*;
        assert!(!ReadOnly.can_transition_to(Quiesce));
        assert!(!Success.can_transition_to(Validation));
        assert!(!Done.can_transition_to(Reap));
    }

    #[test]
    fn test_terminal_phases() {
        use Phase::*;
        for phase in [Done, ReapFailed, AbortDone] {
            assert!(phase.is_terminal());
            assert!(phase.successors().is_empty());
        }
        for phase in [Quiesce, ReadOnly, Precheck, Import, Validation, Success, LogTransfer, Reap, Abort] {
            assert!(!phase.is_terminal());
        }
    }

    #[test]
    fn test_phase_round_trips_through_strings() {
        use Phase::*;
        for phase in [
            Quiesce, ReadOnly, Precheck, Import, Validation, Success, LogTransfer, Reap, Done,
            ReapFailed, Abort, AbortDone,
        ] {
            assert_eq!(phase.to_string().parse::<Phase>().unwrap(), phase);
            let json = serde_json::to_value(phase).unwrap();
            assert_eq!(json, serde_json::json!(phase.to_string()));
        }
        assert!("JUMPING".parse::<Phase>().is_err());
    }

    #[test]
    fn test_spec_validation() {
        let target = TargetInfo {
            controller_uuid: "target-uuid".to_string(),
            addrs: vec!["10.0.0.1:17070".to_string()],
            ca_cert: "cert".to_string(),
            auth_id: "admin".to_string(),
            password: "sekrit".to_string(),
        };
        let spec = MigrationSpec {
            initiated_by: "admin".to_string(),
            target: target.clone(),
        };
        assert!(spec.validate().is_ok());

        let mut bad = spec.clone();
        bad.initiated_by.clear();
        assert!(bad.validate().is_err());

        let mut bad = spec.clone();
        bad.target.addrs.clear();
        assert!(bad.validate().is_err());

        let mut bad = spec;
        bad.target.ca_cert.clear();
        assert!(bad.validate().is_err());
    }
}
