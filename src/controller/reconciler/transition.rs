//! # Transition Table
//!
//! Pure phase transitions: given the persisted phase and what was observed in
//! the cluster and the store, decide the next phase, the condition to record
//! and the single Secret write (if any) to perform. No I/O happens here.

use crate::controller::reconciler::materialize::{
    controller_uid, secret_data_matches, MaterializeError, SecretData,
};
use crate::controller::reconciler::status::{ConditionUpdate, StatusUpdate};
use crate::controller::reconciler::validation::ValidationError;
use crate::crd::{SecretKind, SyncPhase, SECRET_SYNCHRONIZED_CONDITION};
use crate::provider::ProviderError;
use k8s_openapi::api::core::v1::Secret;

/// Condition reasons
pub mod reasons {
    pub const SECRET_SYNCHRONIZED: &str = "SecretSynchronized";
    pub const SECRET_DRIFTED: &str = "SecretDrifted";
    pub const SECRET_KIND_MISMATCH: &str = "SecretKindMismatch";
    pub const SECRET_NOT_OWNED: &str = "SecretNotOwned";
    pub const INVALID_SPEC: &str = "InvalidSpec";
}

/// Why desired state could not be established
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    /// Condition reason
    pub reason: &'static str,
    pub message: String,
    /// Retried with backoff; otherwise held back for the rejected cooldown
    pub retriable: bool,
    /// Failure came from the secret store rather than the object itself
    pub from_provider: bool,
}

impl From<ProviderError> for SyncFailure {
    fn from(err: ProviderError) -> Self {
        Self {
            reason: err.reason(),
            retriable: err.is_retriable(),
            message: err.to_string(),
            from_provider: true,
        }
    }
}

impl From<MaterializeError> for SyncFailure {
    fn from(err: MaterializeError) -> Self {
        Self {
            reason: err.reason(),
            message: err.to_string(),
            retriable: false,
            from_provider: false,
        }
    }
}

impl From<ValidationError> for SyncFailure {
    fn from(err: ValidationError) -> Self {
        Self {
            reason: reasons::INVALID_SPEC,
            message: err.to_string(),
            retriable: false,
            from_provider: false,
        }
    }
}

/// What the reconciler saw before deciding
#[derive(Debug)]
pub struct Observed<'a> {
    pub source_uid: Option<&'a str>,
    pub secret_kind: SecretKind,
    /// Materialized data, or why it could not be produced
    pub desired: Result<&'a SecretData, &'a SyncFailure>,
    /// Current managed Secret, read fresh from the API server
    pub secret: Option<&'a Secret>,
}

/// The single Secret write a transition performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretWrite {
    Create,
    /// Rewrite data of the existing Secret in place
    Update,
}

/// How the invocation ends once the plan is carried out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Phase moved; come back shortly for the next step
    Requeue,
    /// Converged; re-check after the resync interval. The only outcome that
    /// clears the object's backoff, so Error -> Pending -> Error keeps growing it
    Resync,
    /// Recorded as Error; surfaced to the dispatcher as a failure
    Failed(SyncFailure),
}

/// Side-effect plan of one transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub next_phase: SyncPhase,
    pub condition: Option<ConditionUpdate>,
    pub secret_write: Option<SecretWrite>,
    pub outcome: Outcome,
}

impl Plan {
    /// Status change to apply after the Secret write
    #[must_use]
    pub fn status_update(&self) -> StatusUpdate {
        StatusUpdate {
            phase: self.next_phase,
            condition: self.condition.clone(),
        }
    }

    /// Whether the plan moves a synchronized object to Stale
    #[must_use]
    pub fn is_drift(&self) -> bool {
        self.next_phase == SyncPhase::Stale
    }
}

fn synchronized_condition(status: bool, reason: &str, message: String) -> ConditionUpdate {
    ConditionUpdate {
        type_: SECRET_SYNCHRONIZED_CONDITION.to_string(),
        status,
        reason: reason.to_string(),
        message,
        reason_change: true,
    }
}

fn in_sync(write: Option<SecretWrite>, desired: &SecretData) -> Plan {
    Plan {
        next_phase: SyncPhase::InSync,
        condition: Some(synchronized_condition(
            true,
            reasons::SECRET_SYNCHRONIZED,
            format!("Secret holds {} mapped field(s)", desired.len()),
        )),
        secret_write: write,
        outcome: Outcome::Resync,
    }
}

fn stale(message: &str) -> Plan {
    Plan {
        next_phase: SyncPhase::Stale,
        condition: Some(synchronized_condition(
            false,
            reasons::SECRET_DRIFTED,
            message.to_string(),
        )),
        secret_write: None,
        outcome: Outcome::Requeue,
    }
}

fn failed(failure: SyncFailure) -> Plan {
    Plan {
        next_phase: SyncPhase::Error,
        condition: Some(synchronized_condition(
            false,
            failure.reason,
            failure.message.clone(),
        )),
        secret_write: None,
        outcome: Outcome::Failed(failure),
    }
}

/// Plan for an object whose phase is not persisted yet: record Pending, nothing else
#[must_use]
pub fn plan_initialize() -> Plan {
    Plan {
        next_phase: SyncPhase::Pending,
        condition: None,
        secret_write: None,
        outcome: Outcome::Requeue,
    }
}

/// Plan for an Error object whose backoff has elapsed: go back to Pending and
/// let the next invocation retry from there
#[must_use]
pub fn plan_retry() -> Plan {
    plan_initialize()
}

/// Plan a transition for Pending, InSync or Stale
///
/// Empty and Error are handled by [`plan_initialize`] and [`plan_retry`];
/// passing them here plans as Pending.
#[must_use]
pub fn plan_sync(phase: SyncPhase, observed: &Observed<'_>) -> Plan {
    let desired = match observed.desired {
        Ok(desired) => desired,
        Err(failure) => return failed(failure.clone()),
    };

    if let Some(secret) = observed.secret {
        if let Some(plan) = check_existing(observed, secret) {
            return plan;
        }
    }

    let matches = observed
        .secret
        .is_some_and(|s| secret_data_matches(s, desired) && owned_by_source(s, observed.source_uid));

    match phase {
        SyncPhase::InSync => match observed.secret {
            None => stale("Secret is missing"),
            Some(_) if !matches => stale("Secret data differs from the secret store"),
            Some(_) => in_sync(None, desired),
        },
        SyncPhase::Stale => match observed.secret {
            None => in_sync(Some(SecretWrite::Create), desired),
            Some(_) if !matches => in_sync(Some(SecretWrite::Update), desired),
            Some(_) => in_sync(None, desired),
        },
        SyncPhase::Empty | SyncPhase::Pending | SyncPhase::Error => match observed.secret {
            None => in_sync(Some(SecretWrite::Create), desired),
            // Created earlier by this controller, or by someone else: verify
            Some(_) if matches => in_sync(None, desired),
            Some(_) => stale("Existing Secret differs from the secret store"),
        },
    }
}

fn owned_by_source(secret: &Secret, source_uid: Option<&str>) -> bool {
    source_uid.is_some() && controller_uid(secret) == source_uid
}

/// Conditions on an existing Secret that no write can fix
fn check_existing(observed: &Observed<'_>, secret: &Secret) -> Option<Plan> {
    if let Some(owner) = controller_uid(secret) {
        if Some(owner) != observed.source_uid {
            return Some(failed(SyncFailure {
                reason: reasons::SECRET_NOT_OWNED,
                message: format!("Secret is controlled by another object ({owner})"),
                retriable: false,
                from_provider: false,
            }));
        }
    }

    if !observed.secret_kind.matches(secret.type_.as_deref()) {
        return Some(failed(SyncFailure {
            reason: reasons::SECRET_KIND_MISMATCH,
            message: format!(
                "Secret has type '{}' but '{}' is declared; the type of a Secret cannot change",
                secret.type_.as_deref().unwrap_or("Opaque"),
                observed.secret_kind
            ),
            retriable: false,
            from_provider: false,
        }));
    }

    None
}
