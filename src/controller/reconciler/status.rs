//! # Status Management
//!
//! Computes the next `VaultSecretStatus` from the persisted one and applies it
//! with optimistic concurrency. A computed status equal to the persisted one is
//! never written.

use crate::controller::reconciler::cluster::{ClusterApi, ClusterError};
use crate::crd::{Condition, ConditionStatus, SyncPhase, VaultSecret, VaultSecretStatus};
use crate::observability::metrics;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::debug;

/// Desired state of one condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionUpdate {
    pub type_: String,
    pub status: bool,
    pub reason: String,
    pub message: String,
    /// Also move `lastTransitionTime` when only the reason changes
    pub reason_change: bool,
}

/// Desired phase plus an optional condition to upsert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub phase: SyncPhase,
    pub condition: Option<ConditionUpdate>,
}

/// Result of applying a status update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusWrite {
    /// Status was written
    Written,
    /// Computed status equals the persisted one
    Unchanged,
}

fn format_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Compute the status that results from applying `update` to `current`
///
/// Conditions stay unique by type and sorted by type. `lastTransitionTime` of
/// the updated condition moves only when its status flips, or when its reason
/// changes and the update is flagged as a reason change. It never moves
/// backwards.
#[must_use]
pub fn compute_status(
    current: &VaultSecretStatus,
    update: &StatusUpdate,
    now: DateTime<Utc>,
) -> VaultSecretStatus {
    let mut conditions: Vec<Condition> = Vec::with_capacity(current.conditions.len() + 1);
    for condition in &current.conditions {
        // Keep the first entry of any duplicated type
        if !conditions.iter().any(|c| c.type_ == condition.type_) {
            conditions.push(condition.clone());
        }
    }

    if let Some(cu) = &update.condition {
        let status = ConditionStatus::from(cu.status);
        match conditions.iter_mut().find(|c| c.type_ == cu.type_) {
            Some(existing) => {
                let status_changed = existing.status != status;
                let reason_changed = existing.reason != cu.reason;
                if status_changed || (reason_changed && cu.reason_change) {
                    existing.last_transition_time =
                        next_transition_time(&existing.last_transition_time, now);
                }
                existing.status = status;
                existing.reason.clone_from(&cu.reason);
                existing.message.clone_from(&cu.message);
            }
            None => conditions.push(Condition {
                type_: cu.type_.clone(),
                status,
                reason: cu.reason.clone(),
                message: cu.message.clone(),
                last_transition_time: format_time(now),
            }),
        }
    }

    conditions.sort_by(|a, b| a.type_.cmp(&b.type_));

    VaultSecretStatus {
        phase: update
            .phase
            .as_persisted()
            .map(str::to_string)
            .or_else(|| current.phase.clone()),
        conditions,
    }
}

/// `now`, unless the previous time is later (clock skew between replicas)
fn next_transition_time(previous: &str, now: DateTime<Utc>) -> String {
    match DateTime::parse_from_rfc3339(previous) {
        Ok(prev) if prev.with_timezone(&Utc) > now => previous.to_string(),
        _ => format_time(now),
    }
}

/// Apply `update` to `source`, writing only if the status changes
///
/// The write carries `source`'s resourceVersion; a concurrent change surfaces
/// as [`ClusterError::Conflict`] and the caller must re-read before trying
/// again.
pub async fn apply_status(
    cluster: &dyn ClusterApi,
    source: &VaultSecret,
    update: &StatusUpdate,
    now: DateTime<Utc>,
) -> Result<StatusWrite, ClusterError> {
    let current = source.status.clone().unwrap_or_default();
    let next = compute_status(&current, update, now);

    if next == current {
        debug!(phase = %update.phase, "Skipping status update, no change");
        metrics::increment_status_writes_skipped();
        return Ok(StatusWrite::Unchanged);
    }

    cluster.patch_status(source, &next).await?;
    metrics::increment_status_writes();
    Ok(StatusWrite::Written)
}
