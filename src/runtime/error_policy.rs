//! # Error Policy
//!
//! Decides when a failed reconcile runs again. The reconcile wrapper has
//! already recorded the failure in the per-object backoff registry, so this
//! only reads the delay back.

use crate::constants::DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS;
use crate::controller::reconciler::{ObjectKey, Reconciler, ReconcilerError, ReconcilerSettings};
use crate::crd::VaultSecret;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Error policy handed to the kube-runtime controller
pub fn handle_reconciliation_error(
    obj: Arc<VaultSecret>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let key = ObjectKey::of(obj.as_ref());

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.reconciliation_error",
        resource.namespace = %key.namespace,
        resource.name = %key.name,
        error.kind = error.metric_label()
    );
    let _error_guard = error_span.enter();

    let remaining = ctx.backoffs.remaining(
        &key.to_string(),
        obj.metadata.generation,
        ctx.clock.now(),
    );

    match requeue_delay(error, remaining, &ctx.settings) {
        Some(delay) => {
            if matches!(error, ReconcilerError::Conflict(_)) {
                info!("Concurrent write on {}, retrying in {:?}", key, delay);
            } else {
                error!("Reconciliation of {} failed: {}", key, error);
                info!(
                    "Retrying {} in {:?} (failures: {})",
                    key,
                    delay,
                    ctx.backoffs.failures(&key.to_string())
                );
            }
            Action::requeue(delay)
        }
        None => {
            warn!(
                "Not retrying {}: {}; waiting for the object to change",
                key, error
            );
            Action::await_change()
        }
    }
}

/// Delay before the next attempt, `None` to wait for a change to the object
#[must_use]
pub fn requeue_delay(
    error: &ReconcilerError,
    remaining: Option<Duration>,
    settings: &ReconcilerSettings,
) -> Option<Duration> {
    match error {
        ReconcilerError::Conflict(_) => Some(settings.conflict_requeue),
        // Retrying cannot help until someone edits the phase
        ReconcilerError::UnknownPhase(_) => None,
        _ => Some(remaining.unwrap_or(Duration::from_secs(
            DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS,
        ))),
    }
}
