//! # Reconcile
//!
//! Executes one reconcile invocation for a VaultSecret: fresh reads, a planned
//! transition from [`super::transition`], then at most one Secret write
//! followed by at most one status write.

use crate::controller::reconciler::cluster::{ClusterError, ObjectKey};
use crate::controller::reconciler::events::{actions, reasons};
use crate::controller::reconciler::materialize::{
    build_managed_secret, materialize, with_desired_data, SecretData,
};
use crate::controller::reconciler::status::{apply_status, StatusWrite};
use crate::controller::reconciler::transition::{
    plan_initialize, plan_retry, plan_sync, Observed, Outcome, Plan, SecretWrite, SyncFailure,
};
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::controller::reconciler::validation::validate_spec;
use crate::crd::{SyncPhase, VaultSecret, VaultSecretStatus};
use crate::observability::metrics;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::Resource;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Reconcile one VaultSecret
///
/// `obj` only identifies the object; its state is re-read from the API server.
/// The invocation is bounded by the configured deadline. Failures update the
/// object's backoff before being returned to the dispatcher.
pub async fn reconcile(
    obj: Arc<VaultSecret>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let key = ObjectKey::of(obj.as_ref());
    let generation = obj.metadata.generation;

    let span = tracing::info_span!(
        "reconcile",
        resource.namespace = %key.namespace,
        resource.name = %key.name
    );

    async move {
        let start = Instant::now();
        metrics::increment_reconciliations();

        let deadline = ctx.settings.reconcile_timeout;
        let result = match tokio::time::timeout(deadline, reconcile_once(&key, &ctx)).await {
            Ok(result) => result,
            Err(_) => Err(ReconcilerError::DeadlineExceeded(deadline)),
        };

        metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

        if let Err(err) = &result {
            metrics::increment_reconciliation_errors(err.metric_label());
            record_backoff(&ctx, &key, generation, err);
        }
        result
    }
    .instrument(span)
    .await
}

fn record_backoff(
    ctx: &Reconciler,
    key: &ObjectKey,
    generation: Option<i64>,
    err: &ReconcilerError,
) {
    let now = ctx.clock.now();
    let resource_key = key.to_string();
    if err.is_retriable() {
        let delay = ctx.backoffs.record_failure(&resource_key, generation, now);
        info!(
            attempt = ctx.backoffs.failures(&resource_key),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Retrying with backoff"
        );
    } else if err.is_rejected() {
        let cooldown = ctx.backoffs.record_cooldown(
            &resource_key,
            generation,
            now,
            ctx.settings.rejected_cooldown,
        );
        info!(cooldown_secs = cooldown.as_secs(), "Holding back after rejected sync");
    }
}

async fn reconcile_once(key: &ObjectKey, ctx: &Reconciler) -> Result<Action, ReconcilerError> {
    let Some(source) = ctx.cluster.get_source(key).await? else {
        debug!("VaultSecret no longer exists, nothing to do");
        return Ok(Action::await_change());
    };

    let phase = match source
        .status
        .as_ref()
        .map_or(Ok(SyncPhase::Empty), VaultSecretStatus::sync_phase)
    {
        Ok(phase) => phase,
        Err(unknown) => {
            warn!(phase = %unknown.0, "Refusing to reconcile unrecognized phase");
            ctx.events
                .publish(
                    &source.object_ref(&()),
                    EventType::Warning,
                    reasons::UNKNOWN_PHASE,
                    actions::RECONCILE,
                    Some(format!("status.phase '{}' is not recognized", unknown.0)),
                )
                .await;
            return Err(unknown.into());
        }
    };

    match phase {
        SyncPhase::Empty => {
            let plan = plan_initialize();
            execute(ctx, key, &source, phase, plan, None, None).await
        }
        SyncPhase::Error => {
            let now = ctx.clock.now();
            if let Some(remaining) =
                ctx.backoffs
                    .remaining(&key.to_string(), source.metadata.generation, now)
            {
                debug!(
                    remaining_ms = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
                    "Backoff has not elapsed"
                );
                return Ok(Action::requeue(remaining));
            }
            execute(ctx, key, &source, phase, plan_retry(), None, None).await
        }
        SyncPhase::Pending | SyncPhase::InSync | SyncPhase::Stale => {
            let desired = desired_data(&source, ctx).await;
            let secret = ctx.cluster.get_secret(key).await?;
            let plan = plan_sync(
                phase,
                &Observed {
                    source_uid: source.metadata.uid.as_deref(),
                    secret_kind: source.spec.secret_kind,
                    desired: desired.as_ref(),
                    secret: secret.as_ref(),
                },
            );
            let desired = desired.ok();
            execute(ctx, key, &source, phase, plan, desired.as_ref(), secret.as_ref()).await
        }
    }
}

/// Validate, fetch and materialize
async fn desired_data(source: &VaultSecret, ctx: &Reconciler) -> Result<SecretData, SyncFailure> {
    validate_spec(&source.spec)?;

    let start = Instant::now();
    let fetched = ctx
        .provider
        .fetch(&source.spec.store_location, &source.spec.source_path)
        .await;
    metrics::observe_provider_fetch(
        start.elapsed().as_secs_f64(),
        match &fetched {
            Ok(_) => "success",
            Err(e) => e.reason(),
        },
    );

    let fetched = fetched?;
    Ok(materialize(&source.spec.field_mappings, &fetched)?)
}

fn materialize_failure(err: impl Into<SyncFailure>) -> ReconcilerError {
    ReconcilerError::from(err.into())
}

async fn execute(
    ctx: &Reconciler,
    key: &ObjectKey,
    source: &VaultSecret,
    phase: SyncPhase,
    plan: Plan,
    desired: Option<&SecretData>,
    secret: Option<&Secret>,
) -> Result<Action, ReconcilerError> {
    let object_ref = source.object_ref(&());

    let plan = match (plan.secret_write, desired) {
        (Some(SecretWrite::Create), Some(desired)) => {
            let managed =
                build_managed_secret(source, desired.clone()).map_err(materialize_failure)?;
            match ctx.cluster.create_secret(&managed).await {
                Ok(_) => {
                    info!(
                        secret_type = %source.spec.secret_kind,
                        keys = desired.len(),
                        "Created managed Secret"
                    );
                    metrics::increment_secrets_created();
                    ctx.events
                        .publish(
                            &object_ref,
                            EventType::Normal,
                            reasons::SECRET_CREATED,
                            actions::CREATE_SECRET,
                            Some(format!("Created Secret {key} with {} key(s)", desired.len())),
                        )
                        .await;
                    plan
                }
                Err(ClusterError::AlreadyExists(_)) => {
                    verify_existing(ctx, key, source, phase, desired).await?
                }
                Err(e) => return Err(e.into()),
            }
        }
        (Some(SecretWrite::Update), Some(desired)) => {
            let Some(existing) = secret else {
                return Err(ReconcilerError::Conflict(key.to_string()));
            };
            let updated =
                with_desired_data(existing, source, desired.clone()).map_err(materialize_failure)?;
            ctx.cluster.replace_secret(&updated).await?;
            info!(keys = desired.len(), "Updated managed Secret data");
            metrics::increment_secrets_updated();
            ctx.events
                .publish(
                    &object_ref,
                    EventType::Normal,
                    reasons::SECRET_UPDATED,
                    actions::UPDATE_SECRET,
                    Some(format!("Restored data of Secret {key}")),
                )
                .await;
            plan
        }
        // Writes are only planned together with desired data
        (Some(_), None) => return Err(ReconcilerError::Conflict(key.to_string())),
        (None, _) => plan,
    };

    if plan.is_drift() && phase != SyncPhase::Stale {
        warn!("Managed Secret drifted from the secret store");
        metrics::increment_drift_detected();
        ctx.events
            .publish(
                &object_ref,
                EventType::Warning,
                reasons::SECRET_DRIFTED,
                actions::RECONCILE,
                plan.condition.as_ref().map(|c| c.message.clone()),
            )
            .await;
    }

    match apply_status(ctx.cluster.as_ref(), source, &plan.status_update(), ctx.clock.now()).await {
        Ok(StatusWrite::Written) => {
            if plan.next_phase != phase {
                info!(from = %phase, to = %plan.next_phase, "Phase transition");
                metrics::increment_phase_transitions(&plan.next_phase.to_string());
            }
        }
        Ok(StatusWrite::Unchanged) => {}
        Err(ClusterError::Conflict(_)) => {
            warn!("Status changed concurrently, will re-read and recompute");
            return Err(ReconcilerError::Conflict(key.to_string()));
        }
        Err(e) => return Err(e.into()),
    }

    match plan.outcome {
        Outcome::Requeue => Ok(Action::requeue(ctx.settings.transition_requeue)),
        Outcome::Resync => {
            ctx.backoffs.reset(&key.to_string());
            Ok(Action::requeue(ctx.settings.resync_interval))
        }
        Outcome::Failed(failure) => {
            warn!(reason = failure.reason, message = %failure.message, "Sync failed");
            ctx.events
                .publish(
                    &object_ref,
                    EventType::Warning,
                    reasons::SYNC_FAILED,
                    actions::RECONCILE,
                    Some(format!("{}: {}", failure.reason, failure.message)),
                )
                .await;
            Err(failure.into())
        }
    }
}

/// A create raced with another writer: re-read the Secret and plan against it
/// with the same desired data. Only a plan that needs no further write is
/// accepted; anything else is left to the next invocation.
async fn verify_existing(
    ctx: &Reconciler,
    key: &ObjectKey,
    source: &VaultSecret,
    phase: SyncPhase,
    desired: &SecretData,
) -> Result<Plan, ReconcilerError> {
    debug!("Secret already exists, verifying against desired data");
    let Some(existing) = ctx.cluster.get_secret(key).await? else {
        return Err(ReconcilerError::Conflict(key.to_string()));
    };

    // The create was planned from Pending, Error or a Stale object whose Secret
    // was gone, so verify the way Pending does
    let verify_phase = if phase == SyncPhase::Stale {
        SyncPhase::Stale
    } else {
        SyncPhase::Pending
    };
    let plan = plan_sync(
        verify_phase,
        &Observed {
            source_uid: source.metadata.uid.as_deref(),
            secret_kind: source.spec.secret_kind,
            desired: Ok(desired),
            secret: Some(&existing),
        },
    );

    if plan.secret_write.is_some() {
        return Err(ReconcilerError::Conflict(key.to_string()));
    }
    Ok(plan)
}
