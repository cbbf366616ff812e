//! # Types
//!
//! Core types for the reconciler.

use crate::config::ControllerConfig;
use crate::controller::backoff::BackoffRegistry;
use crate::controller::reconciler::cluster::{ClusterApi, ClusterError};
use crate::controller::reconciler::events::EventSink;
use crate::controller::reconciler::transition::SyncFailure;
use crate::crd::UnknownPhase;
use crate::provider::SecretProvider;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    /// Concurrent write; re-read and recompute on the next invocation
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Store refused the request or returned garbage
    #[error("Provider rejected request ({reason}): {message}")]
    ProviderRejected { reason: String, message: String },
    #[error("Unrecognized status.phase: {0}")]
    UnknownPhase(#[from] UnknownPhase),
    /// Spec, mapping or existing Secret cannot be reconciled as declared
    #[error("Invalid source ({reason}): {message}")]
    InvalidSource { reason: String, message: String },
    #[error("Reconcile exceeded deadline of {0:?}")]
    DeadlineExceeded(Duration),
    #[error("Kubernetes API error: {0}")]
    Kube(#[source] kube::Error),
}

impl ReconcilerError {
    /// Label used for the error metric
    #[must_use]
    pub fn metric_label(&self) -> &'static str {
        match self {
            ReconcilerError::Conflict(_) => "conflict",
            ReconcilerError::ProviderUnavailable(_) => "provider_unavailable",
            ReconcilerError::ProviderRejected { .. } => "provider_rejected",
            ReconcilerError::UnknownPhase(_) => "unknown_phase",
            ReconcilerError::InvalidSource { .. } => "invalid_source",
            ReconcilerError::DeadlineExceeded(_) => "deadline_exceeded",
            ReconcilerError::Kube(_) => "kube",
        }
    }

    /// Retried with exponential backoff
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ReconcilerError::ProviderUnavailable(_)
                | ReconcilerError::DeadlineExceeded(_)
                | ReconcilerError::Kube(_)
        )
    }

    /// Held back for the rejected cooldown
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        matches!(
            self,
            ReconcilerError::ProviderRejected { .. } | ReconcilerError::InvalidSource { .. }
        )
    }
}

impl From<ClusterError> for ReconcilerError {
    fn from(err: ClusterError) -> Self {
        match err {
            // A vanished object is picked up by the re-read of the next invocation
            ClusterError::Conflict(key)
            | ClusterError::AlreadyExists(key)
            | ClusterError::NotFound(key) => ReconcilerError::Conflict(key),
            ClusterError::Kube(e) => ReconcilerError::Kube(e),
        }
    }
}

impl From<SyncFailure> for ReconcilerError {
    fn from(failure: SyncFailure) -> Self {
        if failure.retriable {
            ReconcilerError::ProviderUnavailable(failure.message)
        } else if failure.from_provider {
            ReconcilerError::ProviderRejected {
                reason: failure.reason.to_string(),
                message: failure.message,
            }
        } else {
            ReconcilerError::InvalidSource {
                reason: failure.reason.to_string(),
                message: failure.message,
            }
        }
    }
}

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Timing knobs of the reconciler
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub resync_interval: Duration,
    pub transition_requeue: Duration,
    pub conflict_requeue: Duration,
    pub rejected_cooldown: Duration,
    pub reconcile_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl From<&ControllerConfig> for ReconcilerSettings {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            resync_interval: Duration::from_secs(config.resync_interval_secs),
            transition_requeue: Duration::from_millis(crate::constants::TRANSITION_REQUEUE_MS),
            conflict_requeue: Duration::from_millis(config.conflict_requeue_ms),
            rejected_cooldown: Duration::from_secs(config.rejected_cooldown_secs),
            reconcile_timeout: Duration::from_secs(config.reconcile_timeout_secs),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
        }
    }
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self::from(&ControllerConfig::default())
    }
}

/// Everything a reconcile needs, handed in at construction
pub struct Reconciler {
    pub cluster: Arc<dyn ClusterApi>,
    pub provider: Arc<dyn SecretProvider>,
    pub clock: Arc<dyn Clock>,
    pub events: Arc<dyn EventSink>,
    /// Per-object retry state, keyed by `namespace/name`
    pub backoffs: BackoffRegistry,
    pub settings: ReconcilerSettings,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("settings", &self.settings)
            .field("backoffs", &self.backoffs)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        provider: Arc<dyn SecretProvider>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            backoffs: BackoffRegistry::new(settings.backoff_base, settings.backoff_max),
            cluster,
            provider,
            clock,
            events,
            settings,
        }
    }
}
