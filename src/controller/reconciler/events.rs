//! # Events
//!
//! Kubernetes Events published on VaultSecret objects, visible with
//! `kubectl describe vaultsecret`.
//!
//! Publishing is fire-and-forget: a failed event is logged and never fails the
//! reconcile.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Sink for Kubernetes Events
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publish an event about `resource_ref`
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Event sink backed by `kube::runtime::events::Recorder`
pub struct KubeEventSink {
    recorder: Recorder,
}

impl std::fmt::Debug for KubeEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeEventSink").finish_non_exhaustive()
    }
}

impl KubeEventSink {
    /// `controller_name` is shown as the reporting component of each event
    #[must_use]
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish event");
        }
    }
}

/// Event reasons (REASON column of `kubectl get events`)
pub mod reasons {
    /// Managed secret created
    pub const SECRET_CREATED: &str = "SecretCreated";
    /// Managed secret data rewritten
    pub const SECRET_UPDATED: &str = "SecretUpdated";
    /// Managed secret missing or differing from the store
    pub const SECRET_DRIFTED: &str = "SecretDrifted";
    /// Fetching or materializing failed
    pub const SYNC_FAILED: &str = "SyncFailed";
    /// status.phase holds a value the controller does not recognize
    pub const UNKNOWN_PHASE: &str = "UnknownPhase";
}

/// Event actions (ACTION column of `kubectl get events`)
pub mod actions {
    pub const RECONCILE: &str = "Reconcile";
    pub const CREATE_SECRET: &str = "CreateSecret";
    pub const UPDATE_SECRET: &str = "UpdateSecret";
}

