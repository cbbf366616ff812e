//! # Cluster Access
//!
//! The reconciler's view of the Kubernetes API: reads of the source object and
//! its managed Secret, and the three writes it is allowed to make. Every read
//! goes to the API server; nothing here is cached.

use crate::constants::CONTROLLER_NAME;
use crate::crd::{VaultSecret, VaultSecretStatus};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use std::fmt;

/// Namespace and name of a namespaced object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a namespaced resource
    #[must_use]
    pub fn of<K: ResourceExt>(obj: &K) -> Self {
        Self::new(obj.namespace().unwrap_or_default(), obj.name_any())
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// Object vanished between read and write
    #[error("{0} not found")]
    NotFound(String),
    /// Write rejected because the resourceVersion is stale
    #[error("conflicting write to {0}")]
    Conflict(String),
    /// Create rejected because the object exists
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

/// Access to VaultSecrets and Secrets
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_source(&self, key: &ObjectKey) -> Result<Option<VaultSecret>, ClusterError>;

    async fn get_secret(&self, key: &ObjectKey) -> Result<Option<Secret>, ClusterError>;

    /// Create a Secret. `AlreadyExists` if one with that name exists.
    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ClusterError>;

    /// Replace a Secret, guarded by its `metadata.resourceVersion`
    async fn replace_secret(&self, secret: &Secret) -> Result<Secret, ClusterError>;

    /// Write the status subresource, guarded by `source.metadata.resourceVersion`
    async fn patch_status(
        &self,
        source: &VaultSecret,
        status: &VaultSecretStatus,
    ) -> Result<VaultSecret, ClusterError>;
}

/// `ClusterApi` backed by a kube `Client`
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl fmt::Debug for KubeClusterApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeClusterApi").finish_non_exhaustive()
    }
}

impl KubeClusterApi {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn sources(&self, namespace: &str) -> Api<VaultSecret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn post_params() -> PostParams {
    PostParams {
        dry_run: false,
        field_manager: Some(CONTROLLER_NAME.to_string()),
    }
}

/// Map the HTTP status of a rejected write. 409 means different things for
/// create and update.
fn classify_write_status(code: u16, key: &ObjectKey, on_create: bool) -> Option<ClusterError> {
    match code {
        409 if on_create => Some(ClusterError::AlreadyExists(key.to_string())),
        409 => Some(ClusterError::Conflict(key.to_string())),
        404 => Some(ClusterError::NotFound(key.to_string())),
        _ => None,
    }
}

fn classify_write_error(err: kube::Error, key: &ObjectKey, on_create: bool) -> ClusterError {
    if let kube::Error::Api(api_err) = &err {
        if let Some(classified) = classify_write_status(api_err.code, key, on_create) {
            return classified;
        }
    }
    ClusterError::Kube(err)
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_source(&self, key: &ObjectKey) -> Result<Option<VaultSecret>, ClusterError> {
        Ok(self.sources(&key.namespace).get_opt(&key.name).await?)
    }

    async fn get_secret(&self, key: &ObjectKey) -> Result<Option<Secret>, ClusterError> {
        Ok(self.secrets(&key.namespace).get_opt(&key.name).await?)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ClusterError> {
        let key = ObjectKey::of(secret);
        self.secrets(&key.namespace)
            .create(&post_params(), secret)
            .await
            .map_err(|e| classify_write_error(e, &key, true))
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<Secret, ClusterError> {
        let key = ObjectKey::of(secret);
        self.secrets(&key.namespace)
            .replace(&key.name, &post_params(), secret)
            .await
            .map_err(|e| classify_write_error(e, &key, false))
    }

    async fn patch_status(
        &self,
        source: &VaultSecret,
        status: &VaultSecretStatus,
    ) -> Result<VaultSecret, ClusterError> {
        let key = ObjectKey::of(source);
        // A merge patch carrying resourceVersion is rejected with 409 if the
        // object changed since it was read.
        let patch = json!({
            "metadata": { "resourceVersion": source.resource_version() },
            "status": status,
        });
        let params = PatchParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..Default::default()
        };
        self.sources(&key.namespace)
            .patch_status(&key.name, &params, &Patch::Merge(&patch))
            .await
            .map_err(|e| classify_write_error(e, &key, false))
    }
}
