//! # VaultSecret Spec
//!
//! The user-authored resource declaring which Vault fields end up in which
//! keys of the managed Secret.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// VaultSecret Custom Resource Definition
///
/// Declares a mapping from fields stored at a Vault path to keys of a
/// Kubernetes Secret with the same namespace and name as this resource.
///
/// # Example
///
/// ```yaml
/// apiVersion: secrets-broker.io/v1alpha1
/// kind: VaultSecret
/// metadata:
///   name: db-credentials
///   namespace: payments
/// spec:
///   storeLocation: https://vault.internal:8200
///   sourcePath: secret/data/payments/db
///   secretKind: kubernetes.io/basic-auth
///   fieldMappings:
///     username: svc-user
///     password: svc-pass
/// ```
#[derive(kube::CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "VaultSecret",
    group = "secrets-broker.io",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::VaultSecretStatus",
    shortname = "vs",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}, {"name":"Synchronized", "type":"string", "jsonPath":".status.conditions[?(@.type==\"SecretSynchronized\")].status"}, {"name":"Reason", "type":"string", "jsonPath":".status.conditions[?(@.type==\"SecretSynchronized\")].reason"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VaultSecretSpec {
    /// Base URL of the Vault server (e.g. "https://vault.internal:8200")
    pub store_location: String,
    /// API path of the secret below `/v1/` (e.g. "secret/data/payments/db" for KV v2)
    pub source_path: String,
    /// Type of the managed Secret
    pub secret_kind: SecretKind,
    /// Destination Secret key -> source field name in Vault
    pub field_mappings: BTreeMap<String, String>,
}

/// Type of the managed Secret (`Secret.type`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, schemars::JsonSchema)]
pub enum SecretKind {
    #[serde(rename = "Opaque")]
    Opaque,
    #[serde(rename = "kubernetes.io/basic-auth")]
    BasicAuth,
    #[serde(rename = "kubernetes.io/ssh-auth")]
    SshAuth,
    #[serde(rename = "kubernetes.io/tls")]
    Tls,
    #[serde(rename = "kubernetes.io/dockerconfigjson")]
    DockerConfigJson,
    #[serde(rename = "kubernetes.io/dockercfg")]
    DockerCfg,
    #[serde(rename = "bootstrap.kubernetes.io/token")]
    BootstrapToken,
}

impl SecretKind {
    /// Value written to `Secret.type`
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretKind::Opaque => "Opaque",
            SecretKind::BasicAuth => "kubernetes.io/basic-auth",
            SecretKind::SshAuth => "kubernetes.io/ssh-auth",
            SecretKind::Tls => "kubernetes.io/tls",
            SecretKind::DockerConfigJson => "kubernetes.io/dockerconfigjson",
            SecretKind::DockerCfg => "kubernetes.io/dockercfg",
            SecretKind::BootstrapToken => "bootstrap.kubernetes.io/token",
        }
    }

    /// Whether a `Secret.type` read back from the API server denotes this kind.
    /// The API server defaults an unset type to `Opaque`.
    #[must_use]
    pub fn matches(&self, secret_type: Option<&str>) -> bool {
        secret_type.unwrap_or("Opaque") == self.as_str()
    }
}

impl fmt::Display for SecretKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
