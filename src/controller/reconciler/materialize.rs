//! # Secret Materialization
//!
//! Turns field mappings and fetched values into the exact contents of the
//! managed Secret, and compares those contents with what is in the cluster.

use crate::constants::{MANAGED_BY_LABEL, MANAGED_BY_VALUE};
use crate::crd::VaultSecret;
use crate::provider::FetchedFields;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

/// Desired `Secret.data`, keyed by destination name
pub type SecretData = BTreeMap<String, ByteString>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MaterializeError {
    #[error("source field '{source_field}' for key '{destination}' is missing")]
    MissingSourceField {
        destination: String,
        source_field: String,
    },
    #[error("source object has no uid; cannot own the managed secret")]
    MissingUid,
}

impl MaterializeError {
    /// Condition reason recorded on the source object
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            MaterializeError::MissingSourceField { .. } => "MissingSourceField",
            MaterializeError::MissingUid => "InvalidSpec",
        }
    }
}

/// Map fetched source fields onto destination keys
///
/// Deterministic in its inputs. The first mapping whose source field is absent
/// aborts the whole materialization; no partial data is returned.
pub fn materialize(
    field_mappings: &BTreeMap<String, String>,
    fetched: &FetchedFields,
) -> Result<SecretData, MaterializeError> {
    field_mappings
        .iter()
        .map(|(destination, source_field)| {
            fetched
                .get(source_field)
                .map(|bytes| (destination.clone(), ByteString(bytes.clone())))
                .ok_or_else(|| MaterializeError::MissingSourceField {
                    destination: destination.clone(),
                    source_field: source_field.clone(),
                })
        })
        .collect()
}

/// Build the managed Secret for a source object
///
/// Same namespace and name as the source, `type` from `secretKind`, and a
/// controller owner reference so the Secret is garbage-collected with it.
pub fn build_managed_secret(source: &VaultSecret, data: SecretData) -> Result<Secret, MaterializeError> {
    let owner = source
        .controller_owner_ref(&())
        .ok_or(MaterializeError::MissingUid)?;

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(source.name_any()),
            namespace: source.namespace(),
            owner_references: Some(vec![owner]),
            labels: Some(BTreeMap::from([(
                MANAGED_BY_LABEL.to_string(),
                MANAGED_BY_VALUE.to_string(),
            )])),
            ..Default::default()
        },
        type_: Some(source.spec.secret_kind.as_str().to_string()),
        data: Some(data),
        ..Default::default()
    })
}

/// Rewrite an existing Secret's data in place
///
/// Labels, annotations and other metadata set by others are preserved. The
/// resourceVersion of `existing` is kept so the write is rejected if the Secret
/// changed since it was read. A Secret without a controller is adopted.
pub fn with_desired_data(
    existing: &Secret,
    source: &VaultSecret,
    data: SecretData,
) -> Result<Secret, MaterializeError> {
    let owner = source
        .controller_owner_ref(&())
        .ok_or(MaterializeError::MissingUid)?;

    let mut secret = existing.clone();
    secret.data = Some(data);
    secret.string_data = None;

    let owners = secret.metadata.owner_references.get_or_insert_with(Vec::new);
    if !owners.iter().any(|o| o.uid == owner.uid) {
        owners.push(owner);
    }
    secret
        .metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
    Ok(secret)
}

/// UID of the Secret's controlling owner, if any
#[must_use]
pub fn controller_uid(secret: &Secret) -> Option<&str> {
    secret
        .metadata
        .owner_references
        .as_ref()?
        .iter()
        .find(|o| o.controller == Some(true))
        .map(|o| o.uid.as_str())
}

/// Whether the Secret's data is byte-identical to the desired data
///
/// Missing `data` counts as empty. Extra keys count as a difference.
#[must_use]
pub fn secret_data_matches(secret: &Secret, desired: &SecretData) -> bool {
    match &secret.data {
        Some(actual) => actual == desired,
        None => desired.is_empty(),
    }
}
