//! # Custom Resource Definitions
//!
//! CRD types for the Secrets Broker controller.
//!
//! ## Module Structure
//!
//! - `spec.rs` - `VaultSecret` resource and the `SecretKind` of the managed Secret
//! - `status.rs` - Status subresource: sync phase and conditions

mod spec;
mod status;

pub use spec::{SecretKind, VaultSecret, VaultSecretSpec};
pub use status::{
    Condition, ConditionStatus, SyncPhase, UnknownPhase, VaultSecretStatus,
    SECRET_SYNCHRONIZED_CONDITION,
};
