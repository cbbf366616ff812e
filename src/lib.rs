//! # secrets-broker
//!
//! Kubernetes controller that keeps a `Secret` in step with each `VaultSecret`
//! object, copying selected fields from a Vault KV path into the Secret and
//! reporting progress through `status.phase` and a `SecretSynchronized`
//! condition.
//!
//! The reconcile logic only talks to the cluster, the secret store and the
//! clock through the traits in [`controller::reconciler`] and
//! [`provider::SecretProvider`], so it can run against in-memory fakes.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod provider;
pub mod runtime;
