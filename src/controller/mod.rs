//! # Controller
//!
//! Core controller modules for the secrets broker.
//!
//! - `backoff`: exponential backoff with jitter, tracked per object
//! - `reconciler`: the VaultSecret state machine
//! - `server`: HTTP server for metrics and health checks

pub mod backoff;
pub mod reconciler;
pub mod server;
