//! # Reconciler
//!
//! Core reconciliation logic for `VaultSecret` resources.
//!
//! The reconciler drives each VaultSecret and the Secret it owns toward the
//! values stored in Vault and records progress in `status`.
//!
//! ## Phases
//!
//! ```text
//! Empty -> Pending -> InSync <-> Stale
//!             |          |         |
//!             +-------> Error <----+
//! ```
//!
//! 1. First observation records `Pending`
//! 2. `Pending` fetches from the store and creates the Secret (`InSync`)
//! 3. `InSync` re-fetches periodically; a missing or changed Secret goes `Stale`
//! 4. `Stale` rewrites the Secret in place (`InSync`)
//! 5. Failures record `Error`; after backoff the object goes back to `Pending`

pub mod cluster;
pub mod events;
pub mod materialize;
pub mod reconcile;
pub mod status;
pub mod transition;
pub mod types;
pub mod validation;

// Re-export public API
pub use cluster::{ClusterApi, ClusterError, KubeClusterApi, ObjectKey};
pub use events::{EventSink, KubeEventSink};
pub use reconcile::reconcile;
pub use types::{Clock, Reconciler, ReconcilerError, ReconcilerSettings, SystemClock};
