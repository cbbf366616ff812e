//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! Defaults here can be overridden through environment variables read by
//! [`crate::config::ControllerConfig::from_env`].

/// Name used as field manager and event reporter
pub const CONTROLLER_NAME: &str = "secrets-broker";

/// Label set on every managed Secret
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`]
pub const MANAGED_BY_VALUE: &str = "secrets-broker";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default periodic re-check of InSync objects (seconds)
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 300;

/// Default first retry delay after a retriable failure (milliseconds)
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1000;

/// Default backoff ceiling (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 300_000;

/// Default hold-off after the provider rejects a request (seconds)
pub const DEFAULT_REJECTED_COOLDOWN_SECS: u64 = 900;

/// Default requeue delay after an optimistic-concurrency conflict (milliseconds)
pub const DEFAULT_CONFLICT_REQUEUE_MS: u64 = 100;

/// Default deadline for a single reconcile invocation (seconds)
pub const DEFAULT_RECONCILE_TIMEOUT_SECS: u64 = 30;

/// Default HTTP timeout for provider requests (seconds)
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 10;

/// Default number of reconciles running at once across distinct objects
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: u16 = 10;

/// Default delay before restarting a watch stream that ended (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Requeue delay after a phase transition so the next step runs promptly
pub const TRANSITION_REQUEUE_MS: u64 = 500;

/// Fallback requeue when no backoff is recorded for a failed object (seconds)
pub const DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS: u64 = 60;
