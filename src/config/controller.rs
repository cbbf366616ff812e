//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use crate::constants::{
    DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_MAX_MS, DEFAULT_CONFLICT_REQUEUE_MS,
    DEFAULT_MAX_CONCURRENT_RECONCILIATIONS, DEFAULT_METRICS_PORT, DEFAULT_PROVIDER_TIMEOUT_SECS,
    DEFAULT_RECONCILE_TIMEOUT_SECS, DEFAULT_REJECTED_COOLDOWN_SECS, DEFAULT_RESYNC_INTERVAL_SECS,
    DEFAULT_SERVER_POLL_INTERVAL_MS, DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
    DEFAULT_WATCH_RESTART_DELAY_SECS,
};
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have defaults and can be overridden via environment variables,
/// typically populated from a ConfigMap with `envFrom` in the deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// HTTP port for `/metrics`, `/healthz` and `/readyz`
    pub metrics_port: u16,
    /// How long the HTTP server may take to bind (seconds)
    pub server_startup_timeout_secs: u64,
    /// Poll interval while waiting for the HTTP server (milliseconds)
    pub server_poll_interval_ms: u64,
    /// Periodic re-check of synchronized objects (seconds)
    pub resync_interval_secs: u64,
    /// First retry delay after a retriable failure (milliseconds)
    pub backoff_base_ms: u64,
    /// Backoff ceiling (milliseconds)
    pub backoff_max_ms: u64,
    /// Hold-off after the store rejects a request or the spec is invalid (seconds)
    pub rejected_cooldown_secs: u64,
    /// Requeue delay after a concurrent write (milliseconds)
    pub conflict_requeue_ms: u64,
    /// Deadline of one reconcile invocation (seconds)
    pub reconcile_timeout_secs: u64,
    /// HTTP timeout for secret store requests (seconds)
    pub provider_timeout_secs: u64,
    /// Reconciles running at once across distinct objects
    pub max_concurrent_reconciliations: u16,
    /// Only watch this namespace; all namespaces when unset
    pub watch_namespace: Option<String>,
    /// Delay before restarting a watch stream that ended (seconds)
    pub watch_restart_delay_secs: u64,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            metrics_port: var_or_default(&lookup, "METRICS_PORT", DEFAULT_METRICS_PORT),
            server_startup_timeout_secs: var_or_default(
                &lookup,
                "SERVER_STARTUP_TIMEOUT_SECS",
                DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            ),
            server_poll_interval_ms: var_or_default(
                &lookup,
                "SERVER_POLL_INTERVAL_MS",
                DEFAULT_SERVER_POLL_INTERVAL_MS,
            ),
            resync_interval_secs: var_or_default(
                &lookup,
                "RESYNC_INTERVAL_SECS",
                DEFAULT_RESYNC_INTERVAL_SECS,
            ),
            backoff_base_ms: var_or_default(&lookup, "BACKOFF_BASE_MS", DEFAULT_BACKOFF_BASE_MS),
            backoff_max_ms: var_or_default(&lookup, "BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX_MS),
            rejected_cooldown_secs: var_or_default(
                &lookup,
                "REJECTED_COOLDOWN_SECS",
                DEFAULT_REJECTED_COOLDOWN_SECS,
            ),
            conflict_requeue_ms: var_or_default(
                &lookup,
                "CONFLICT_REQUEUE_MS",
                DEFAULT_CONFLICT_REQUEUE_MS,
            ),
            reconcile_timeout_secs: var_or_default(
                &lookup,
                "RECONCILE_TIMEOUT_SECS",
                DEFAULT_RECONCILE_TIMEOUT_SECS,
            ),
            provider_timeout_secs: var_or_default(
                &lookup,
                "PROVIDER_TIMEOUT_SECS",
                DEFAULT_PROVIDER_TIMEOUT_SECS,
            ),
            max_concurrent_reconciliations: var_or_default(
                &lookup,
                "MAX_CONCURRENT_RECONCILIATIONS",
                DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            ),
            watch_namespace: lookup("WATCH_NAMESPACE")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            watch_restart_delay_secs: var_or_default(
                &lookup,
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            log_format: lookup("LOG_FORMAT").unwrap_or_else(|| "json".to_string()),
        }
    }

    /// Get provider request timeout
    #[must_use]
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    /// Get watch restart delay duration
    #[must_use]
    pub fn watch_restart_delay(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }
}

/// Read a variable or return the default when unset or unparsable
fn var_or_default<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
