//! # Initialization
//!
//! Controller startup: rustls, logging, metrics, the probe server, the
//! Kubernetes client and the reconciler context.

use crate::config::ControllerConfig;
use crate::constants::CONTROLLER_NAME;
use crate::controller::reconciler::{
    KubeClusterApi, KubeEventSink, Reconciler, ReconcilerSettings, SystemClock,
};
use crate::controller::server::{start_server, ServerState};
use crate::crd::VaultSecret;
use crate::observability::{self, logging};
use crate::provider::VaultKvProvider;
use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ListParams};
use kube::Client;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Everything the watch loop needs
pub struct InitializationResult {
    pub sources: Api<VaultSecret>,
    pub secrets: Api<Secret>,
    pub reconciler: Arc<Reconciler>,
    pub server_state: Arc<ServerState>,
    pub config: ControllerConfig,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("config", &self.config)
            .field("server_ready", &self.server_state.ready())
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
///
/// # Errors
///
/// Fails when logging or metrics cannot be installed, the probe server does
/// not come up, the cluster is unreachable, or the `VaultSecret` CRD is not
/// installed.
pub async fn initialize() -> Result<InitializationResult> {
    // Must run before any TLS client is built
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("Failed to install rustls crypto provider");
    }

    let config = ControllerConfig::from_env();
    logging::init_logging(logging::LogFormat::parse(&config.log_format))?;

    info!("Starting {}", CONTROLLER_NAME);
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let server_state = ServerState::new();
    let server_state_clone = server_state.clone();
    let server_port = config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle, &config).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let (sources, secrets): (Api<VaultSecret>, Api<Secret>) = match &config.watch_namespace {
        Some(namespace) => {
            info!("Watching namespace '{}'", namespace);
            (
                Api::namespaced(client.clone(), namespace),
                Api::namespaced(client.clone(), namespace),
            )
        }
        None => {
            info!("Watching all namespaces");
            (Api::all(client.clone()), Api::all(client.clone()))
        }
    };

    // Fail fast instead of letting the watch retry forever against a missing CRD
    let existing = sources
        .list(&ListParams::default().limit(1))
        .await
        .context("VaultSecret CRD is not installed or not readable; install it with `crdgen`")?;
    info!(
        "VaultSecret CRD is queryable ({} object(s) in first page)",
        existing.items.len()
    );

    let token = VaultKvProvider::token_from_env()?;
    if token.is_none() {
        warn!("No VAULT_TOKEN or VAULT_TOKEN_FILE set, store requests will be unauthenticated");
    }
    let provider = VaultKvProvider::new(token, config.provider_timeout())?;

    let reconciler = Arc::new(Reconciler::new(
        Arc::new(KubeClusterApi::new(client.clone())),
        Arc::new(provider),
        Arc::new(SystemClock),
        Arc::new(KubeEventSink::new(client, CONTROLLER_NAME)),
        ReconcilerSettings::from(&config),
    ));

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        sources,
        secrets,
        reconciler,
        server_state,
        config,
    })
}

async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    config: &ControllerConfig,
) -> Result<()> {
    let startup_timeout = Duration::from_secs(config.server_startup_timeout_secs);
    let poll_interval = Duration::from_millis(config.server_poll_interval_ms);
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state.is_listening.load(Ordering::Relaxed) {
            info!("HTTP server is accepting connections");
            return Ok(());
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }
}
