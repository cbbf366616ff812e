//! # Watch Loop
//!
//! Runs the kube-runtime controller over `VaultSecret` objects and the
//! Secrets they own, restarting the stream if it ends before shutdown.

use crate::config::ControllerConfig;
use crate::constants::{MANAGED_BY_LABEL, MANAGED_BY_VALUE};
use crate::controller::reconciler::{reconcile, Reconciler};
use crate::controller::server::ServerState;
use crate::crd::VaultSecret;
use crate::runtime::error_policy::handle_reconciliation_error;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube_runtime::{controller, watcher, Controller};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

/// Run the controller until SIGINT or SIGTERM
///
/// # Errors
///
/// Currently never fails; the signature leaves room for startup checks.
pub async fn run_watch_loop(
    sources: Api<VaultSecret>,
    secrets: Api<Secret>,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    config: &ControllerConfig,
) -> Result<(), anyhow::Error> {
    info!("Starting controller watch loop...");

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();
    let shutdown_state = server_state.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal, initiating graceful shutdown...");
        shutdown_flag.store(true, Ordering::Relaxed);
        shutdown_state.set_ready(false);
        info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
    });

    let owned_selector = format!("{MANAGED_BY_LABEL}={MANAGED_BY_VALUE}");

    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        server_state.set_ready(true);

        Controller::new(sources.clone(), watcher::Config::default().any_semantic())
            .owns(
                secrets.clone(),
                watcher::Config::default().labels(&owned_selector),
            )
            .with_config(
                controller::Config::default().concurrency(config.max_concurrent_reconciliations),
            )
            .shutdown_on_signal()
            .run(reconcile, handle_reconciliation_error, reconciler.clone())
            .for_each(|result| async move {
                match result {
                    Ok((object, action)) => {
                        debug!(
                            "Reconciled {}/{}: {:?}",
                            object.namespace.as_deref().unwrap_or(""),
                            object.name,
                            action
                        );
                    }
                    Err(e) => {
                        warn!("Controller stream error: {}", e);
                    }
                }
            })
            .instrument(tracing::info_span!("controller.watch"))
            .await;

        if shutdown.load(Ordering::Relaxed) {
            info!("Watch stream drained after shutdown signal");
            break;
        }

        server_state.set_ready(false);
        warn!(
            "Controller stream ended unexpectedly, restarting in {:?}",
            config.watch_restart_delay()
        );
        tokio::time::sleep(config.watch_restart_delay()).await;
    }

    server_state.set_ready(false);
    info!("Controller stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
