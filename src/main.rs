//! # secrets-broker
//!
//! Controller binary. See the library crate for the reconcile logic.

use anyhow::Result;
use secrets_broker::runtime::{initialization::initialize, watch_loop::run_watch_loop};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;

    run_watch_loop(
        init.sources,
        init.secrets,
        init.reconciler,
        init.server_state,
        &init.config,
    )
    .await
}
