// src/server/mod.rs

use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::{filter::EnvFilter, reload};

use crate::config::Config;

mod initialization;
mod metrics_server;
mod spawner;

/// The main server startup function, orchestrating all setup phases.
pub async fn run(
    config: Config,
    log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
) -> Result<()> {
    // 1. Connect to the store, build the shared context, bind the UDP listener.
    let mut boot = initialization::setup(config, log_reload_handle).await?;

    // 2. Spawn all background tasks: coordinator, scheduler, bus, ingress, dispatch.
    spawner::spawn_all(&mut boot).await?;

    // 3. Block until every background task exits (normally only on shutdown).
    while let Some(result) = boot.background_tasks.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "background task returned an error"),
            Err(e) => tracing::error!(error = %e, "background task panicked"),
        }
    }

    Ok(())
}
