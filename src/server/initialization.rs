// src/server/initialization.rs

//! Handles the complete boot sequence: loading configuration, connecting to
//! the store, building the shared state, and binding the UDP listener --
//! everything that must succeed before any background task is spawned.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinSet;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, reload};

use crate::config::Config;
use crate::core::ingress::Ingress;
use crate::core::state::{HostctlState, StateInit};

/// Everything built during boot, handed to the spawner and then to the
/// top-level run loop.
pub struct Boot {
    pub state: Arc<HostctlState>,
    pub init: StateInit,
    pub ingress: Option<Ingress>,
    pub background_tasks: JoinSet<anyhow::Result<()>>,
    pub log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
}

pub async fn setup(
    config: Config,
    log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
) -> Result<Boot> {
    log_startup_info(&config);

    let udp_addr = config
        .udp_listen_address
        .parse()
        .context("udp_listen_address was already validated but failed to reparse")?;

    let init = HostctlState::initialize(config).await.context("initializing shared state")?;
    let state = init.state.clone();

    let ingress = Ingress::bind(udp_addr, state.registry.clone())
        .await
        .context("binding udp ingress listener")?;

    info!(node_name = %state.config.node_name, "boot sequence complete");

    Ok(Boot {
        state,
        init,
        ingress: Some(ingress),
        background_tasks: JoinSet::new(),
        log_reload_handle,
    })
}

fn log_startup_info(config: &Config) {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        node_name = %config.node_name,
        guild_id = config.guild_id,
        udp_listen_address = %config.udp_listen_address,
        "starting hostctl"
    );
}
