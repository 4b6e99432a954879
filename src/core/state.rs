// src/core/state.rs

//! The central, Arc'd context shared across every task on a node. Built
//! once at boot by `HostctlState::initialize`, which hands back both the
//! `Arc<HostctlState>` itself and a `StateInit` bundle of the receiver
//! halves the spawner needs to wire up background tasks -- the same split
//! the teacher uses to keep construction order explicit without a giant
//! positional constructor.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::info;

use crate::config::Config;
use crate::core::bus::{Bus, Message as BusMessage};
use crate::core::coordinator::Coordinator;
use crate::core::errors::HostctlError;
use crate::core::extensions::ExtensionChain;
use crate::core::ingress::HostMessage;
use crate::core::lifecycle::platform::DefaultPlatform;
use crate::core::lifecycle::LifecycleManager;
use crate::core::registry::HostRegistry;
use crate::core::rpc::executor::RpcExecutor;
use crate::core::rpc::RpcClient;
use crate::core::scheduler::Scheduler;
use crate::core::store::Store;

/// Everything a background task might need, gathered once at boot.
pub struct HostctlState {
    pub config: Config,
    pub store: Store,
    pub bus: Arc<Bus>,
    pub registry: Arc<HostRegistry>,
    pub coordinator: Arc<Coordinator>,
    pub lifecycle: Arc<LifecycleManager<DefaultPlatform>>,
    pub scheduler: Arc<Scheduler<DefaultPlatform>>,
    pub rpc: RpcClient,
    pub rpc_executor: Arc<RpcExecutor<DefaultPlatform>>,
    pub shutdown_tx: broadcast::Sender<()>,
}

/// The channel endpoints handed off to the spawner; kept separate from
/// `HostctlState` so constructing the shared context doesn't also
/// require deciding which task owns which channel up front.
pub struct StateInit {
    pub state: Arc<HostctlState>,
    /// Fed into `Bus::run`; drained by the bus-routing task.
    pub bus_tx: mpsc::Sender<BusMessage>,
    pub bus_rx: mpsc::Receiver<BusMessage>,
    /// Fed into `Ingress::run`; drained by `Dispatcher::run`.
    pub dispatch_tx: mpsc::Sender<HostMessage>,
    pub dispatch_rx: mpsc::Receiver<HostMessage>,
}

impl HostctlState {
    pub async fn initialize(config: Config) -> Result<StateInit, HostctlError> {
        info!(node_name = %config.node_name, guild_id = config.guild_id, "initializing hostctl state");

        let store = Store::connect(&config.database_url).await?;
        store.migrate().await?;

        let listen_addr: std::net::SocketAddr = config
            .udp_listen_address
            .parse()
            .map_err(|e| HostctlError::Config(format!("invalid udp_listen_address: {e}")))?;

        let registry = Arc::new(HostRegistry::new());
        let coordinator = Arc::new(Coordinator::new(
            store.clone(),
            config.guild_id,
            config.node_name.clone(),
            config.public_ip.clone(),
            listen_addr.ip().to_string(),
            listen_addr.port(),
            config.preferred_master,
            config.slow_system,
            Some(config.heartbeat),
        ));
        // The bus needs to know when this node is master to accept messages
        // addressed to the floating "Master" identity; constructed after the
        // coordinator so it can share its mastership flag rather than poll it.
        let bus = Arc::new(Bus::new(
            store.pool().clone(),
            config.guild_id,
            config.node_name.clone(),
            coordinator.master_flag(),
        ));
        let platform = Arc::new(DefaultPlatform::default());
        let lifecycle = Arc::new(LifecycleManager::new(
            platform,
            registry.clone(),
            bus.clone(),
            config.guild_id,
            config.dcs_executable.clone(),
            config.slow_system,
            ExtensionChain::new(Vec::new()),
        ));
        let scheduler = Arc::new(Scheduler::new(registry.clone(), lifecycle.clone(), bus.clone(), config.guild_id));
        let rpc = RpcClient::new(bus.clone(), config.guild_id, config.node_name.clone());
        let rpc_executor = Arc::new(RpcExecutor::new(
            bus.clone(),
            config.guild_id,
            config.node_name.clone(),
            registry.clone(),
            lifecycle.clone(),
        ));

        let (shutdown_tx, _) = broadcast::channel(16);
        let (bus_tx, bus_rx) = mpsc::channel(1024);
        let (dispatch_tx, dispatch_rx) = mpsc::channel(1024);

        let state = Arc::new(HostctlState {
            config,
            store,
            bus,
            registry,
            coordinator,
            lifecycle,
            scheduler,
            rpc,
            rpc_executor,
            shutdown_tx,
        });

        Ok(StateInit {
            state,
            bus_tx,
            bus_rx,
            dispatch_tx,
            dispatch_rx,
        })
    }
}

#[allow(dead_code)]
fn _assert_send_sync<T: Send + Sync>() {}
#[allow(dead_code)]
fn _hostctl_state_is_send_sync() {
    _assert_send_sync::<HostctlState>();
}
