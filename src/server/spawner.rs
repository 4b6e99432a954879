// src/server/spawner.rs

//! Spawns all of the node's long-running background tasks.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use super::initialization::Boot;
use super::metrics_server;
use crate::core::bus::Bus;
use crate::core::store::reaper;

/// Spawns every critical background task into the shared `JoinSet`, each
/// subscribed to its own handle of the shutdown broadcast so a single
/// `shutdown_tx.send(())` tears the whole node down cleanly.
pub async fn spawn_all(boot: &mut Boot) -> Result<()> {
    let state = boot.state.clone();
    let shutdown_tx = state.shutdown_tx.clone();
    let background_tasks = &mut boot.background_tasks;

    // --- Metrics server ---
    if state.config.metrics_enabled {
        let metrics_state = state.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            metrics_server::run_metrics_server(metrics_state, shutdown_rx).await;
            Ok(())
        });
    } else {
        info!("metrics server disabled in configuration");
    }

    // --- Node coordinator (heartbeat + election) ---
    {
        let coordinator = state.coordinator.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            coordinator.run(shutdown_rx).await?;
            Ok(())
        });
    }

    // --- Scheduler ---
    {
        let scheduler = state.scheduler.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            scheduler.run(shutdown_rx).await?;
            Ok(())
        });
    }

    // --- Stale-file reaper (runs on every node; harmless if not master) ---
    {
        let store = state.store.clone();
        let max_age = state.config.file_reap_age;
        let shutdown_rx = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            reaper::run(store, max_age, shutdown_rx).await?;
            Ok(())
        });
    }

    // --- Bus listener (Postgres LISTEN/NOTIFY) ---
    {
        let bus: Arc<Bus> = state.bus.clone();
        let bus_tx = boot.init.bus_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            bus.run(bus_tx, shutdown_rx).await?;
            Ok(())
        });
    }

    // --- Bus message router: hands RPC replies to the correlation map and
    // services incoming RPC requests against this node's local state ---
    {
        let rpc = state.rpc.clone();
        let executor = state.rpc_executor.clone();
        let mut bus_rx = std::mem::replace(&mut boot.init.bus_rx, tokio::sync::mpsc::channel(1).1);
        let mut shutdown_rx = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            loop {
                tokio::select! {
                    msg = bus_rx.recv() => {
                        let Some(msg) = msg else { break; };
                        let Ok(envelope) = serde_json::from_value::<crate::core::bus::Envelope>(msg.data) else {
                            continue;
                        };
                        match envelope {
                            crate::core::bus::Envelope::RpcReply { .. } => rpc.route_reply(envelope),
                            crate::core::bus::Envelope::RpcRequest { token, method, params, from_node } => {
                                let executor = executor.clone();
                                tokio::spawn(async move {
                                    executor.handle(token, method, params, from_node).await;
                                });
                            }
                            crate::core::bus::Envelope::Event { .. } => {}
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            Ok(())
        });
    }

    // --- UDP ingress ---
    {
        let ingress = boot.ingress.take().expect("ingress bound during setup, spawned at most once");
        let dispatch_tx = boot.init.dispatch_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            ingress.run(dispatch_tx, shutdown_rx).await?;
            Ok(())
        });
    }

    // --- Event dispatch fan-out ---
    {
        let listeners: Vec<Arc<dyn crate::core::dispatch::Listener>> =
            vec![Arc::new(crate::core::dispatch::HostStateListener::new(state.lifecycle.clone()))];
        let dispatcher = Arc::new(crate::core::dispatch::Dispatcher::new(
            listeners,
            state.config.slow_system,
            state.coordinator.master_flag(),
            state.bus.clone(),
            state.config.guild_id,
            state.config.node_name.clone(),
        ));
        let dispatch_rx = std::mem::replace(&mut boot.init.dispatch_rx, tokio::sync::mpsc::channel(1).1);
        let shutdown_rx = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            dispatcher.run(dispatch_rx, shutdown_rx).await;
            Ok(())
        });
    }

    info!("all background tasks have been spawned");
    Ok(())
}
