// src/core/ingress/mod.rs

//! UDP ingress (component C): game hosts on this node speak a small JSON
//! datagram protocol directly to the local agent. Each datagram is either a
//! plain event notification or, if its command name starts with `sync-`, a
//! synchronous reply to an outstanding local wait -- correlated by the
//! datagram's `channel` field, not its command name, since a host can have
//! more than one outstanding `sync-` request for the same command at once.

mod worker;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::core::errors::HostctlError;
use crate::core::metrics;
use crate::core::registry::HostRegistry;

pub use worker::{HostMessage, WORKER_POOL_SIZE};

/// Datagrams are JSON objects with at least a `command` and `server_name` field.
const MAX_DATAGRAM_BYTES: usize = 65504;

/// Tracks local agents that are blocked awaiting a `sync-` reply, keyed by
/// `(server_name, channel)` -- the local equivalent of the cross-node RPC
/// correlation map, but scoped to a single UDP round-trip. `channel` is a
/// caller-chosen correlation id, not the command name -- a host can have
/// several outstanding requests for the same command in flight at once.
pub type SyncWaiters = Arc<parking_lot::Mutex<HashMap<(String, String), oneshot::Sender<serde_json::Value>>>>;

/// Commands whose `sync-` reply must still be dispatched to listeners, not
/// just handed to the waiter -- registration and mission-state queries drive
/// side effects beyond unblocking the caller.
const DISPATCH_EVEN_IF_SYNC: &[&str] = &["registerDCSServer", "getMissionUpdate"];

pub struct Ingress {
    socket: Arc<UdpSocket>,
    registry: Arc<HostRegistry>,
    sync_waiters: SyncWaiters,
}

impl Ingress {
    pub async fn bind(addr: SocketAddr, registry: Arc<HostRegistry>) -> Result<Self, HostctlError> {
        let socket = UdpSocket::bind(addr).await?;
        info!(%addr, "udp ingress bound");
        Ok(Self {
            socket: Arc::new(socket),
            registry,
            sync_waiters: Arc::new(parking_lot::Mutex::new(HashMap::new())),
        })
    }

    pub fn sync_waiters(&self) -> SyncWaiters {
        self.sync_waiters.clone()
    }

    /// Registers a one-shot waiter for the synchronous reply to a request
    /// already sent to `server_name`, correlated by `channel`. The reply
    /// arrives as a `sync-<command>` datagram carrying the same `channel`.
    pub fn register_sync_waiter(&self, server_name: &str, channel: &str) -> oneshot::Receiver<serde_json::Value> {
        let (tx, rx) = oneshot::channel();
        self.sync_waiters.lock().insert((server_name.to_string(), channel.to_string()), tx);
        rx
    }

    /// Runs the receive loop, fanning parsed datagrams out to a bounded pool
    /// of per-host worker tasks so one stuck host can't starve the others.
    pub async fn run(
        self,
        dispatch_tx: mpsc::Sender<HostMessage>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), HostctlError> {
        let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];
        loop {
            tokio::select! {
                recv = self.socket.recv_from(&mut buf) => {
                    let (len, peer) = match recv {
                        Ok(v) => v,
                        Err(e) => {
                            error!(error = %e, "udp recv error");
                            continue;
                        }
                    };
                    self.handle_datagram(&buf[..len], peer, &dispatch_tx).await;
                }
                _ = shutdown_rx.recv() => {
                    info!("udp ingress shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    async fn handle_datagram(&self, bytes: &[u8], peer: SocketAddr, dispatch_tx: &mpsc::Sender<HostMessage>) {
        if bytes.is_empty() {
            metrics::UDP_DATAGRAMS_TOTAL.with_label_values(&["empty"]).inc();
            return;
        }

        let value: serde_json::Value = match serde_json::from_slice(bytes) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, %peer, "dropping unparseable udp datagram");
                metrics::UDP_DATAGRAMS_TOTAL.with_label_values(&["parse_error"]).inc();
                return;
            }
        };

        let Some(server_name) = value.get("server_name").and_then(|v| v.as_str()).map(str::to_string) else {
            metrics::UDP_DATAGRAMS_TOTAL.with_label_values(&["missing_server_name"]).inc();
            return;
        };
        let Some(command) = value.get("command").and_then(|v| v.as_str()).map(str::to_string) else {
            metrics::UDP_DATAGRAMS_TOTAL.with_label_values(&["missing_command"]).inc();
            return;
        };

        if !self.registry.contains(&server_name) {
            debug!(server_name, "dropping datagram for unknown host");
            metrics::UDP_DATAGRAMS_TOTAL.with_label_values(&["unknown_host"]).inc();
            return;
        }

        if let Some(mut host) = self.registry.get_mut(&server_name) {
            host.touch();
        }

        let is_sync_reply = command.starts_with("sync-");
        if is_sync_reply {
            let base_command = command.trim_start_matches("sync-").to_string();
            if let Some(channel) = value.get("channel").and_then(|v| v.as_str()) {
                let key = (server_name.clone(), channel.to_string());
                if let Some(tx) = self.sync_waiters.lock().remove(&key) {
                    let _ = tx.send(value.clone());
                }
            } else {
                warn!(server_name, command = %base_command, "sync reply carried no channel, could not be correlated");
            }
            if !DISPATCH_EVEN_IF_SYNC.contains(&base_command.as_str()) {
                metrics::UDP_DATAGRAMS_TOTAL.with_label_values(&["sync_reply"]).inc();
                return;
            }
        }

        metrics::UDP_DATAGRAMS_TOTAL.with_label_values(&["dispatched"]).inc();
        let message = HostMessage {
            server_name,
            command,
            payload: value,
        };
        if dispatch_tx.send(message).await.is_err() {
            warn!("dispatch channel closed, dropping datagram");
        }
    }
}
