// src/core/dispatch/mod.rs

//! Event dispatch (component J). Incoming host messages are delivered to
//! registered listeners in two respects at once: FIFO order per host (a
//! `missionLoadEnd` must never be observed before the `registerDCSServer`
//! that preceded it), and bounded-parallel fan-out across listeners for a
//! single message, so one slow listener doesn't delay the others past its
//! own budget.

mod queue;
pub mod state_listener;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::warn;

use crate::core::bus::{Bus, Envelope, CHANNEL_BROADCASTS, TARGET_MASTER};
use crate::core::ingress::{HostMessage, WORKER_POOL_SIZE};

pub use queue::PerHostQueue;
pub use state_listener::HostStateListener;

/// Default per-listener call budget. Doubled for hosts on a `slow_system` node.
pub const DEFAULT_BUDGET: Duration = Duration::from_secs(60);
pub const EXTENDED_BUDGET: Duration = Duration::from_secs(120);
/// `registerDCSServer` carries no budget: a fresh host may be slow to report
/// its full state and must not be cut off mid-registration.
const UNBOUNDED_COMMANDS: &[&str] = &["registerDCSServer"];

/// Something that reacts to a host event. Implementors must tolerate being
/// cancelled mid-call if they overrun their budget.
#[async_trait]
pub trait Listener: Send + Sync {
    fn name(&self) -> &str;
    /// The UDP command names this listener cares about. An empty slice means
    /// "every command" -- most listeners narrow this down so `fan_out`
    /// doesn't wake them for traffic they'd ignore anyway.
    fn events(&self) -> &[&str] {
        &[]
    }
    async fn on_message(&self, message: &HostMessage);
}

/// Owns the per-host ordered queues and the registered listener set, and
/// drives the worker pool that drains them.
pub struct Dispatcher {
    listeners: Vec<Arc<dyn Listener>>,
    queues: Arc<parking_lot::Mutex<HashMap<String, Arc<PerHostQueue>>>>,
    slow_system: bool,
    is_master: Arc<AtomicBool>,
    bus: Arc<Bus>,
    guild_id: i64,
    local_node: String,
}

impl Dispatcher {
    pub fn new(
        listeners: Vec<Arc<dyn Listener>>,
        slow_system: bool,
        is_master: Arc<AtomicBool>,
        bus: Arc<Bus>,
        guild_id: i64,
        local_node: impl Into<String>,
    ) -> Self {
        Self {
            listeners,
            queues: Arc::new(parking_lot::Mutex::new(HashMap::new())),
            slow_system,
            is_master,
            bus,
            guild_id,
            local_node: local_node.into(),
        }
    }

    fn queue_for(&self, host: &str) -> Arc<PerHostQueue> {
        self.queues
            .lock()
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(PerHostQueue::new()))
            .clone()
    }

    /// Consumes messages from the ingress channel, appending each to its
    /// host's FIFO queue and spawning a drain if one isn't already running.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<HostMessage>, mut shutdown_rx: broadcast::Receiver<()>) {
        let pool_limit = Arc::new(Semaphore::new(WORKER_POOL_SIZE));
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else { break; };
                    let queue = self.queue_for(&msg.server_name);
                    queue.push(msg);
                    self.clone().ensure_draining(queue, pool_limit.clone());
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }
    }

    fn ensure_draining(self: Arc<Self>, queue: Arc<PerHostQueue>, pool_limit: Arc<Semaphore>) {
        if !queue.begin_draining() {
            return; // already being drained by another task
        }
        tokio::spawn(async move {
            let _permit = match pool_limit.acquire_owned().await {
                Ok(p) => p,
                Err(_) => return,
            };
            loop {
                while let Some(message) = queue.pop() {
                    self.fan_out(&message).await;
                }
                queue.end_draining();
                // A push racing with the pop-loop's exit may have landed after
                // the last `pop` but before `end_draining`; reclaim the drain
                // rather than leave that message stranded until the next push.
                if queue.is_empty() || !queue.begin_draining() {
                    break;
                }
            }
        });
    }

    async fn fan_out(&self, message: &HostMessage) {
        // Only the master node runs listeners against a message -- a
        // non-master node that merely hosts the DCS process forwards the
        // event onward so the cluster's single source of truth sees it, and
        // does not apply any local side effects of its own.
        if !self.is_master.load(Ordering::Acquire) {
            self.forward_to_master(message).await;
            return;
        }

        let matching: Vec<Arc<dyn Listener>> = self
            .listeners
            .iter()
            .filter(|l| {
                let events = l.events();
                events.is_empty() || events.contains(&message.command.as_str())
            })
            .cloned()
            .collect();
        if matching.is_empty() {
            return;
        }

        let budget = if UNBOUNDED_COMMANDS.contains(&message.command.as_str()) {
            None
        } else if self.slow_system {
            Some(EXTENDED_BUDGET)
        } else {
            Some(DEFAULT_BUDGET)
        };

        let mut joinset = JoinSet::new();
        for listener in &matching {
            let listener = listener.clone();
            let message = message.clone();
            joinset.spawn(async move {
                let name = listener.name().to_string();
                listener.on_message(&message).await;
                name
            });
        }

        match budget {
            None => {
                while joinset.join_next().await.is_some() {}
            }
            Some(budget) => {
                let deadline = tokio::time::sleep(budget);
                tokio::pin!(deadline);
                loop {
                    tokio::select! {
                        next = joinset.join_next() => {
                            if next.is_none() {
                                break;
                            }
                        }
                        _ = &mut deadline => {
                            warn!(
                                host = %message.server_name,
                                command = %message.command,
                                remaining = joinset.len(),
                                "listener fan-out exceeded budget, cancelling stragglers"
                            );
                            joinset.abort_all();
                            while joinset.join_next().await.is_some() {}
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn forward_to_master(&self, message: &HostMessage) {
        let envelope = Envelope::Event {
            name: "hostMessage".into(),
            payload: serde_json::json!({
                "node": self.local_node,
                "server_name": message.server_name,
                "command": message.command,
                "payload": message.payload,
            }),
        };
        let Ok(data) = serde_json::to_value(&envelope) else {
            warn!(host = %message.server_name, "failed to serialize forwarded host message");
            return;
        };
        if let Err(e) = self.bus.publish(CHANNEL_BROADCASTS, self.guild_id, TARGET_MASTER, &data).await {
            warn!(error = %e, host = %message.server_name, "failed to forward host message to master");
        }
    }
}
