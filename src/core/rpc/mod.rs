// src/core/rpc/mod.rs

//! Cross-node remote procedure calls, carried over the bus (component B's
//! `intercom` channel). Unlike a generic JSON-RPC layer, callers never see
//! untyped JSON past the deserialization boundary: every method is a
//! variant of `RpcMethod`, and the matching reply is a variant of
//! `RpcMethodResult`.

pub mod executor;
pub mod mentions;
pub mod methods;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::warn;
use uuid::Uuid;

use crate::core::bus::{Bus, CHANNEL_INTERCOM, Envelope};
use crate::core::errors::HostctlError;
use crate::core::metrics;

pub use methods::{RpcMethod, RpcMethodResult};

/// Default timeout for control-plane calls (registration, queries, small mutations).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for operations that touch the DCS process itself (restart, mission load).
pub const LONG_OP_TIMEOUT: Duration = Duration::from_secs(60);
/// Timeout for the slowest operations (full server rotation, minidump collection).
pub const VERY_LONG_OP_TIMEOUT: Duration = Duration::from_secs(300);

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Envelope>>>>;

/// Issues calls and resolves replies by correlation token. One instance is
/// shared across the node; `route_reply` is fed by the bus-receive loop.
#[derive(Clone)]
pub struct RpcClient {
    bus: Arc<Bus>,
    guild_id: i64,
    local_node: String,
    pending: PendingMap,
}

impl RpcClient {
    pub fn new(bus: Arc<Bus>, guild_id: i64, local_node: impl Into<String>) -> Self {
        Self {
            bus,
            guild_id,
            local_node: local_node.into(),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Calls `method` on `target_node` and awaits a typed reply, doubling
    /// the timeout if `slow_system` is set for the target node.
    pub async fn call(
        &self,
        target_node: &str,
        method: RpcMethod,
        deadline: Duration,
        slow_system: bool,
    ) -> Result<RpcMethodResult, HostctlError> {
        let token = Uuid::new_v4().to_string();
        let method_name = method.name().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(token.clone(), tx);

        let params = method.to_params();
        let envelope = Envelope::RpcRequest {
            token: token.clone(),
            method: method_name.clone(),
            params,
            from_node: self.local_node.clone(),
        };
        let data = serde_json::to_value(&envelope).map_err(|e| HostctlError::Serde(e.to_string()))?;

        if let Err(e) = self.bus.publish(CHANNEL_INTERCOM, self.guild_id, target_node, &data).await {
            self.pending.lock().remove(&token);
            metrics::RPC_CALLS_TOTAL.with_label_values(&[&method_name, "publish_error"]).inc();
            return Err(e);
        }

        let effective_deadline = if slow_system { deadline * 2 } else { deadline };
        let timer = metrics::RPC_LATENCY_SECONDS.start_timer();
        let outcome = timeout(effective_deadline, rx).await;
        timer.observe_duration();

        self.pending.lock().remove(&token);

        match outcome {
            Err(_) => {
                metrics::RPC_CALLS_TOTAL.with_label_values(&[&method_name, "timeout"]).inc();
                Err(HostctlError::RpcTimeout {
                    method: method_name,
                    channel: target_node.to_string(),
                })
            }
            Ok(Err(_)) => {
                metrics::RPC_CALLS_TOTAL.with_label_values(&[&method_name, "dropped"]).inc();
                Err(HostctlError::Internal("rpc reply sender dropped".into()))
            }
            Ok(Ok(Envelope::RpcReply { exception: Some(exc), .. })) => {
                metrics::RPC_CALLS_TOTAL.with_label_values(&[&method_name, "exception"]).inc();
                Err(HostctlError::RpcException {
                    class: exc.class,
                    message: exc.message,
                })
            }
            Ok(Ok(Envelope::RpcReply { result, .. })) => {
                metrics::RPC_CALLS_TOTAL.with_label_values(&[&method_name, "ok"]).inc();
                RpcMethodResult::from_reply(&method_name, result)
            }
            Ok(Ok(_)) => {
                metrics::RPC_CALLS_TOTAL.with_label_values(&[&method_name, "malformed"]).inc();
                Err(HostctlError::ProtocolMismatch {
                    got: "non-reply envelope".into(),
                    want: "rpc_reply".into(),
                })
            }
        }
    }

    /// Hands a reply envelope to the waiter identified by its token, if any
    /// is still outstanding. Called from the bus-receive loop.
    pub fn route_reply(&self, envelope: Envelope) {
        if let Envelope::RpcReply { ref token, .. } = envelope {
            if let Some(tx) = self.pending.lock().remove(token) {
                let _ = tx.send(envelope);
            } else {
                warn!(token, "received rpc reply with no outstanding waiter");
            }
        }
    }
}
