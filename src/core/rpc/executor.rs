// src/core/rpc/executor.rs

//! Services incoming `Envelope::RpcRequest`s against the local
//! `HostRegistry`/`LifecycleManager`, then publishes the typed reply back to
//! the caller via the bus. One instance runs per node; the bus-receive loop
//! in `server::spawner` hands every request envelope to `handle`.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::core::bus::{Bus, Envelope, RpcException, CHANNEL_INTERCOM};
use crate::core::errors::HostctlError;
use crate::core::lifecycle::{LifecycleManager, Platform, IMMEDIATE_WARN_TIMES};
use crate::core::model::HostEvent;
use crate::core::registry::HostRegistry;

pub struct RpcExecutor<P: Platform> {
    bus: Arc<Bus>,
    guild_id: i64,
    local_node: String,
    registry: Arc<HostRegistry>,
    lifecycle: Arc<LifecycleManager<P>>,
}

impl<P: Platform> RpcExecutor<P> {
    pub fn new(
        bus: Arc<Bus>,
        guild_id: i64,
        local_node: impl Into<String>,
        registry: Arc<HostRegistry>,
        lifecycle: Arc<LifecycleManager<P>>,
    ) -> Self {
        Self {
            bus,
            guild_id,
            local_node: local_node.into(),
            registry,
            lifecycle,
        }
    }

    /// Handles one request: dispatches by method name, then publishes the
    /// reply envelope back to `from_node`. Dispatch errors become a typed
    /// `RpcException` rather than being dropped -- the caller is blocked on
    /// this token and needs to hear back either way.
    pub async fn handle(&self, token: String, method: String, params: Value, from_node: String) {
        let (result, exception) = match self.dispatch(&method, &params).await {
            Ok(value) => (Some(value), None),
            Err(e) => (None, Some(RpcException { class: error_class(&e), message: e.to_string() })),
        };
        let reply = Envelope::RpcReply { token, result, exception };
        let data = match serde_json::to_value(&reply) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "failed to serialize rpc reply");
                return;
            }
        };
        if let Err(e) = self.bus.publish(CHANNEL_INTERCOM, self.guild_id, &from_node, &data).await {
            warn!(error = %e, from_node, "failed to publish rpc reply");
        }
    }

    async fn dispatch(&self, method: &str, params: &Value) -> Result<Value, HostctlError> {
        match method {
            "registerDCSServer" => {
                let host = host_param(params)?;
                self.lifecycle.apply_event(host, HostEvent::RegisterDcsServer)?;
                Ok(serde_json::json!({}))
            }
            "getMissionUpdate" => {
                let host = self.get_host(host_param(params)?)?;
                Ok(serde_json::json!({
                    "status": host.status,
                    "mission_time": host.current_mission.as_ref().map(|m| m.mission_time),
                }))
            }
            "restart" => {
                let host_name = host_param(params)?;
                let shutdown_first = params.get("shutdown").and_then(|v| v.as_bool()).unwrap_or(false);
                self.lifecycle
                    .graceful_shutdown(host_name, "restart", IMMEDIATE_WARN_TIMES)
                    .await?;
                if !shutdown_first {
                    self.lifecycle.startup(host_name, false).await?;
                }
                Ok(serde_json::json!({}))
            }
            "rotate" => {
                let host_name = host_param(params)?;
                self.lifecycle
                    .graceful_shutdown(host_name, "rotate to the next mission", IMMEDIATE_WARN_TIMES)
                    .await?;
                self.lifecycle.startup(host_name, true).await?;
                Ok(serde_json::json!({}))
            }
            "shutdown" => {
                let host_name = host_param(params)?;
                self.lifecycle.apply_event(host_name, HostEvent::OperatorShutdown)?;
                self.lifecycle
                    .graceful_shutdown(host_name, "shut down", IMMEDIATE_WARN_TIMES)
                    .await?;
                Ok(serde_json::json!({}))
            }
            "pause" => {
                let host_name = host_param(params)?;
                self.lifecycle.apply_event(host_name, HostEvent::SimulationPause)?;
                Ok(serde_json::json!({}))
            }
            "resume" => {
                let host_name = host_param(params)?;
                self.lifecycle.apply_event(host_name, HostEvent::SimulationResume)?;
                Ok(serde_json::json!({}))
            }
            "setMaintenance" => {
                let host_name = host_param(params)?;
                let enabled = params.get("enabled").and_then(|v| v.as_bool()).unwrap_or(false);
                let mut host = self
                    .registry
                    .get_mut(host_name)
                    .ok_or_else(|| HostctlError::HostNotFound(host_name.to_string()))?;
                host.maintenance = enabled;
                if !enabled {
                    host.clear_deferred_actions();
                }
                Ok(serde_json::json!({}))
            }
            "registerLocalServers" => {
                let hosts: Vec<String> = self
                    .registry
                    .list_for_node(&self.local_node)
                    .into_iter()
                    .map(|h| h.name)
                    .collect();
                Ok(serde_json::json!({ "hosts": hosts }))
            }
            "getMissionList" => {
                let host = self.get_host(host_param(params)?)?;
                let missions = host.current_mission.as_ref().map(|m| m.mission_list.clone()).unwrap_or_default();
                Ok(serde_json::json!({ "missions": missions }))
            }
            other => Err(HostctlError::ProtocolMismatch {
                got: other.to_string(),
                want: "a known rpc method".into(),
            }),
        }
    }

    fn get_host(&self, host_name: &str) -> Result<crate::core::model::Host, HostctlError> {
        self.registry
            .get(host_name)
            .map(|h| h.clone())
            .ok_or_else(|| HostctlError::HostNotFound(host_name.to_string()))
    }
}

fn host_param(params: &Value) -> Result<&str, HostctlError> {
    params
        .get("host")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HostctlError::ProtocolMismatch {
            got: "missing host parameter".into(),
            want: "host: string".into(),
        })
}

fn error_class(e: &HostctlError) -> String {
    match e {
        HostctlError::HostNotFound(_) => "HostNotFound",
        HostctlError::NodeNotFound(_) => "NodeNotFound",
        HostctlError::PortConflict { .. } => "PortConflict",
        HostctlError::InvalidTransition { .. } => "InvalidTransition",
        HostctlError::ProtocolMismatch { .. } => "ProtocolMismatch",
        _ => "InternalError",
    }
    .to_string()
}
