// src/core/rpc/methods.rs

//! The typed RPC method registry. Every cross-node call site names one of
//! these variants instead of hand-building a JSON params object, and every
//! reply is parsed back into the matching result variant.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::core::errors::HostctlError;
use crate::core::model::{HostStatus, PendingAction};

/// A single remote call, already carrying its parameters.
#[derive(Debug, Clone)]
pub enum RpcMethod {
    RegisterDcsServer { host: String, dcs_port: u16 },
    GetMissionUpdate { host: String },
    /// Sent to a node the moment it's first observed in the `nodes` table,
    /// so the caller can merge the node's locally-owned hosts into its view
    /// of the fleet without waiting for each host to re-register itself.
    RegisterLocalServers,
    GetMissionList { host: String },
    Restart { host: String, shutdown: bool },
    Rotate { host: String },
    Shutdown { host: String },
    Pause { host: String },
    Resume { host: String },
    SetMaintenance { host: String, enabled: bool },
    Ban { ucid: String, reason: String, until: chrono::DateTime<chrono::Utc> },
    Unban { ucid: String },
    SetDeferredAction { host: String, on_empty: Option<PendingAction>, on_mission_end: Option<PendingAction> },
    SendChat { host: String, message: String, to_ucid: Option<String> },
}

impl RpcMethod {
    pub fn name(&self) -> &'static str {
        match self {
            RpcMethod::RegisterDcsServer { .. } => "registerDCSServer",
            RpcMethod::GetMissionUpdate { .. } => "getMissionUpdate",
            RpcMethod::RegisterLocalServers => "registerLocalServers",
            RpcMethod::GetMissionList { .. } => "getMissionList",
            RpcMethod::Restart { .. } => "restart",
            RpcMethod::Rotate { .. } => "rotate",
            RpcMethod::Shutdown { .. } => "shutdown",
            RpcMethod::Pause { .. } => "pause",
            RpcMethod::Resume { .. } => "resume",
            RpcMethod::SetMaintenance { .. } => "setMaintenance",
            RpcMethod::Ban { .. } => "ban",
            RpcMethod::Unban { .. } => "unban",
            RpcMethod::SetDeferredAction { .. } => "setDeferredAction",
            RpcMethod::SendChat { .. } => "sendChat",
        }
    }

    pub fn to_params(&self) -> serde_json::Value {
        match self {
            RpcMethod::RegisterDcsServer { host, dcs_port } => json!({ "host": host, "dcs_port": dcs_port }),
            RpcMethod::GetMissionUpdate { host } => json!({ "host": host }),
            RpcMethod::RegisterLocalServers => json!({}),
            RpcMethod::GetMissionList { host } => json!({ "host": host }),
            RpcMethod::Restart { host, shutdown } => json!({ "host": host, "shutdown": shutdown }),
            RpcMethod::Rotate { host } => json!({ "host": host }),
            RpcMethod::Shutdown { host } => json!({ "host": host }),
            RpcMethod::Pause { host } => json!({ "host": host }),
            RpcMethod::Resume { host } => json!({ "host": host }),
            RpcMethod::SetMaintenance { host, enabled } => json!({ "host": host, "enabled": enabled }),
            RpcMethod::Ban { ucid, reason, until } => json!({ "ucid": ucid, "reason": reason, "until": until }),
            RpcMethod::Unban { ucid } => json!({ "ucid": ucid }),
            RpcMethod::SetDeferredAction { host, on_empty, on_mission_end } => {
                json!({ "host": host, "on_empty": on_empty, "on_mission_end": on_mission_end })
            }
            RpcMethod::SendChat { host, message, to_ucid } => {
                json!({ "host": host, "message": message, "to_ucid": to_ucid })
            }
        }
    }
}

/// The typed shape of a successful reply, one variant per `RpcMethod`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum RpcMethodResult {
    Ack,
    MissionUpdate { status: HostStatus, mission_time: Option<u64> },
    LocalServers { hosts: Vec<String> },
    MissionList { missions: Vec<String> },
}

impl RpcMethodResult {
    /// Parses a reply's raw JSON result back into the typed shape expected
    /// for `method_name`. Methods that only acknowledge map to `Ack`.
    pub fn from_reply(method_name: &str, result: Option<serde_json::Value>) -> Result<Self, HostctlError> {
        match method_name {
            "getMissionUpdate" => {
                let value = result.ok_or_else(|| HostctlError::ProtocolMismatch {
                    got: "empty result".into(),
                    want: "mission update payload".into(),
                })?;
                serde_json::from_value::<MissionUpdateWire>(value)
                    .map(|w| RpcMethodResult::MissionUpdate { status: w.status, mission_time: w.mission_time })
                    .map_err(|e| HostctlError::Serde(e.to_string()))
            }
            "registerLocalServers" => {
                let value = result.unwrap_or(serde_json::Value::Null);
                let hosts = serde_json::from_value::<Vec<String>>(value.get("hosts").cloned().unwrap_or(serde_json::Value::Array(vec![])))
                    .map_err(|e| HostctlError::Serde(e.to_string()))?;
                Ok(RpcMethodResult::LocalServers { hosts })
            }
            "getMissionList" => {
                let value = result.unwrap_or(serde_json::Value::Null);
                let missions = serde_json::from_value::<Vec<String>>(value.get("missions").cloned().unwrap_or(serde_json::Value::Array(vec![])))
                    .map_err(|e| HostctlError::Serde(e.to_string()))?;
                Ok(RpcMethodResult::MissionList { missions })
            }
            _ => Ok(RpcMethodResult::Ack),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct MissionUpdateWire {
    status: HostStatus,
    mission_time: Option<u64>,
}
