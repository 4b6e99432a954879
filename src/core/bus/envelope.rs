// src/core/bus/envelope.rs

//! The JSON shape carried inside a bus message's `data` column: either an
//! RPC request, an RPC reply, or a fire-and-forget event notification.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Envelope {
    RpcRequest {
        token: String,
        method: String,
        params: serde_json::Value,
        /// Node the reply must be addressed back to -- the requester isn't
        /// necessarily reachable on the channel the request arrived on once
        /// mastership has moved.
        from_node: String,
    },
    RpcReply {
        token: String,
        result: Option<serde_json::Value>,
        exception: Option<RpcException>,
    },
    Event {
        name: String,
        payload: serde_json::Value,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcException {
    pub class: String,
    pub message: String,
}
