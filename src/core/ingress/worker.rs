// src/core/ingress/worker.rs

//! The message type handed from the UDP receive loop to the dispatcher, and
//! the worker-pool sizing used to spread per-host queues across tasks so a
//! single busy host's backlog can't block ingestion of datagrams for every
//! other host on the node.

use serde::{Deserialize, Serialize};

/// One parsed, host-scoped UDP datagram, ready for ordered delivery to that
/// host's listeners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostMessage {
    pub server_name: String,
    pub command: String,
    pub payload: serde_json::Value,
}

/// Number of concurrent per-host queue drainers. Hosts are sharded across
/// this many workers by name hash in `crate::core::dispatch`; the count is
/// fixed rather than scaled to host count because a node rarely runs more
/// than a handful of DCS instances at once.
pub const WORKER_POOL_SIZE: usize = 20;
