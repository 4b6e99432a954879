// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::num::{ParseFloatError, ParseIntError};
use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within hostctl.
/// Variants map to the error taxonomy in the specification: fatal config
/// errors abort the process, transient ones are retried by their component,
/// the rest are surfaced to the caller (an RPC caller, the scheduler, or the
/// admin audit log).
#[derive(Error, Debug, Clone)]
pub enum HostctlError {
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("config error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("bus error: {0}")]
    Bus(String),

    #[error("RPC timeout waiting for '{method}' (channel {channel})")]
    RpcTimeout { method: String, channel: String },

    #[error("RPC exception: {class}: {message}")]
    RpcException { class: String, message: String },

    #[error("node '{0}' is unreachable")]
    NodeUnreachable(String),

    #[error("host '{0}' not found")]
    HostNotFound(String),

    #[error("node '{0}' not found")]
    NodeNotFound(String),

    #[error("port conflict on node '{node}': port {port} already in use by host '{existing}'")]
    PortConflict {
        node: String,
        port: u16,
        existing: String,
    },

    #[error("invalid state transition for host '{host}': {from:?} -> {event}")]
    InvalidTransition {
        host: String,
        from: String,
        event: String,
    },

    #[error("protocol mismatch: host hook version '{got}' does not match node version '{want}'")]
    ProtocolMismatch { got: String, want: String },

    #[error("duplicate node registration for '{0}'")]
    DuplicateNode(String),

    #[error("host '{0}' is unhealthy (heartbeat timeout)")]
    HostHung(String),

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("serialization error: {0}")]
    Serde(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for HostctlError {
    fn from(e: std::io::Error) -> Self {
        HostctlError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for HostctlError {
    fn from(e: serde_json::Error) -> Self {
        HostctlError::Serde(e.to_string())
    }
}

impl From<serde_yaml::Error> for HostctlError {
    fn from(e: serde_yaml::Error) -> Self {
        HostctlError::Config(e.to_string())
    }
}

impl From<sqlx::Error> for HostctlError {
    fn from(e: sqlx::Error) -> Self {
        HostctlError::Database(e.to_string())
    }
}

impl From<ParseIntError> for HostctlError {
    fn from(e: ParseIntError) -> Self {
        HostctlError::Internal(format!("not an integer: {e}"))
    }
}

impl From<ParseFloatError> for HostctlError {
    fn from(e: ParseFloatError) -> Self {
        HostctlError::Internal(format!("not a float: {e}"))
    }
}

impl HostctlError {
    /// Process exit code per the specification's exit-code contract: `-2` for
    /// errors a restart can never fix (bad config, a node fighting over an
    /// identity already claimed by a live peer), `-1` for everything else
    /// (the supervisor should restart the node and try again).
    pub fn exit_code(&self) -> i32 {
        match self {
            HostctlError::Config(_) | HostctlError::DuplicateNode(_) => -2,
            _ => -1,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, HostctlError>;
