// src/core/store/models.rs

//! Row types for the persisted tables, mapped with `sqlx::FromRow`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct NodeRow {
    pub guild_id: i64,
    pub name: String,
    pub public_ip: String,
    pub listen_address: String,
    pub listen_port: i32,
    pub master: bool,
    pub last_seen: DateTime<Utc>,
    pub preferred_master: bool,
    pub heartbeat_seconds: i64,
    pub slow_system: bool,
}

impl NodeRow {
    pub fn listen_port(&self) -> Result<u16, std::num::TryFromIntError> {
        u16::try_from(self.listen_port)
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct InstanceRow {
    pub node: String,
    pub instance: String,
    pub port: i32,
    pub server_name: Option<String>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ServerRow {
    pub server_name: String,
    pub node_name: String,
    pub instance_name: String,
    pub maintenance: bool,
    pub blue_password: Option<String>,
    pub red_password: Option<String>,
    pub settings: serde_json::Value,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct BanRow {
    pub ucid: String,
    pub banned_by: String,
    pub reason: String,
    pub banned_at: DateTime<Utc>,
    pub banned_until: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct MessagePersistenceRow {
    pub server_name: String,
    pub embed_name: String,
    pub embed: serde_json::Value,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct FileRow {
    pub id: Uuid,
    pub name: String,
    #[serde(skip)]
    pub data: Vec<u8>,
    pub guild_id: i64,
    pub created: DateTime<Utc>,
}
