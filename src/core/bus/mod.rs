// src/core/bus/mod.rs

//! The pub/sub transport (component B). Backed by Postgres `LISTEN`/`NOTIFY`
//! on two channels: `intercom` (point-to-point, addressed to a single node)
//! and `broadcasts` (fan-out to every node in the guild). Delivery is
//! at-most-once: a subscriber that isn't listening when a message is
//! published never sees it, and nothing is replayed to a subscriber that
//! joins late.
//!
//! `NOTIFY` payloads are capped at 8000 bytes by Postgres, so the envelope
//! carried over the wire is a thin pointer (`bus_messages.id`) and the real
//! body is fetched from the `bus_messages` table the instant it arrives.
//! The row is left in place for audit; nothing here deletes it.

mod envelope;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use sqlx::postgres::{PgListener, PgPool};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, warn};

use crate::core::errors::HostctlError;

pub use envelope::{Envelope, RpcException};

pub const CHANNEL_INTERCOM: &str = "intercom";
pub const CHANNEL_BROADCASTS: &str = "broadcasts";
/// Sentinel `target_node` used to address a message at "whichever node is
/// currently master," since that identity moves between nodes over time.
pub const TARGET_MASTER: &str = "Master";

/// A received message, already resolved from the pointer row.
#[derive(Debug, Clone)]
pub struct Message {
    pub channel: String,
    pub guild_id: i64,
    pub target_node: String,
    pub data: serde_json::Value,
}

/// Publishes and subscribes to the two logical channels, backed by a
/// dedicated `PgListener` connection (Postgres requires `LISTEN` to live on
/// a single held connection, separate from the pool used for queries).
pub struct Bus {
    pool: PgPool,
    guild_id: i64,
    local_node: String,
    is_master: Arc<AtomicBool>,
}

impl Bus {
    pub fn new(pool: PgPool, guild_id: i64, local_node: impl Into<String>, is_master: Arc<AtomicBool>) -> Self {
        Self {
            pool,
            guild_id,
            local_node: local_node.into(),
            is_master,
        }
    }

    /// Publishes `data` on `channel`, addressed to `target_node` (ignored by
    /// subscribers on `broadcasts`, which every node is a target of).
    pub async fn publish(
        &self,
        channel: &str,
        guild_id: i64,
        target_node: &str,
        data: &serde_json::Value,
    ) -> Result<(), HostctlError> {
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO bus_messages (channel, guild_id, target_node, data) VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(channel)
        .bind(guild_id)
        .bind(target_node)
        .bind(data)
        .fetch_one(&self.pool)
        .await?;

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(channel)
            .bind(row.0.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Starts listening on both channels, forwarding every message whose
    /// `target_node` is either `self.local_node` or the broadcast wildcard
    /// to `tx`. Runs until `shutdown_rx` fires. Messages published before
    /// this call returns are never replayed -- `LISTEN` only sees notifies
    /// that arrive after the connection subscribes.
    pub async fn run(
        self: Arc<Self>,
        tx: mpsc::Sender<Message>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), HostctlError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener
            .listen_all([CHANNEL_INTERCOM, CHANNEL_BROADCASTS])
            .await?;
        let mut stream = listener.into_stream();

        loop {
            tokio::select! {
                notification = stream.next() => {
                    let Some(notification) = notification else {
                        warn!("bus listener stream ended, postgres connection dropped");
                        return Err(HostctlError::Bus("listener stream closed".into()));
                    };
                    let notification = match notification {
                        Ok(n) => n,
                        Err(e) => {
                            error!(error = %e, "bus listener error");
                            continue;
                        }
                    };
                    if let Err(e) = self.deliver(notification, &tx).await {
                        error!(error = %e, "failed to deliver bus message");
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!("bus listener shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    async fn deliver(
        &self,
        notification: sqlx::postgres::PgNotification,
        tx: &mpsc::Sender<Message>,
    ) -> Result<(), HostctlError> {
        let channel = notification.channel().to_string();
        let id: i64 = notification
            .payload()
            .parse()
            .map_err(|_| HostctlError::Bus("malformed notify payload".into()))?;

        let row: Option<(i64, String, serde_json::Value)> =
            sqlx::query_as("SELECT guild_id, target_node, data FROM bus_messages WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        let Some((guild_id, target_node, data)) = row else {
            // Row was already reaped or never existed; at-most-once, so drop silently.
            return Ok(());
        };

        if guild_id != self.guild_id {
            return Ok(());
        }

        let is_for_us = channel == CHANNEL_BROADCASTS
            || target_node == self.local_node
            || (target_node == TARGET_MASTER && self.is_master.load(Ordering::Acquire));
        if !is_for_us {
            return Ok(());
        }

        let message = Message {
            channel,
            guild_id,
            target_node,
            data,
        };
        if tx.send(message).await.is_err() {
            warn!("bus receiver dropped, message discarded");
        }
        Ok(())
    }
}
