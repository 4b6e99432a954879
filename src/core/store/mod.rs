// src/core/store/mod.rs

//! The durable relational state store (component A). Backed by Postgres via
//! `sqlx`, accessed through a small connection pool (min 5, max 10). Holds
//! node liveness, host-to-node bindings, bans, persisted embed IDs, and
//! transient file blobs used to ferry a file from an agent to the master
//! when direct IPC isn't available.

pub mod files;
pub mod models;
pub mod reaper;

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::core::errors::HostctlError;

pub use models::{BanRow, InstanceRow, MessagePersistenceRow, NodeRow, ServerRow};

const MIN_POOL_CONNECTIONS: u32 = 5;
const MAX_POOL_CONNECTIONS: u32 = 10;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the connection pool and exposes typed CRUD operations for every
/// table in the persisted state layout.
#[derive(Debug, Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connects to Postgres with the pool sizing mandated by the spec.
    pub async fn connect(database_url: &str) -> Result<Self, HostctlError> {
        let pool = PgPoolOptions::new()
            .min_connections(MIN_POOL_CONNECTIONS)
            .max_connections(MAX_POOL_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub(crate) fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies schema upgrades. Idempotent: safe to call on every master boot.
    pub async fn migrate(&self) -> Result<(), HostctlError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| HostctlError::Database(format!("migration failed: {e}")))?;
        info!("schema migrations applied");
        Ok(())
    }

    // --- nodes ---

    pub async fn upsert_node(&self, node: &NodeRow) -> Result<(), HostctlError> {
        sqlx::query(
            r#"
            INSERT INTO nodes (guild_id, name, public_ip, listen_address, listen_port,
                                master, last_seen, preferred_master, heartbeat_seconds, slow_system)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (guild_id, name) DO UPDATE SET
                public_ip = EXCLUDED.public_ip,
                listen_address = EXCLUDED.listen_address,
                listen_port = EXCLUDED.listen_port,
                last_seen = EXCLUDED.last_seen,
                preferred_master = EXCLUDED.preferred_master,
                heartbeat_seconds = EXCLUDED.heartbeat_seconds,
                slow_system = EXCLUDED.slow_system
            "#,
        )
        .bind(node.guild_id)
        .bind(&node.name)
        .bind(&node.public_ip)
        .bind(&node.listen_address)
        .bind(node.listen_port as i32)
        .bind(node.master)
        .bind(node.last_seen)
        .bind(node.preferred_master)
        .bind(node.heartbeat_seconds)
        .bind(node.slow_system)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn touch_node_heartbeat(&self, guild_id: i64, name: &str) -> Result<(), HostctlError> {
        sqlx::query("UPDATE nodes SET last_seen = now() WHERE guild_id = $1 AND name = $2")
            .bind(guild_id)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn nodes_for_guild(&self, guild_id: i64) -> Result<Vec<NodeRow>, HostctlError> {
        let rows = sqlx::query_as::<_, NodeRow>("SELECT * FROM nodes WHERE guild_id = $1 ORDER BY name")
            .bind(guild_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn get_node(&self, guild_id: i64, name: &str) -> Result<Option<NodeRow>, HostctlError> {
        let row = sqlx::query_as::<_, NodeRow>("SELECT * FROM nodes WHERE guild_id = $1 AND name = $2")
            .bind(guild_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Sets `master` on a single row within an already-open transaction, for
    /// callers (the election algorithm) that must not let this update race
    /// outside the row lock that produced the decision.
    pub async fn set_master_in_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        guild_id: i64,
        name: &str,
        master: bool,
    ) -> Result<(), HostctlError> {
        sqlx::query("UPDATE nodes SET master = $3, last_seen = now() WHERE guild_id = $1 AND name = $2")
            .bind(guild_id)
            .bind(name)
            .bind(master)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Runs `f` inside a transaction that holds `SELECT ... FOR UPDATE` locks
    /// on every node row for the guild -- the single distributed lock used by
    /// the node coordinator's election algorithm (component H).
    pub async fn with_nodes_locked<F, T>(&self, guild_id: i64, f: F) -> Result<T, HostctlError>
    where
        F: for<'a, 'c> FnOnce(
            &'a mut sqlx::Transaction<'c, sqlx::Postgres>,
            Vec<NodeRow>,
        ) -> futures::future::BoxFuture<'a, Result<T, HostctlError>>,
    {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query_as::<_, NodeRow>(
            "SELECT * FROM nodes WHERE guild_id = $1 ORDER BY name FOR UPDATE",
        )
        .bind(guild_id)
        .fetch_all(&mut *tx)
        .await?;
        let result = f(&mut tx, rows).await?;
        tx.commit().await?;
        Ok(result)
    }

    pub async fn set_master(&self, guild_id: i64, name: &str, master: bool) -> Result<(), HostctlError> {
        sqlx::query("UPDATE nodes SET master = $3, last_seen = now() WHERE guild_id = $1 AND name = $2")
            .bind(guild_id)
            .bind(name)
            .bind(master)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- instances ---

    pub async fn upsert_instance(&self, row: &InstanceRow) -> Result<(), HostctlError> {
        sqlx::query(
            r#"
            INSERT INTO instances (node, instance, port, server_name, last_seen)
            VALUES ($1, $2, $3, $4, now())
            ON CONFLICT (node, instance) DO UPDATE SET
                port = EXCLUDED.port,
                server_name = EXCLUDED.server_name,
                last_seen = now()
            "#,
        )
        .bind(&row.node)
        .bind(&row.instance)
        .bind(row.port as i32)
        .bind(&row.server_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // --- servers (hosts) ---

    pub async fn upsert_server(&self, row: &ServerRow) -> Result<(), HostctlError> {
        sqlx::query(
            r#"
            INSERT INTO servers (server_name, node_name, instance_name, maintenance,
                                  blue_password, red_password, settings)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (server_name) DO UPDATE SET
                node_name = EXCLUDED.node_name,
                instance_name = EXCLUDED.instance_name,
                maintenance = EXCLUDED.maintenance,
                blue_password = EXCLUDED.blue_password,
                red_password = EXCLUDED.red_password,
                settings = EXCLUDED.settings
            "#,
        )
        .bind(&row.server_name)
        .bind(&row.node_name)
        .bind(&row.instance_name)
        .bind(row.maintenance)
        .bind(&row.blue_password)
        .bind(&row.red_password)
        .bind(&row.settings)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn rename_server(&self, old_name: &str, new_name: &str) -> Result<(), HostctlError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE servers SET server_name = $2 WHERE server_name = $1")
            .bind(old_name)
            .bind(new_name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE instances SET server_name = $2 WHERE server_name = $1")
            .bind(old_name)
            .bind(new_name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE message_persistence SET server_name = $2 WHERE server_name = $1")
            .bind(old_name)
            .bind(new_name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_server(&self, name: &str) -> Result<(), HostctlError> {
        sqlx::query("DELETE FROM servers WHERE server_name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- bans ---

    pub async fn upsert_ban(&self, ban: &BanRow) -> Result<(), HostctlError> {
        sqlx::query(
            r#"
            INSERT INTO bans (ucid, banned_by, reason, banned_at, banned_until)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (ucid) DO UPDATE SET
                banned_by = EXCLUDED.banned_by,
                reason = EXCLUDED.reason,
                banned_at = EXCLUDED.banned_at,
                banned_until = EXCLUDED.banned_until
            "#,
        )
        .bind(&ban.ucid)
        .bind(&ban.banned_by)
        .bind(&ban.reason)
        .bind(ban.banned_at)
        .bind(ban.banned_until)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn unban(&self, ucid: &str) -> Result<(), HostctlError> {
        sqlx::query("DELETE FROM bans WHERE ucid = $1")
            .bind(ucid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn active_bans(&self) -> Result<Vec<BanRow>, HostctlError> {
        let rows = sqlx::query_as::<_, BanRow>("SELECT * FROM bans WHERE banned_until > now()")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn is_banned(&self, ucid: &str) -> Result<bool, HostctlError> {
        let row: Option<(bool,)> =
            sqlx::query_as("SELECT true FROM bans WHERE ucid = $1 AND banned_until > now()")
                .bind(ucid)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    // --- message persistence ---

    pub async fn upsert_message_persistence(&self, row: &MessagePersistenceRow) -> Result<(), HostctlError> {
        sqlx::query(
            r#"
            INSERT INTO message_persistence (server_name, embed_name, embed)
            VALUES ($1, $2, $3)
            ON CONFLICT (server_name, embed_name) DO UPDATE SET embed = EXCLUDED.embed
            "#,
        )
        .bind(&row.server_name)
        .bind(&row.embed_name)
        .bind(&row.embed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_message_persistence(
        &self,
        server_name: &str,
        embed_name: &str,
    ) -> Result<Option<MessagePersistenceRow>, HostctlError> {
        let row = sqlx::query_as::<_, MessagePersistenceRow>(
            "SELECT * FROM message_persistence WHERE server_name = $1 AND embed_name = $2",
        )
        .bind(server_name)
        .bind(embed_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}
