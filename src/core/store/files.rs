// src/core/store/files.rs

//! Transient file blobs, used to ferry a file (e.g. a mission or config)
//! from a non-master node to the master when no direct filesystem access
//! exists between them. Rows are reaped after 300 seconds; see `reaper`.

use chrono::Utc;
use uuid::Uuid;

use crate::core::errors::HostctlError;

use super::Store;

impl Store {
    pub async fn put_file(&self, guild_id: i64, name: &str, data: &[u8]) -> Result<Uuid, HostctlError> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO files (id, name, data, guild_id, created) VALUES ($1, $2, $3, $4, $5)")
            .bind(id)
            .bind(name)
            .bind(data)
            .bind(guild_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn take_file(&self, id: Uuid) -> Result<Option<(String, Vec<u8>)>, HostctlError> {
        let mut tx = self.pool.begin().await?;
        let row: Option<(String, Vec<u8>)> =
            sqlx::query_as("SELECT name, data FROM files WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        if row.is_some() {
            sqlx::query("DELETE FROM files WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(row)
    }
}
