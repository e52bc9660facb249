//! Postgres board store.
//!
//! SYSTEM CONTEXT
//! ==============
//! Startup uses [`PgBoardStore::connect`] to create the shared SQLx pool and
//! enforce schema migrations before accepting websocket/API traffic. Each
//! board is one row; the snapshot travels as JSONB so the schema never
//! chases the in-memory model.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::board::BoardSnapshot;

use super::{BoardStore, StoreError};

pub struct PgBoardStore {
    pool: PgPool,
}

impl PgBoardStore {
    /// Connect, run migrations, and return the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or migrations fail.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        sqlx::migrate!("src/store/migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl BoardStore for PgBoardStore {
    async fn get(&self, board_xid: &str) -> Result<Option<BoardSnapshot>, StoreError> {
        let row: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT snapshot FROM board_snapshots WHERE xid = $1")
                .bind(board_xid)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, board_xid: &str, snapshot: &BoardSnapshot) -> Result<(), StoreError> {
        let value = serde_json::to_value(snapshot)?;
        sqlx::query(
            "INSERT INTO board_snapshots (xid, snapshot, auto_delete_at, updated_at)
             VALUES ($1, $2, to_timestamp($3), now())
             ON CONFLICT (xid) DO UPDATE SET
                 snapshot = EXCLUDED.snapshot,
                 auto_delete_at = EXCLUDED.auto_delete_at,
                 updated_at = now()",
        )
        .bind(board_xid)
        .bind(&value)
        .bind(snapshot.board.auto_delete_at_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, board_xid: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM board_snapshots WHERE xid = $1")
            .bind(board_xid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
