//! Durable board store — the key-value collaborator behind the hubs.
//!
//! DESIGN
//! ======
//! Hubs exchange whole [`BoardSnapshot`]s with the store: load on first
//! connection, write-through after every applied mutation. The trait keeps
//! the hub ignorant of the backing engine; Postgres is the production
//! implementation and the in-memory store backs tests and storage-less
//! deployments.

pub mod memory;
pub mod pg;

use async_trait::async_trait;

use crate::board::BoardSnapshot;
use crate::envelope::ErrorCode;

pub use memory::MemoryStore;
pub use pg::PgBoardStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt snapshot: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Database(_) => "E_STORE",
            Self::Corrupt(_) => "E_SNAPSHOT_CORRUPT",
        }
    }
}

/// Get / put / delete over board snapshots.
#[async_trait]
pub trait BoardStore: Send + Sync {
    /// Fetch a board snapshot. `Ok(None)` when the board never existed or
    /// has been deleted.
    async fn get(&self, board_xid: &str) -> Result<Option<BoardSnapshot>, StoreError>;

    /// Upsert a board snapshot.
    async fn put(&self, board_xid: &str, snapshot: &BoardSnapshot) -> Result<(), StoreError>;

    /// Remove a board. Deleting an absent board is not an error.
    async fn delete(&self, board_xid: &str) -> Result<(), StoreError>;
}
