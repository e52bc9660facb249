//! In-memory board store.
//!
//! Backs tests and `DATABASE_URL`-less deployments. Same contract as the
//! Postgres store, minus durability across restarts.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::board::BoardSnapshot;

use super::{BoardStore, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    boards: RwLock<HashMap<String, BoardSnapshot>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BoardStore for MemoryStore {
    async fn get(&self, board_xid: &str) -> Result<Option<BoardSnapshot>, StoreError> {
        Ok(self.boards.read().await.get(board_xid).cloned())
    }

    async fn put(&self, board_xid: &str, snapshot: &BoardSnapshot) -> Result<(), StoreError> {
        self.boards
            .write()
            .await
            .insert(board_xid.to_string(), snapshot.clone());
        Ok(())
    }

    async fn delete(&self, board_xid: &str) -> Result<(), StoreError> {
        self.boards.write().await.remove(board_xid);
        Ok(())
    }
}
