//! Session registry — board id to live hub, with lazy create and
//! reference-counted teardown.
//!
//! DESIGN
//! ======
//! A sharded concurrent map keyed by board xid, so boards never contend on
//! one global lock. The first connection for a board loads its snapshot
//! from the durable store and spawns the hub task; the last release arms a
//! grace timer so a quick reconnect reuses the warm hub instead of
//! reloading from storage.
//!
//! ERROR HANDLING
//! ==============
//! `acquire` on a deleted or never-created board is `NotFound`; the ws
//! handshake turns that into a 404 before upgrading.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::info;

use crate::board::BoardData;
use crate::config::HubConfig;
use crate::envelope::ErrorCode;
use crate::hub::{BoardHub, FlushHealth};
use crate::store::{BoardStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("board not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for RegistryError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_BOARD_NOT_FOUND",
            Self::Store(inner) => inner.error_code(),
        }
    }
}

struct HubEntry {
    hub: BoardHub,
    conns: usize,
}

pub struct SessionRegistry {
    hubs: DashMap<String, HubEntry>,
    store: Arc<dyn BoardStore>,
    config: Arc<HubConfig>,
    health: FlushHealth,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn BoardStore>, config: Arc<HubConfig>, health: FlushHealth) -> Self {
        Self { hubs: DashMap::new(), store, config, health }
    }

    /// Get the live hub for a board, spawning one from the durable snapshot
    /// on first connection. Each successful acquire must be paired with one
    /// [`Self::release`].
    ///
    /// # Errors
    ///
    /// `NotFound` when the board was deleted or never existed; store errors
    /// pass through.
    pub async fn acquire(&self, board_xid: &str) -> Result<BoardHub, RegistryError> {
        if let Some(mut entry) = self.hubs.get_mut(board_xid) {
            entry.conns += 1;
            return Ok(entry.hub.clone());
        }

        // Load outside the map lock; the snapshot is discarded if another
        // acquire wins the insert race below.
        let snapshot = self
            .store
            .get(board_xid)
            .await?
            .ok_or_else(|| RegistryError::NotFound(board_xid.to_string()))?;

        match self.hubs.entry(board_xid.to_string()) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().conns += 1;
                Ok(occupied.get().hub.clone())
            }
            Entry::Vacant(vacant) => {
                let hub = BoardHub::spawn(
                    board_xid.to_string(),
                    BoardData::from_snapshot(snapshot),
                    Arc::clone(&self.store),
                    Arc::clone(&self.config),
                    self.health.clone(),
                );
                let handle = hub.clone();
                vacant.insert(HubEntry { hub, conns: 1 });
                info!(board = %board_xid, "hub started");
                Ok(handle)
            }
        }
    }

    /// Drop one connection's reference. The hub survives a grace period
    /// after the count reaches zero, then is evicted; dropping the last
    /// handle closes the hub's command channel and the task flushes and
    /// exits on its own.
    pub fn release(self: &Arc<Self>, board_xid: &str) {
        let mut idle = false;
        if let Some(mut entry) = self.hubs.get_mut(board_xid) {
            entry.conns = entry.conns.saturating_sub(1);
            idle = entry.conns == 0;
        }
        if !idle {
            return;
        }

        let registry = Arc::clone(self);
        let board = board_xid.to_string();
        let grace = self.config.evict_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if registry
                .hubs
                .remove_if(&board, |_, entry| entry.conns == 0)
                .is_some()
            {
                info!(board = %board, "idle hub evicted");
            }
        });
    }

    /// Delete a board everywhere: durable store first, then the live hub
    /// (if any) drains its connections and closes. Invoked by the owner's
    /// delete request and by the external expiry sweep.
    ///
    /// # Errors
    ///
    /// `NotFound` when there is neither a stored snapshot nor a live hub.
    pub async fn delete_board(&self, board_xid: &str) -> Result<(), RegistryError> {
        let known = self.store.get(board_xid).await?.is_some() || self.hubs.contains_key(board_xid);
        if !known {
            return Err(RegistryError::NotFound(board_xid.to_string()));
        }

        self.store.delete(board_xid).await?;
        if let Some((_, entry)) = self.hubs.remove(board_xid) {
            entry.hub.delete_board().await;
        }
        info!(board = %board_xid, "board deleted");
        Ok(())
    }

    /// Number of boards with a live hub, for operational visibility.
    #[must_use]
    pub fn active_boards(&self) -> usize {
        self.hubs.len()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
