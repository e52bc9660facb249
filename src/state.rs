//! Shared application state.
//!
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! Clone is required by Axum; all inner fields are `Arc`-wrapped.

use std::sync::Arc;

use crate::config::HubConfig;
use crate::hub::FlushHealth;
use crate::registry::SessionRegistry;
use crate::store::BoardStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BoardStore>,
    pub registry: Arc<SessionRegistry>,
    pub config: Arc<HubConfig>,
    pub health: FlushHealth,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn BoardStore>, config: HubConfig) -> Self {
        let config = Arc::new(config);
        let health = FlushHealth::new();
        let registry = Arc::new(SessionRegistry::new(
            Arc::clone(&store),
            Arc::clone(&config),
            health.clone(),
        ));
        Self { store, registry, config, health }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use crate::board::{Board, BoardColumn, BoardData, BoardSnapshot, BoardStatus, now_utc};
    use crate::store::MemoryStore;
    use std::time::Duration;

    /// App state over a memory store with timings shortened for tests.
    #[must_use]
    pub fn test_app_state() -> AppState {
        let config = HubConfig {
            evict_grace: Duration::from_millis(50),
            flush_retry_base: Duration::from_millis(1),
            ..HubConfig::default()
        };
        AppState::new(Arc::new(MemoryStore::new()), config)
    }

    /// The three-column retro layout used across tests.
    #[must_use]
    pub fn default_columns() -> Vec<BoardColumn> {
        [("c1", "Went Well", "green"), ("c2", "Challenges", "red"), ("c3", "Actions", "blue")]
            .iter()
            .enumerate()
            .map(|(i, (id, text, color))| BoardColumn {
                id: (*id).to_string(),
                text: (*text).to_string(),
                is_default: true,
                color: (*color).to_string(),
                enabled: true,
                pos: u8::try_from(i + 1).unwrap_or(u8::MAX),
            })
            .collect()
    }

    #[must_use]
    pub fn test_board(xid: &str, owner: &str) -> Board {
        let now = now_utc();
        Board {
            xid: xid.to_string(),
            name: "Sprint 12 Retro".into(),
            team: "Platform".into(),
            owner: owner.to_string(),
            status: BoardStatus::InProgress,
            mask: true,
            lock: false,
            timer_expires_at_utc: 0,
            created_at_utc: now,
            auto_delete_at_utc: now + 86_400,
        }
    }

    #[must_use]
    pub fn test_snapshot(xid: &str, owner: &str) -> BoardSnapshot {
        BoardData::new(test_board(xid, owner), default_columns()).to_snapshot()
    }

    /// Seed a board into the state's store.
    pub async fn seed_board(state: &AppState, xid: &str, owner: &str) {
        state
            .store
            .put(xid, &test_snapshot(xid, owner))
            .await
            .expect("memory store put cannot fail");
    }
}
