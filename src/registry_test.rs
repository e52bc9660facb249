use super::*;
use crate::state::test_helpers::{seed_board, test_app_state};
use tokio::time::{Duration, sleep};

#[tokio::test]
async fn acquire_unknown_board_is_not_found() {
    let state = test_app_state();
    let result = state.registry.acquire("missing").await;
    assert!(matches!(result, Err(RegistryError::NotFound(_))));
    assert_eq!(state.registry.active_boards(), 0);
}

#[tokio::test]
async fn acquire_spawns_once_and_reuses() {
    let state = test_app_state();
    seed_board(&state, "b1", "u-owner").await;

    let first = state.registry.acquire("b1").await.expect("board exists");
    let second = state.registry.acquire("b1").await.expect("board exists");
    assert_eq!(first.board_xid(), second.board_xid());
    assert_eq!(state.registry.active_boards(), 1);
}

#[tokio::test]
async fn last_release_evicts_after_grace() {
    let state = test_app_state();
    seed_board(&state, "b1", "u-owner").await;

    let _hub = state.registry.acquire("b1").await.expect("board exists");
    state.registry.release("b1");
    assert_eq!(state.registry.active_boards(), 1, "grace period keeps the hub warm");

    // Test config uses a 50ms grace.
    sleep(Duration::from_millis(200)).await;
    assert_eq!(state.registry.active_boards(), 0);
}

#[tokio::test]
async fn reacquire_within_grace_keeps_the_hub() {
    let state = test_app_state();
    seed_board(&state, "b1", "u-owner").await;

    let _first = state.registry.acquire("b1").await.expect("board exists");
    state.registry.release("b1");
    let _second = state.registry.acquire("b1").await.expect("quick reconnect");

    sleep(Duration::from_millis(200)).await;
    assert_eq!(state.registry.active_boards(), 1, "armed eviction must notice the reconnect");
}

#[tokio::test]
async fn delete_board_clears_store_and_hub() {
    let state = test_app_state();
    seed_board(&state, "b1", "u-owner").await;
    let _hub = state.registry.acquire("b1").await.expect("board exists");

    state.registry.delete_board("b1").await.expect("delete");
    assert_eq!(state.registry.active_boards(), 0);
    assert!(state.store.get("b1").await.expect("get").is_none());

    let again = state.registry.delete_board("b1").await;
    assert!(matches!(again, Err(RegistryError::NotFound(_))));
    let reconnect = state.registry.acquire("b1").await;
    assert!(matches!(reconnect, Err(RegistryError::NotFound(_))));
}
