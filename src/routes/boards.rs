//! Board REST surface — create, probe, refresh, delete.
//!
//! DESIGN
//! ======
//! These endpoints sit upstream of the socket: the frontend creates a board
//! here, probes name/ownership before opening the socket, and re-fetches
//! messages after a reconnect. `DELETE` is the hook the external expiry
//! sweep (and the owner) use to drive a live hub to `Closed`.

use std::collections::HashMap;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rand::distr::{Alphanumeric, SampleString};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::board::{Board, BoardColumn, BoardData, BoardStatus, now_utc};
use crate::envelope::MessageResponse;
use crate::registry::RegistryError;
use crate::state::AppState;
use crate::store::BoardStore;

/// Length of generated board xids.
const BOARD_XID_LEN: usize = 22;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateBoardReq {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub team: String,
    pub owner: String,
    pub columns: Vec<BoardColumn>,
}

#[derive(Debug, Serialize)]
pub struct CreateBoardRes {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct GetBoardRes {
    pub id: String,
    pub name: String,
    #[serde(rename = "isOwner")]
    pub is_owner: bool,
}

fn new_board_xid() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), BOARD_XID_LEN)
}

// =============================================================================
// HANDLERS
// =============================================================================

/// Create a board with its initial column set.
pub async fn create_board(State(state): State<AppState>, Json(req): Json<CreateBoardReq>) -> Response {
    if req.owner.is_empty() {
        return (StatusCode::BAD_REQUEST, "owner required").into_response();
    }
    if let Err(e) = BoardData::validate_columns(&req.columns) {
        return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
    }

    let now = now_utc();
    let ttl = i64::try_from(state.config.board_ttl.as_secs()).unwrap_or(0);
    let board = Board {
        xid: new_board_xid(),
        name: req.name,
        team: req.team,
        owner: req.owner,
        status: BoardStatus::InProgress,
        mask: true,
        lock: false,
        timer_expires_at_utc: 0,
        created_at_utc: now,
        auto_delete_at_utc: now + ttl,
    };
    let xid = board.xid.clone();
    let snapshot = BoardData::new(board, req.columns).to_snapshot();

    match state.store.put(&xid, &snapshot).await {
        Ok(()) => {
            info!(board = %xid, "board created");
            (StatusCode::CREATED, Json(CreateBoardRes { id: xid })).into_response()
        }
        Err(e) => {
            error!(error = %e, "board create failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Name + ownership probe the frontend runs before opening the socket.
pub async fn get_board(
    State(state): State<AppState>,
    Path((id, user)): Path<(String, String)>,
) -> Response {
    match state.store.get(&id).await {
        Ok(Some(snapshot)) => Json(GetBoardRes {
            id: snapshot.board.xid.clone(),
            name: snapshot.board.name.clone(),
            is_owner: !user.is_empty() && user == snapshot.board.owner,
        })
        .into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!(error = %e, board = %id, "board fetch failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Messages re-fetch, projected for the requesting participant.
pub async fn refresh(
    State(state): State<AppState>,
    Path((id, user)): Path<(String, String)>,
) -> Response {
    match state.store.get(&id).await {
        Ok(Some(snapshot)) => {
            let messages: Vec<MessageResponse> = BoardData::from_snapshot(snapshot).messages_for(&user);
            Json(messages).into_response()
        }
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!(error = %e, board = %id, "refresh failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Delete a board. Allowed for the owner (`?user=<xid>`) at any time, and
/// for anyone — in practice the expiry sweep — once the auto-delete
/// deadline has passed.
pub async fn delete_board(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let user = params.get("user").map_or("", String::as_str);

    match state.store.get(&id).await {
        Ok(Some(snapshot)) => {
            let expired = snapshot.board.auto_delete_at_utc <= now_utc();
            let is_owner = !user.is_empty() && user == snapshot.board.owner;
            if !is_owner && !expired {
                return StatusCode::FORBIDDEN.into_response();
            }
        }
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!(error = %e, board = %id, "board fetch failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    match state.registry.delete_board(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(RegistryError::NotFound(_)) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!(error = %e, board = %id, "board delete failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "boards_test.rs"]
mod tests;
