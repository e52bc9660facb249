//! WebSocket connection adapter — one duplex socket bridged to a board hub.
//!
//! DESIGN
//! ======
//! The board is resolved (and its hub acquired) before the upgrade, so a
//! dead link 404s instead of handshaking. After upgrade the connection runs
//! one `select!` loop:
//! - inbound frames → size ceiling → decode → submit to the hub
//! - hub outbound queue → encode → socket
//! - idle deadline → close
//!
//! Malformed envelopes and unknown `typ` values are logged and dropped,
//! never fatal — the permissive half of the protocol. Oversized frames are
//! rejected with an `err` frame before any decode work.
//!
//! LIFECYCLE
//! =========
//! Every exit path funnels to the same teardown: detach from the hub, then
//! release the registry reference — exactly once each. The hub additionally
//! reaps connections whose outbound queue has gone dead, so a task that
//! never reaches teardown cannot wedge a board.

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::envelope::{self, ClientEvent, ErrorCode, ServerEvent};
use crate::hub::{BoardHub, Outbound};
use crate::registry::RegistryError;
use crate::state::AppState;

/// Close code sent when the board has been deleted or expired.
pub const CLOSE_BOARD_GONE: u16 = 4404;

#[derive(Debug, thiserror::Error)]
enum TransportError {
    #[error("envelope too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

impl ErrorCode for TransportError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::PayloadTooLarge { .. } => "E_PAYLOAD_TOO_LARGE",
        }
    }
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Path(board_xid): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    // Board existence is settled here, during the handshake; the hub can
    // trust it afterwards.
    let hub = match state.registry.acquire(&board_xid).await {
        Ok(hub) => hub,
        Err(RegistryError::NotFound(_)) => {
            return (StatusCode::NOT_FOUND, "board not found").into_response();
        }
        Err(e) => {
            error!(error = %e, board = %board_xid, "board load failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "board load failed").into_response();
        }
    };

    ws.on_upgrade(move |socket| run_ws(socket, state, hub, board_xid))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, hub: BoardHub, board_xid: String) {
    let conn_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel::<Outbound>(state.config.outbound_buffer);

    if !hub.attach(conn_id, tx).await {
        state.registry.release(&board_xid);
        return;
    }
    info!(%conn_id, board = %board_xid, "ws: connected");

    let idle_timeout = state.config.idle_timeout;
    let idle = tokio::time::sleep(idle_timeout);
    tokio::pin!(idle);
    let mut last_typing: Option<Instant> = None;

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                idle.as_mut().reset(Instant::now() + idle_timeout);
                match msg {
                    Message::Text(text) => {
                        if !handle_inbound(&state, &hub, conn_id, &mut socket, &mut last_typing, &text).await {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    // Binary frames and transport pings are not part of the protocol.
                    _ => {}
                }
            }
            outbound = rx.recv() => {
                match outbound {
                    Some(Outbound::Event(event)) => {
                        if send_event(&mut socket, &event).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::BoardGone) => {
                        close_board_gone(&mut socket).await;
                        break;
                    }
                    // Hub dropped this connection (stalled queue) or shut down.
                    None => break,
                }
            }
            () = &mut idle => {
                info!(%conn_id, board = %board_xid, "ws: idle timeout");
                break;
            }
        }
    }

    // Exactly-once teardown for every exit path above.
    hub.detach(conn_id).await;
    state.registry.release(&board_xid);
    info!(%conn_id, board = %board_xid, "ws: disconnected");
}

// =============================================================================
// INBOUND
// =============================================================================

/// Process one inbound text frame. Returns false when the connection should
/// close (hub gone or socket write failed).
async fn handle_inbound(
    state: &AppState,
    hub: &BoardHub,
    conn_id: Uuid,
    socket: &mut WebSocket,
    last_typing: &mut Option<Instant>,
    text: &str,
) -> bool {
    // Cheap ceiling on the whole envelope before any decode work.
    let max = state.config.max_envelope_bytes;
    if text.len() > max {
        let err = TransportError::PayloadTooLarge { size: text.len(), max };
        warn!(%conn_id, size = text.len(), max, "ws: oversized frame rejected");
        return send_event(socket, &ServerEvent::error_from(&err)).await.is_ok();
    }

    match envelope::decode(text) {
        Ok(Some(ClientEvent::Typing)) => {
            // Best-effort and throttled at the source; drops are silent.
            let now = Instant::now();
            let throttled = last_typing
                .is_some_and(|previous| now.duration_since(previous) < state.config.typing_throttle);
            if throttled {
                return true;
            }
            *last_typing = Some(now);
            hub.submit(conn_id, ClientEvent::Typing).await
        }
        Ok(Some(event)) => {
            debug!(%conn_id, kind = event.kind(), "ws: recv event");
            hub.submit(conn_id, event).await
        }
        Ok(None) => {
            debug!(%conn_id, "ws: unknown typ dropped");
            true
        }
        Err(e) => {
            warn!(%conn_id, error = %e, "ws: malformed frame dropped");
            true
        }
    }
}

// =============================================================================
// OUTBOUND
// =============================================================================

async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), ()> {
    let json = match event.encode() {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize outbound event");
            return Ok(());
        }
    };
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

async fn close_board_gone(socket: &mut WebSocket) {
    let frame = CloseFrame {
        code: CLOSE_BOARD_GONE,
        reason: Utf8Bytes::from_static("board no longer exists"),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
