//! `BoardHub` — per-board actor serializing mutations and fanning out events.
//!
//! ARCHITECTURE
//! ============
//! One hub task per active board. Connection adapters submit decoded events
//! over the hub's command channel; the task applies at most one mutation at
//! a time against the board data and enqueues the resulting broadcast on
//! every registered connection before touching the next command. That loop
//! is the whole ordering story: receipt-order linearization per board, full
//! independence across boards.
//!
//! LIFECYCLE
//! =========
//! `Active` → `Draining` (board delete in flight, mutations rejected,
//! pending broadcasts still flushed) → `Closed` (registry evicts; every
//! connection is told the board is gone).
//!
//! ERROR HANDLING
//! ==============
//! A rejected event produces an `err` frame to the initiating connection
//! only; nobody else observes failed attempts. Durable flush failures are
//! retried with back-off, then logged and surfaced through [`FlushHealth`]
//! while the hub keeps serving from memory.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::board::{BoardData, BoardError, Broadcast, FALLBACK_NICKNAME};
use crate::config::HubConfig;
use crate::envelope::{ClientEvent, ErrorCode, OnlineUser, RegisterEvent, ServerEvent};
use crate::store::{BoardStore, StoreError};

const COMMAND_BUFFER: usize = 64;

// =============================================================================
// TYPES
// =============================================================================

/// Frame pushed onto a connection adapter's bounded outbound queue.
#[derive(Debug, Clone)]
pub enum Outbound {
    Event(ServerEvent),
    /// Terminal: the board no longer exists. The adapter closes the socket
    /// with a distinct close code so the client can render "board gone".
    BoardGone,
}

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("register before sending board events")]
    NotRegistered,
    #[error("only the board owner can do that")]
    Forbidden,
    #[error("board no longer exists")]
    BoardGone,
    #[error(transparent)]
    Board(#[from] BoardError),
}

impl ErrorCode for HubError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotRegistered => "E_NOT_REGISTERED",
            Self::Forbidden => "E_FORBIDDEN",
            Self::BoardGone => "E_BOARD_GONE",
            Self::Board(inner) => inner.error_code(),
        }
    }
}

/// Last durable-flush failure across all hubs, read by `/healthz`.
#[derive(Clone, Default)]
pub struct FlushHealth {
    inner: Arc<Mutex<Option<String>>>,
}

impl FlushHealth {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, err: &StoreError) {
        let mut slot = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *slot = Some(err.to_string());
    }

    fn clear(&self) {
        let mut slot = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *slot = None;
    }

    #[must_use]
    pub fn last_flush_error(&self) -> Option<String> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HubState {
    Active,
    Draining,
    Closed,
}

/// Session-scoped identity, bound to a connection by its first `reg`.
#[derive(Debug, Clone)]
struct Participant {
    xid: String,
    nickname: String,
    is_owner: bool,
}

struct Conn {
    tx: mpsc::Sender<Outbound>,
    participant: Option<Participant>,
}

enum HubCommand {
    Attach { conn_id: Uuid, tx: mpsc::Sender<Outbound> },
    Event { conn_id: Uuid, event: ClientEvent },
    Detach { conn_id: Uuid },
    DeleteBoard,
}

// =============================================================================
// HANDLE
// =============================================================================

/// Cheap cloneable handle to one board's hub task.
#[derive(Clone)]
pub struct BoardHub {
    tx: mpsc::Sender<HubCommand>,
    board_xid: String,
}

impl BoardHub {
    /// Spawn the hub task for a loaded board.
    #[must_use]
    pub fn spawn(
        board_xid: String,
        data: BoardData,
        store: Arc<dyn BoardStore>,
        config: Arc<HubConfig>,
        health: FlushHealth,
    ) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let worker = HubWorker {
            board_xid: board_xid.clone(),
            data,
            conns: HashMap::new(),
            store,
            config,
            health,
            state: HubState::Active,
            rx,
        };
        tokio::spawn(worker.run());
        Self { tx, board_xid }
    }

    #[must_use]
    pub fn board_xid(&self) -> &str {
        &self.board_xid
    }

    /// Register a connection's outbound queue. Returns false if the hub is
    /// already gone.
    pub async fn attach(&self, conn_id: Uuid, tx: mpsc::Sender<Outbound>) -> bool {
        self.tx
            .send(HubCommand::Attach { conn_id, tx })
            .await
            .is_ok()
    }

    /// Submit one decoded client event. Returns false if the hub is gone.
    pub async fn submit(&self, conn_id: Uuid, event: ClientEvent) -> bool {
        self.tx
            .send(HubCommand::Event { conn_id, event })
            .await
            .is_ok()
    }

    pub async fn detach(&self, conn_id: Uuid) {
        let _ = self.tx.send(HubCommand::Detach { conn_id }).await;
    }

    /// Drive the hub to `Closed`: owner delete or the expiry sweep.
    pub async fn delete_board(&self) {
        let _ = self.tx.send(HubCommand::DeleteBoard).await;
    }
}

// =============================================================================
// WORKER
// =============================================================================

struct HubWorker {
    board_xid: String,
    data: BoardData,
    conns: HashMap<Uuid, Conn>,
    store: Arc<dyn BoardStore>,
    config: Arc<HubConfig>,
    health: FlushHealth,
    state: HubState,
    rx: mpsc::Receiver<HubCommand>,
}

impl HubWorker {
    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            match command {
                HubCommand::Attach { conn_id, tx } => self.handle_attach(conn_id, tx),
                HubCommand::Event { conn_id, event } => self.handle_event(conn_id, event).await,
                HubCommand::Detach { conn_id } => self.handle_detach(conn_id),
                HubCommand::DeleteBoard => self.handle_delete_board(),
            }
        }

        // Registry evicted us (channel closed). One final safety flush;
        // write-through already persisted every mutation, so this only
        // matters if the last flush degraded.
        if self.state == HubState::Active {
            self.flush().await;
        }
        info!(board = %self.board_xid, "hub stopped");
    }

    fn handle_attach(&mut self, conn_id: Uuid, tx: mpsc::Sender<Outbound>) {
        if self.state != HubState::Active {
            let _ = tx.try_send(Outbound::BoardGone);
            return;
        }
        self.conns.insert(conn_id, Conn { tx, participant: None });
        debug!(board = %self.board_xid, conn = %conn_id, total = self.conns.len(), "connection attached");
    }

    async fn handle_event(&mut self, conn_id: Uuid, event: ClientEvent) {
        if self.state != HubState::Active {
            if let Some(conn) = self.conns.get(&conn_id) {
                let _ = conn.tx.try_send(Outbound::BoardGone);
            }
            return;
        }

        match event {
            ClientEvent::Register(reg) => self.handle_register(conn_id, reg),
            ClientEvent::Typing => self.handle_typing(conn_id),
            other => {
                let Some(participant) = self
                    .conns
                    .get(&conn_id)
                    .and_then(|c| c.participant.clone())
                else {
                    self.send_error(conn_id, &HubError::NotRegistered);
                    return;
                };

                match self.apply(&participant, other) {
                    Ok(broadcast) => {
                        self.broadcast(&broadcast);
                        self.flush().await;
                    }
                    Err(err) => self.send_error(conn_id, &err),
                }
            }
        }
    }

    /// Authorization gate + store mutation. Owner-only operations are a
    /// single capability check on the session, not a role system.
    fn apply(&mut self, participant: &Participant, event: ClientEvent) -> Result<Broadcast, HubError> {
        match event {
            ClientEvent::Mask(ev) => {
                self.require_owner(participant)?;
                Ok(self.data.set_mask(ev.mask))
            }
            ClientEvent::Lock(ev) => {
                self.require_owner(participant)?;
                Ok(self.data.set_lock(ev.lock))
            }
            ClientEvent::Save(ev) => {
                Ok(self
                    .data
                    .save_message(&participant.xid, &ev, self.config.max_message_bytes)?)
            }
            ClientEvent::Like(ev) => Ok(self.data.like_message(&participant.xid, &ev)?),
            ClientEvent::Delete(ev) => {
                Ok(self
                    .data
                    .delete_message(&participant.xid, participant.is_owner, &ev)?)
            }
            ClientEvent::DeleteAll => {
                self.require_owner(participant)?;
                Ok(self.data.delete_all())
            }
            ClientEvent::CategoryChange(ev) => Ok(self.data.change_category(&ev)?),
            ClientEvent::Timer(ev) => {
                self.require_owner(participant)?;
                Ok(self.data.set_timer(ev.seconds))
            }
            ClientEvent::ColumnsChange(ev) => {
                self.require_owner(participant)?;
                Ok(self.data.change_columns(ev.columns)?)
            }
            // Handled before apply; listed to keep the sum type closed.
            ClientEvent::Register(_) | ClientEvent::Typing => Err(HubError::NotRegistered),
        }
    }

    fn require_owner(&self, participant: &Participant) -> Result<(), HubError> {
        if participant.is_owner {
            Ok(())
        } else {
            Err(HubError::Forbidden)
        }
    }

    fn handle_register(&mut self, conn_id: Uuid, reg: RegisterEvent) {
        if reg.xid.is_empty() {
            self.send_error(conn_id, &HubError::Board(BoardError::Validation("xid required")));
            return;
        }
        if reg.grp != self.board_xid {
            // The socket path decides the board; a stale grp is ignored.
            warn!(board = %self.board_xid, claimed = %reg.grp, "register grp mismatch");
        }

        let nickname = if reg.nickname.is_empty() {
            FALLBACK_NICKNAME.to_string()
        } else {
            reg.nickname
        };
        let is_owner = self.data.is_owner(&reg.xid);
        let participant = Participant { xid: reg.xid, nickname, is_owner };

        let Some(conn) = self.conns.get_mut(&conn_id) else {
            return;
        };
        conn.participant = Some(participant.clone());

        // Snapshot + roster to the joiner only.
        let snapshot = self
            .data
            .snapshot_response(&participant.xid, is_owner, self.roster());
        self.send(conn_id, ServerEvent::Register(snapshot));

        // Everyone else just learns who arrived.
        self.broadcast_except(
            conn_id,
            &ServerEvent::Joining { nickname: participant.nickname.clone(), xid: participant.xid.clone() },
        );
        info!(board = %self.board_xid, conn = %conn_id, xid = %participant.xid, is_owner, "participant registered");
    }

    /// Typing notifications are ephemeral: peers only, never persisted,
    /// never replayed to late joiners.
    fn handle_typing(&mut self, conn_id: Uuid) {
        let Some(participant) = self
            .conns
            .get(&conn_id)
            .and_then(|c| c.participant.clone())
        else {
            return;
        };
        self.broadcast_except(conn_id, &ServerEvent::Typing { xid: participant.xid });
    }

    fn handle_detach(&mut self, conn_id: Uuid) {
        let Some(conn) = self.conns.remove(&conn_id) else {
            return;
        };
        if let Some(participant) = conn.participant {
            self.broadcast_all(&ServerEvent::Closing { xid: participant.xid.clone() });
            info!(board = %self.board_xid, conn = %conn_id, xid = %participant.xid, remaining = self.conns.len(), "participant left");
        }
    }

    fn handle_delete_board(&mut self) {
        self.state = HubState::Draining;
        for conn in self.conns.values() {
            let _ = conn.tx.try_send(Outbound::BoardGone);
        }
        self.conns.clear();
        self.state = HubState::Closed;
        info!(board = %self.board_xid, "board deleted; hub closed");
    }

    // -------------------------------------------------------------------------
    // OUTBOUND
    // -------------------------------------------------------------------------

    /// Fan a mutation result out to every registered connection, projecting
    /// viewer-relative fields per recipient. A shared serialized payload is
    /// never reused across recipients.
    fn broadcast(&mut self, broadcast: &Broadcast) {
        let mut stalled = Vec::new();
        for (conn_id, conn) in &self.conns {
            let Some(participant) = &conn.participant else {
                continue;
            };
            let event = self.data.project(broadcast, &participant.xid);
            if conn.tx.try_send(Outbound::Event(event)).is_err() {
                stalled.push(*conn_id);
            }
        }
        self.reap(stalled);
    }

    /// Identical payload to every registered connection.
    fn broadcast_all(&mut self, event: &ServerEvent) {
        let mut stalled = Vec::new();
        for (conn_id, conn) in &self.conns {
            if conn.participant.is_none() {
                continue;
            }
            if conn.tx.try_send(Outbound::Event(event.clone())).is_err() {
                stalled.push(*conn_id);
            }
        }
        self.reap(stalled);
    }

    fn broadcast_except(&mut self, except: Uuid, event: &ServerEvent) {
        let mut stalled = Vec::new();
        for (conn_id, conn) in &self.conns {
            if *conn_id == except || conn.participant.is_none() {
                continue;
            }
            if conn.tx.try_send(Outbound::Event(event.clone())).is_err() {
                stalled.push(*conn_id);
            }
        }
        self.reap(stalled);
    }

    fn send(&mut self, conn_id: Uuid, event: ServerEvent) {
        let Some(conn) = self.conns.get(&conn_id) else {
            return;
        };
        if conn.tx.try_send(Outbound::Event(event)).is_err() {
            self.reap(vec![conn_id]);
        }
    }

    fn send_error(&mut self, conn_id: Uuid, err: &HubError) {
        debug!(board = %self.board_xid, conn = %conn_id, code = err.error_code(), "rejected event");
        self.send(conn_id, ServerEvent::error_from(err));
    }

    /// Drop connections whose outbound queue is full or closed. A stalled
    /// recipient must not hold up the rest of the board.
    fn reap(&mut self, stalled: Vec<Uuid>) {
        for conn_id in stalled {
            warn!(board = %self.board_xid, conn = %conn_id, "outbound queue stalled; dropping connection");
            self.handle_detach(conn_id);
        }
    }

    // -------------------------------------------------------------------------
    // PERSISTENCE
    // -------------------------------------------------------------------------

    fn roster(&self) -> Vec<OnlineUser> {
        self.conns
            .values()
            .filter_map(|c| c.participant.as_ref())
            .map(|p| OnlineUser { nickname: p.nickname.clone(), xid: p.xid.clone() })
            .collect()
    }

    /// Write-through snapshot flush with bounded retry. On persistent
    /// failure the hub keeps serving from memory and reports degraded
    /// health instead of failing the mutation that already broadcast.
    async fn flush(&mut self) {
        let snapshot = self.data.to_snapshot();
        let retries = self.config.flush_retries.max(1);
        for attempt in 1..=retries {
            match self.store.put(&self.board_xid, &snapshot).await {
                Ok(()) => {
                    self.health.clear();
                    return;
                }
                Err(e) if attempt < retries => {
                    warn!(board = %self.board_xid, error = %e, attempt, "snapshot flush failed; retrying");
                    let backoff = self.config.flush_retry_base * u32::try_from(attempt).unwrap_or(u32::MAX);
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    error!(board = %self.board_xid, error = %e, "snapshot flush failed after retries; serving from memory");
                    self.health.record(&e);
                }
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "hub_test.rs"]
mod tests;
