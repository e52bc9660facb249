//! Board state store — authoritative in-memory data for one board.
//!
//! DESIGN
//! ======
//! Pure, deterministic mutation logic: each operation takes a validated
//! event, applies it to this board's data, and returns the broadcast the
//! hub should fan out — or a typed error that goes back to the initiator
//! only. Nothing here touches the network, presence, or the durable store.
//!
//! The single-writer discipline lives in the hub: `BoardData` is only ever
//! mutated from one board's actor task, so no locking appears here.
//!
//! PROJECTION
//! ==========
//! `likes`, `liked`, `mine`, and anonymized nicknames are viewer-relative.
//! Broadcasts therefore carry ids, not rendered payloads; the hub calls
//! [`BoardData::project`] once per recipient.

use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::envelope::{
    CategoryChangeEvent, DeleteMessageEvent, DeleteMessageResponse, ErrorCode, LikeMessageEvent,
    LikeMessageResponse, MessageResponse, OnlineUser, RegisterResponse, SaveMessageEvent, ServerEvent,
};

/// Hard cap on columns per board.
pub const MAX_COLUMNS: usize = 5;

/// Nickname shown when a participant never supplied one.
pub const FALLBACK_NICKNAME: &str = "Anonymous";

/// Current time as whole seconds since the Unix epoch.
#[must_use]
pub fn now_utc() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_secs()).unwrap_or(0)
}

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BoardStatus {
    InProgress,
    Paused,
    Completed,
}

impl BoardStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "inProgress",
            Self::Paused => "paused",
            Self::Completed => "completed",
        }
    }
}

/// Board metadata. Columns and messages live beside it in [`BoardData`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Board {
    pub xid: String,
    pub name: String,
    pub team: String,
    /// Owner participant xid. The single capability gate for owner-only ops.
    pub owner: String,
    pub status: BoardStatus,
    pub mask: bool,
    pub lock: bool,
    /// Unix seconds. A value in the past means the timer is stopped.
    pub timer_expires_at_utc: i64,
    pub created_at_utc: i64,
    pub auto_delete_at_utc: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardColumn {
    pub id: String,
    pub text: String,
    /// Marks a locale-translatable default label; the client renders it.
    #[serde(rename = "isDefault")]
    pub is_default: bool,
    pub color: String,
    pub enabled: bool,
    /// 1-based position, dense and unique among enabled columns.
    pub pos: u8,
}

/// A stored card or comment. Comments carry their parent's id in `parent_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub by: String,
    pub nickname: String,
    pub content: String,
    pub category: String,
    #[serde(default)]
    pub parent_id: String,
    #[serde(default)]
    pub anon: bool,
    /// Creation order, monotonically increasing per board.
    pub seq: u64,
}

impl StoredMessage {
    fn is_top_level(&self) -> bool {
        self.parent_id.is_empty()
    }
}

/// Durable shape of one board, exchanged with the [`crate::store::BoardStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub board: Board,
    pub columns: Vec<BoardColumn>,
    pub messages: Vec<StoredMessage>,
    /// Message id to liker xids.
    pub likes: HashMap<String, Vec<String>>,
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    #[error("board is locked")]
    Locked,
    #[error("{0}")]
    Validation(&'static str),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("column is disabled: {0}")]
    ColumnDisabled(String),
    #[error("message not found: {0}")]
    MessageNotFound(String),
    #[error("parent message not found: {0}")]
    ParentNotFound(String),
    #[error("comments cannot be nested")]
    CommentDepth,
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
    #[error("cannot modify someone else's message")]
    NotAuthor,
    #[error("not a top-level message: {0}")]
    NotTopLevel(String),
    #[error("message is in column {current}, not {claimed}")]
    CategoryMismatch { current: String, claimed: String },
    #[error("column count must be 1..={MAX_COLUMNS}, got {0}")]
    ColumnCount(usize),
    #[error("duplicate column id: {0}")]
    DuplicateColumn(String),
    #[error("at least one column must be enabled")]
    NoEnabledColumn,
    #[error("enabled column positions must be dense and unique")]
    BadPositions,
    #[error("column still has messages: {0}")]
    ColumnOccupied(String),
}

impl ErrorCode for BoardError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Locked => "E_LOCKED",
            Self::Validation(_) => "E_VALIDATION",
            Self::UnknownColumn(_) => "E_UNKNOWN_COLUMN",
            Self::ColumnDisabled(_) => "E_COLUMN_DISABLED",
            Self::MessageNotFound(_) => "E_MSG_NOT_FOUND",
            Self::ParentNotFound(_) => "E_PARENT_NOT_FOUND",
            Self::CommentDepth => "E_COMMENT_DEPTH",
            Self::MessageTooLarge { .. } => "E_MSG_TOO_LARGE",
            Self::NotAuthor => "E_NOT_AUTHOR",
            Self::NotTopLevel(_) => "E_NOT_TOP_LEVEL",
            Self::CategoryMismatch { .. } => "E_CATEGORY_MISMATCH",
            Self::ColumnCount(_) => "E_COLUMN_COUNT",
            Self::DuplicateColumn(_) => "E_COLUMN_DUPLICATE",
            Self::NoEnabledColumn => "E_NO_ENABLED_COLUMN",
            Self::BadPositions => "E_COLUMN_POSITIONS",
            Self::ColumnOccupied(_) => "E_COLUMN_OCCUPIED",
        }
    }
}

// =============================================================================
// BROADCAST
// =============================================================================

/// Result of a successful mutation, before per-recipient projection.
#[derive(Debug, Clone)]
pub enum Broadcast {
    Mask { mask: bool },
    Lock { lock: bool },
    Message { id: String },
    Like { id: String },
    Delete { id: String, comments: Vec<String> },
    DeleteAll,
    CategoryChange { id: String, cat: String },
    Timer { seconds: u64 },
    Columns { columns: Vec<BoardColumn> },
}

// =============================================================================
// BOARD DATA
// =============================================================================

#[derive(Debug)]
pub struct BoardData {
    board: Board,
    columns: Vec<BoardColumn>,
    messages: HashMap<String, StoredMessage>,
    /// Message id to liker xids. Count and `liked` are derived from this.
    likes: HashMap<String, HashSet<String>>,
    next_seq: u64,
}

impl BoardData {
    #[must_use]
    pub fn new(board: Board, columns: Vec<BoardColumn>) -> Self {
        Self { board, columns, messages: HashMap::new(), likes: HashMap::new(), next_seq: 0 }
    }

    #[must_use]
    pub fn from_snapshot(snapshot: BoardSnapshot) -> Self {
        let next_seq = snapshot
            .messages
            .iter()
            .map(|m| m.seq + 1)
            .max()
            .unwrap_or(0);
        let messages = snapshot
            .messages
            .into_iter()
            .map(|m| (m.id.clone(), m))
            .collect();
        let likes = snapshot
            .likes
            .into_iter()
            .map(|(id, xids)| (id, xids.into_iter().collect()))
            .collect();
        Self { board: snapshot.board, columns: snapshot.columns, messages, likes, next_seq }
    }

    #[must_use]
    pub fn to_snapshot(&self) -> BoardSnapshot {
        let mut messages: Vec<StoredMessage> = self.messages.values().cloned().collect();
        messages.sort_by_key(|m| m.seq);
        let likes = self
            .likes
            .iter()
            .filter(|(_, xids)| !xids.is_empty())
            .map(|(id, xids)| {
                let mut sorted: Vec<String> = xids.iter().cloned().collect();
                sorted.sort();
                (id.clone(), sorted)
            })
            .collect();
        BoardSnapshot {
            board: self.board.clone(),
            columns: self.columns.clone(),
            messages,
            likes,
        }
    }

    #[must_use]
    pub fn board(&self) -> &Board {
        &self.board
    }

    #[must_use]
    pub fn columns(&self) -> &[BoardColumn] {
        &self.columns
    }

    #[must_use]
    pub fn is_owner(&self, xid: &str) -> bool {
        !xid.is_empty() && xid == self.board.owner
    }

    #[must_use]
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Seconds until the countdown expires; 0 when stopped or elapsed.
    #[must_use]
    pub fn timer_remaining_seconds(&self) -> u64 {
        let remaining = self.board.timer_expires_at_utc - now_utc();
        u64::try_from(remaining).unwrap_or(0)
    }

    fn column(&self, id: &str) -> Option<&BoardColumn> {
        self.columns.iter().find(|c| c.id == id)
    }

    fn enabled_column(&self, id: &str) -> Result<&BoardColumn, BoardError> {
        let col = self
            .column(id)
            .ok_or_else(|| BoardError::UnknownColumn(id.to_string()))?;
        if !col.enabled {
            return Err(BoardError::ColumnDisabled(id.to_string()));
        }
        Ok(col)
    }

    fn column_occupied(&self, id: &str) -> bool {
        self.messages.values().any(|m| m.category == id)
    }

    // -------------------------------------------------------------------------
    // MUTATIONS
    // -------------------------------------------------------------------------

    pub fn set_mask(&mut self, mask: bool) -> Broadcast {
        self.board.mask = mask;
        Broadcast::Mask { mask }
    }

    /// Locking blocks subsequent save/update attempts; it never discards
    /// already-persisted data.
    pub fn set_lock(&mut self, lock: bool) -> Broadcast {
        self.board.lock = lock;
        Broadcast::Lock { lock }
    }

    /// Upsert one card or comment.
    ///
    /// An existing id authored by the same participant is an update: body,
    /// nickname, and the anonymous flag are replaced, category is not (that
    /// moves only through [`Self::change_category`]).
    ///
    /// # Errors
    ///
    /// `Locked`, size, column, parent-depth, and authorship violations.
    pub fn save_message(
        &mut self,
        by: &str,
        event: &SaveMessageEvent,
        max_bytes: usize,
    ) -> Result<Broadcast, BoardError> {
        if self.board.lock {
            return Err(BoardError::Locked);
        }
        if event.id.is_empty() {
            return Err(BoardError::Validation("message id required"));
        }
        if event.msg.len() > max_bytes {
            return Err(BoardError::MessageTooLarge { size: event.msg.len(), max: max_bytes });
        }

        if let Some(existing) = self.messages.get_mut(&event.id) {
            if existing.by != by {
                return Err(BoardError::NotAuthor);
            }
            existing.content = event.msg.clone();
            existing.nickname = event.nickname.clone();
            existing.anon = event.anon;
            return Ok(Broadcast::Message { id: event.id.clone() });
        }

        self.enabled_column(&event.cat)?;
        if !event.pid.is_empty() {
            let parent = self
                .messages
                .get(&event.pid)
                .ok_or_else(|| BoardError::ParentNotFound(event.pid.clone()))?;
            if !parent.is_top_level() {
                return Err(BoardError::CommentDepth);
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.messages.insert(
            event.id.clone(),
            StoredMessage {
                id: event.id.clone(),
                by: by.to_string(),
                nickname: event.nickname.clone(),
                content: event.msg.clone(),
                category: event.cat.clone(),
                parent_id: event.pid.clone(),
                anon: event.anon,
                seq,
            },
        );
        Ok(Broadcast::Message { id: event.id.clone() })
    }

    /// Idempotent like toggle: the event carries the desired state, and
    /// repeating it never double-counts.
    ///
    /// # Errors
    ///
    /// `MessageNotFound` when the target no longer exists.
    pub fn like_message(&mut self, by: &str, event: &LikeMessageEvent) -> Result<Broadcast, BoardError> {
        if !self.messages.contains_key(&event.msg_id) {
            return Err(BoardError::MessageNotFound(event.msg_id.clone()));
        }
        let likers = self.likes.entry(event.msg_id.clone()).or_default();
        if event.like {
            likers.insert(by.to_string());
        } else {
            likers.remove(by);
        }
        Ok(Broadcast::Like { id: event.msg_id.clone() })
    }

    /// Delete a message. Cascades to its comments; the broadcast carries the
    /// cascaded ids so every client can drop them in one pass.
    ///
    /// # Errors
    ///
    /// `MessageNotFound`; `NotAuthor` unless the caller authored it or owns
    /// the board.
    pub fn delete_message(
        &mut self,
        by: &str,
        is_owner: bool,
        event: &DeleteMessageEvent,
    ) -> Result<Broadcast, BoardError> {
        let target = self
            .messages
            .get(&event.msg_id)
            .ok_or_else(|| BoardError::MessageNotFound(event.msg_id.clone()))?;
        if !is_owner && target.by != by {
            return Err(BoardError::NotAuthor);
        }

        let mut comments: Vec<(u64, String)> = self
            .messages
            .values()
            .filter(|m| m.parent_id == event.msg_id)
            .map(|m| (m.seq, m.id.clone()))
            .collect();
        comments.sort_unstable();
        let comments: Vec<String> = comments.into_iter().map(|(_, id)| id).collect();

        self.messages.remove(&event.msg_id);
        self.likes.remove(&event.msg_id);
        for id in &comments {
            self.messages.remove(id);
            self.likes.remove(id);
        }
        Ok(Broadcast::Delete { id: event.msg_id.clone(), comments })
    }

    /// Clear every card, comment, and like. Columns and metadata survive.
    pub fn delete_all(&mut self) -> Broadcast {
        self.messages.clear();
        self.likes.clear();
        Broadcast::DeleteAll
    }

    /// Move a top-level card to another column; its comments follow.
    ///
    /// # Errors
    ///
    /// Rejects comments, stale `oldcat` claims, and disabled/unknown targets.
    pub fn change_category(&mut self, event: &CategoryChangeEvent) -> Result<Broadcast, BoardError> {
        self.enabled_column(&event.newcat)?;
        let target = self
            .messages
            .get(&event.msg_id)
            .ok_or_else(|| BoardError::MessageNotFound(event.msg_id.clone()))?;
        if !target.is_top_level() {
            return Err(BoardError::NotTopLevel(event.msg_id.clone()));
        }
        if target.category != event.oldcat {
            return Err(BoardError::CategoryMismatch {
                current: target.category.clone(),
                claimed: event.oldcat.clone(),
            });
        }

        for message in self.messages.values_mut() {
            if message.id == event.msg_id || message.parent_id == event.msg_id {
                message.category = event.newcat.clone();
            }
        }
        Ok(Broadcast::CategoryChange { id: event.msg_id.clone(), cat: event.newcat.clone() })
    }

    /// Start a countdown, or stop it with `seconds == 0`. Stopping rewinds
    /// the expiry to one second in the past so late joiners see 0.
    pub fn set_timer(&mut self, seconds: u64) -> Broadcast {
        let now = now_utc();
        if seconds == 0 {
            self.board.timer_expires_at_utc = now - 1;
        } else {
            self.board.timer_expires_at_utc = now + i64::try_from(seconds).unwrap_or(i64::MAX - now);
        }
        Broadcast::Timer { seconds }
    }

    /// Replace the column set wholesale.
    ///
    /// # Errors
    ///
    /// Structural violations from [`Self::validate_columns`], plus
    /// `ColumnOccupied` when a column that still holds messages would be
    /// removed or disabled.
    pub fn change_columns(&mut self, columns: Vec<BoardColumn>) -> Result<Broadcast, BoardError> {
        Self::validate_columns(&columns)?;

        for existing in &self.columns {
            let survives = columns.iter().any(|c| c.id == existing.id);
            if !survives && self.column_occupied(&existing.id) {
                return Err(BoardError::ColumnOccupied(existing.id.clone()));
            }
        }
        for column in &columns {
            if !column.enabled && self.column_occupied(&column.id) {
                return Err(BoardError::ColumnOccupied(column.id.clone()));
            }
        }

        self.columns = columns;
        Ok(Broadcast::Columns { columns: self.columns.clone() })
    }

    /// Structural column-set invariants, shared with board creation.
    ///
    /// # Errors
    ///
    /// `ColumnCount`, `DuplicateColumn`, `NoEnabledColumn`, `BadPositions`.
    pub fn validate_columns(columns: &[BoardColumn]) -> Result<(), BoardError> {
        if columns.is_empty() || columns.len() > MAX_COLUMNS {
            return Err(BoardError::ColumnCount(columns.len()));
        }
        let mut ids = HashSet::new();
        for column in columns {
            if column.id.is_empty() {
                return Err(BoardError::Validation("column id required"));
            }
            if !ids.insert(column.id.as_str()) {
                return Err(BoardError::DuplicateColumn(column.id.clone()));
            }
        }
        let mut positions: Vec<u8> = columns.iter().filter(|c| c.enabled).map(|c| c.pos).collect();
        if positions.is_empty() {
            return Err(BoardError::NoEnabledColumn);
        }
        positions.sort_unstable();
        let dense = positions
            .iter()
            .enumerate()
            .all(|(i, &pos)| usize::from(pos) == i + 1);
        if !dense {
            return Err(BoardError::BadPositions);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // PROJECTION
    // -------------------------------------------------------------------------

    /// Render one broadcast for one recipient. Viewer-relative fields
    /// (`liked`, `mine`, anonymized nicknames) are computed here, never
    /// cached across recipients.
    #[must_use]
    pub fn project(&self, broadcast: &Broadcast, viewer: &str) -> ServerEvent {
        match broadcast {
            Broadcast::Mask { mask } => ServerEvent::Mask { mask: *mask },
            Broadcast::Lock { lock } => ServerEvent::Lock { lock: *lock },
            Broadcast::Message { id } => match self.messages.get(id) {
                Some(message) => ServerEvent::Message(self.message_response(message, viewer)),
                None => ServerEvent::Delete(DeleteMessageResponse { id: id.clone(), comments: Vec::new() }),
            },
            Broadcast::Like { id } => ServerEvent::Like(LikeMessageResponse {
                id: id.clone(),
                likes: self.like_count(id),
                liked: self.has_liked(id, viewer),
            }),
            Broadcast::Delete { id, comments } => ServerEvent::Delete(DeleteMessageResponse {
                id: id.clone(),
                comments: comments.clone(),
            }),
            Broadcast::DeleteAll => ServerEvent::DeleteAll,
            Broadcast::CategoryChange { id, cat } => {
                ServerEvent::CategoryChange { id: id.clone(), cat: cat.clone() }
            }
            Broadcast::Timer { seconds } => ServerEvent::Timer { seconds: *seconds },
            Broadcast::Columns { columns } => ServerEvent::ColumnsChange { columns: columns.clone() },
        }
    }

    /// Full snapshot for a joining participant.
    #[must_use]
    pub fn snapshot_response(&self, viewer: &str, is_owner: bool, users: Vec<OnlineUser>) -> RegisterResponse {
        RegisterResponse {
            board_name: self.board.name.clone(),
            board_team: self.board.team.clone(),
            board_status: self.board.status.as_str().to_string(),
            board_masking: self.board.mask,
            board_lock: self.board.lock,
            is_board_owner: is_owner,
            mine: true,
            timer_remaining_seconds: self.timer_remaining_seconds(),
            columns: self.columns.clone(),
            users,
            messages: self.messages_for(viewer),
        }
    }

    /// All messages in creation order, projected for one viewer.
    #[must_use]
    pub fn messages_for(&self, viewer: &str) -> Vec<MessageResponse> {
        let mut ordered: Vec<&StoredMessage> = self.messages.values().collect();
        ordered.sort_by_key(|m| m.seq);
        ordered
            .into_iter()
            .map(|m| self.message_response(m, viewer))
            .collect()
    }

    fn message_response(&self, message: &StoredMessage, viewer: &str) -> MessageResponse {
        let (byxid, nickname) = if message.anon {
            (None, String::new())
        } else if message.nickname.is_empty() {
            (Some(message.by.clone()), FALLBACK_NICKNAME.to_string())
        } else {
            (Some(message.by.clone()), message.nickname.clone())
        };
        MessageResponse {
            id: message.id.clone(),
            pid: message.parent_id.clone(),
            byxid,
            nickname,
            msg: message.content.clone(),
            cat: message.category.clone(),
            likes: self.like_count(&message.id),
            liked: self.has_liked(&message.id, viewer),
            mine: message.by == viewer,
            anon: message.anon,
        }
    }

    fn like_count(&self, id: &str) -> u32 {
        self.likes
            .get(id)
            .map_or(0, |likers| u32::try_from(likers.len()).unwrap_or(u32::MAX))
    }

    fn has_liked(&self, id: &str, viewer: &str) -> bool {
        self.likes.get(id).is_some_and(|likers| likers.contains(viewer))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "board_test.rs"]
mod tests;
