//! Wire envelope — the universal message format for retrohub.
//!
//! ARCHITECTURE
//! ============
//! Clients send `{"typ": <kind>, "pyl": <payload>}` request envelopes over
//! the board WebSocket. The server answers with flat objects carrying a
//! top-level `typ` tag (no `pyl` nesting) — the shape the browser's
//! tagged-union dispatch expects.
//!
//! DESIGN
//! ======
//! - Inbound decode is two-step: parse the envelope shell, then dispatch on
//!   `typ`. An unknown `typ` decodes to `None` rather than an error; the
//!   connection stays up and the frame is logged and dropped.
//! - Outbound is a closed sum type with exhaustive matching; every error
//!   sent on the wire carries a grepable `E_*` code.
//! - Identity is connection-scoped: `by` fields arriving in payloads are
//!   ignored, the registered xid of the connection is authoritative.

use serde::{Deserialize, Serialize};

use crate::board::BoardColumn;

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code for wire error frames.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;
}

// =============================================================================
// INBOUND
// =============================================================================

/// Envelope shell. `pyl` is left raw until the kind is known.
#[derive(Deserialize)]
struct RawEnvelope<'a> {
    typ: String,
    #[serde(borrow, default)]
    pyl: Option<&'a serde_json::value::RawValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterEvent {
    pub xid: String,
    #[serde(default)]
    pub nickname: String,
    pub grp: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaskEvent {
    pub mask: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockEvent {
    pub lock: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SaveMessageEvent {
    pub id: String,
    #[serde(default)]
    pub nickname: String,
    pub msg: String,
    pub cat: String,
    /// Empty for a top-level card, parent message id for a comment.
    #[serde(default)]
    pub pid: String,
    #[serde(default)]
    pub anon: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LikeMessageEvent {
    #[serde(rename = "msgId")]
    pub msg_id: String,
    pub like: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteMessageEvent {
    #[serde(rename = "msgId")]
    pub msg_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryChangeEvent {
    #[serde(rename = "msgId")]
    pub msg_id: String,
    pub oldcat: String,
    pub newcat: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimerEvent {
    /// Countdown length. Zero stops a running timer.
    pub seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnsChangeEvent {
    pub columns: Vec<BoardColumn>,
}

/// One decoded client request. The closed set of inbound kinds.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Register(RegisterEvent),
    Mask(MaskEvent),
    Lock(LockEvent),
    Save(SaveMessageEvent),
    Like(LikeMessageEvent),
    Delete(DeleteMessageEvent),
    DeleteAll,
    CategoryChange(CategoryChangeEvent),
    Timer(TimerEvent),
    ColumnsChange(ColumnsChangeEvent),
    Typing,
}

impl ClientEvent {
    /// Wire tag, used for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register(_) => "reg",
            Self::Mask(_) => "mask",
            Self::Lock(_) => "lock",
            Self::Save(_) => "msg",
            Self::Like(_) => "like",
            Self::Delete(_) => "del",
            Self::DeleteAll => "delall",
            Self::CategoryChange(_) => "catchng",
            Self::Timer(_) => "timer",
            Self::ColumnsChange(_) => "colreset",
            Self::Typing => "t",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Decode one inbound text frame.
///
/// Returns `Ok(None)` for an unknown `typ` — the permissive path; the caller
/// logs and drops the frame instead of failing the connection.
///
/// # Errors
///
/// Returns `DecodeError::Malformed` when the envelope shell or a known
/// kind's payload does not parse.
pub fn decode(text: &str) -> Result<Option<ClientEvent>, DecodeError> {
    let shell: RawEnvelope = serde_json::from_str(text)?;
    let pyl = shell.pyl.map_or("{}", serde_json::value::RawValue::get);

    let event = match shell.typ.as_str() {
        "reg" => ClientEvent::Register(serde_json::from_str(pyl)?),
        "mask" => ClientEvent::Mask(serde_json::from_str(pyl)?),
        "lock" => ClientEvent::Lock(serde_json::from_str(pyl)?),
        "msg" => ClientEvent::Save(serde_json::from_str(pyl)?),
        "like" => ClientEvent::Like(serde_json::from_str(pyl)?),
        "del" => ClientEvent::Delete(serde_json::from_str(pyl)?),
        "delall" => ClientEvent::DeleteAll,
        "catchng" => ClientEvent::CategoryChange(serde_json::from_str(pyl)?),
        "timer" => ClientEvent::Timer(serde_json::from_str(pyl)?),
        "colreset" => ClientEvent::ColumnsChange(serde_json::from_str(pyl)?),
        "t" => ClientEvent::Typing,
        _ => return Ok(None),
    };
    Ok(Some(event))
}

// =============================================================================
// OUTBOUND
// =============================================================================

/// Presence roster entry.
#[derive(Debug, Clone, Serialize)]
pub struct OnlineUser {
    pub nickname: String,
    pub xid: String,
}

/// Full board snapshot, delivered to a joining connection only.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub board_name: String,
    pub board_team: String,
    pub board_status: String,
    pub board_masking: bool,
    pub board_lock: bool,
    pub is_board_owner: bool,
    pub mine: bool,
    pub timer_remaining_seconds: u64,
    pub columns: Vec<BoardColumn>,
    pub users: Vec<OnlineUser>,
    pub messages: Vec<MessageResponse>,
}

/// A card or comment, projected for one recipient.
#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub id: String,
    pub pid: String,
    /// Author xid. Withheld on anonymous messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub byxid: Option<String>,
    pub nickname: String,
    pub msg: String,
    pub cat: String,
    pub likes: u32,
    /// True when the receiving participant has liked this message.
    pub liked: bool,
    pub mine: bool,
    pub anon: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LikeMessageResponse {
    pub id: String,
    pub likes: u32,
    pub liked: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteMessageResponse {
    pub id: String,
    /// Comment ids removed by the cascade.
    pub comments: Vec<String>,
}

/// One outbound frame. Flat on the wire: the tag is the top-level `typ`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "typ")]
pub enum ServerEvent {
    #[serde(rename = "reg")]
    Register(RegisterResponse),
    #[serde(rename = "joining")]
    Joining { nickname: String, xid: String },
    #[serde(rename = "closing")]
    Closing { xid: String },
    #[serde(rename = "mask")]
    Mask { mask: bool },
    #[serde(rename = "lock")]
    Lock { lock: bool },
    #[serde(rename = "msg")]
    Message(MessageResponse),
    #[serde(rename = "like")]
    Like(LikeMessageResponse),
    #[serde(rename = "del")]
    Delete(DeleteMessageResponse),
    #[serde(rename = "delall")]
    DeleteAll,
    #[serde(rename = "catchng")]
    CategoryChange { id: String, cat: String },
    #[serde(rename = "timer")]
    Timer { seconds: u64 },
    #[serde(rename = "colreset")]
    ColumnsChange { columns: Vec<BoardColumn> },
    #[serde(rename = "t")]
    Typing { xid: String },
    #[serde(rename = "err")]
    Error { code: &'static str, message: String },
}

impl ServerEvent {
    /// Build an error frame from a typed error. Sent to the initiator only.
    pub fn error_from(err: &(impl ErrorCode + ?Sized)) -> Self {
        Self::Error { code: err.error_code(), message: err.to_string() }
    }

    /// Serialize for the wire.
    ///
    /// # Errors
    ///
    /// Returns a serialization error; outbound types contain nothing that
    /// can fail to serialize, so callers log-and-drop.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "envelope_test.rs"]
mod tests;
