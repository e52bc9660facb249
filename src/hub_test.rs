use super::*;
use crate::config::HubConfig;
use crate::envelope::{LikeMessageEvent, MaskEvent, RegisterEvent, SaveMessageEvent};
use crate::state::test_helpers::{default_columns, test_board};
use crate::store::MemoryStore;
use tokio::time::{Duration, timeout};

fn test_hub_with_store(store: Arc<dyn BoardStore>) -> BoardHub {
    let data = BoardData::new(test_board("b1", "u-owner"), default_columns());
    let config = Arc::new(HubConfig {
        flush_retry_base: Duration::from_millis(1),
        ..HubConfig::default()
    });
    BoardHub::spawn("b1".into(), data, store, config, FlushHealth::new())
}

fn test_hub() -> (BoardHub, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (test_hub_with_store(Arc::clone(&store) as Arc<dyn BoardStore>), store)
}

async fn attach(hub: &BoardHub, capacity: usize) -> (Uuid, mpsc::Receiver<Outbound>) {
    let conn_id = Uuid::new_v4();
    let (tx, rx) = mpsc::channel(capacity);
    assert!(hub.attach(conn_id, tx).await, "hub should accept attach");
    (conn_id, rx)
}

fn register_event(xid: &str, nickname: &str) -> ClientEvent {
    ClientEvent::Register(RegisterEvent {
        xid: xid.to_string(),
        nickname: nickname.to_string(),
        grp: "b1".into(),
    })
}

fn save_event(id: &str, msg: &str, cat: &str) -> ClientEvent {
    ClientEvent::Save(SaveMessageEvent {
        id: id.to_string(),
        nickname: "n".into(),
        msg: msg.to_string(),
        cat: cat.to_string(),
        pid: String::new(),
        anon: false,
    })
}

async fn recv_event(rx: &mut mpsc::Receiver<Outbound>) -> ServerEvent {
    let outbound = timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("outbound receive timed out")
        .expect("outbound channel closed unexpectedly");
    match outbound {
        Outbound::Event(event) => event,
        Outbound::BoardGone => panic!("unexpected BoardGone"),
    }
}

async fn assert_no_event(rx: &mut mpsc::Receiver<Outbound>) {
    assert!(
        timeout(Duration::from_millis(80), rx.recv()).await.is_err(),
        "expected no outbound frame"
    );
}

/// Attach + register, draining the register snapshot.
async fn join(hub: &BoardHub, xid: &str) -> (Uuid, mpsc::Receiver<Outbound>) {
    let (conn_id, mut rx) = attach(hub, 16).await;
    hub.submit(conn_id, register_event(xid, xid)).await;
    let event = recv_event(&mut rx).await;
    assert!(matches!(event, ServerEvent::Register(_)), "expected snapshot, got {event:?}");
    (conn_id, rx)
}

// =============================================================================
// REGISTRATION / PRESENCE
// =============================================================================

#[tokio::test]
async fn register_delivers_snapshot_and_joining() {
    let (hub, _store) = test_hub();
    let (a, mut rx_a) = attach(&hub, 16).await;

    hub.submit(a, register_event("u-owner", "Olive")).await;
    let ServerEvent::Register(snapshot) = recv_event(&mut rx_a).await else {
        panic!("expected register snapshot");
    };
    assert!(snapshot.is_board_owner);
    assert!(snapshot.mine);
    assert_eq!(snapshot.columns.len(), 3);
    assert_eq!(snapshot.users.len(), 1);

    let (b, mut rx_b) = attach(&hub, 16).await;
    hub.submit(b, register_event("u2", "Pat")).await;
    let ServerEvent::Register(snapshot) = recv_event(&mut rx_b).await else {
        panic!("expected register snapshot");
    };
    assert!(!snapshot.is_board_owner);
    assert_eq!(snapshot.users.len(), 2);

    // The earlier participant only learns who arrived.
    let ServerEvent::Joining { nickname, xid } = recv_event(&mut rx_a).await else {
        panic!("expected joining");
    };
    assert_eq!(nickname, "Pat");
    assert_eq!(xid, "u2");
}

#[tokio::test]
async fn event_before_register_is_rejected_to_sender() {
    let (hub, _store) = test_hub();
    let (conn, mut rx) = attach(&hub, 16).await;

    hub.submit(conn, ClientEvent::Like(LikeMessageEvent { msg_id: "m1".into(), like: true }))
        .await;
    let ServerEvent::Error { code, .. } = recv_event(&mut rx).await else {
        panic!("expected error frame");
    };
    assert_eq!(code, "E_NOT_REGISTERED");
}

#[tokio::test]
async fn disconnect_broadcasts_closing_and_board_stays_active() {
    let (hub, _store) = test_hub();
    let (p1, mut rx_p1) = join(&hub, "u-owner").await;
    let (p2, mut rx_p2) = join(&hub, "u2").await;
    let ServerEvent::Joining { .. } = recv_event(&mut rx_p1).await else {
        panic!("expected joining");
    };

    hub.detach(p1).await;
    let ServerEvent::Closing { xid } = recv_event(&mut rx_p2).await else {
        panic!("expected closing");
    };
    assert_eq!(xid, "u-owner");

    // Board is still active for the remaining participant.
    hub.submit(p2, save_event("m1", "still alive", "c1")).await;
    let ServerEvent::Message(msg) = recv_event(&mut rx_p2).await else {
        panic!("expected message broadcast");
    };
    assert_eq!(msg.msg, "still alive");
}

// =============================================================================
// PER-RECIPIENT PROJECTION
// =============================================================================

#[tokio::test]
async fn like_projection_is_viewer_relative() {
    let (hub, _store) = test_hub();
    let (_p1, mut rx_p1) = join(&hub, "u-owner").await;
    let (p2, mut rx_p2) = join(&hub, "u2").await;
    let ServerEvent::Joining { .. } = recv_event(&mut rx_p1).await else {
        panic!("expected joining");
    };

    hub.submit(p2, save_event("m1", "Deploy pipeline flaky", "c1")).await;
    let ServerEvent::Message(view_p1) = recv_event(&mut rx_p1).await else {
        panic!("expected message");
    };
    let ServerEvent::Message(view_p2) = recv_event(&mut rx_p2).await else {
        panic!("expected message");
    };
    assert!(!view_p1.mine);
    assert!(view_p2.mine);

    hub.submit(p2, ClientEvent::Like(LikeMessageEvent { msg_id: "m1".into(), like: true }))
        .await;
    let ServerEvent::Like(like_p1) = recv_event(&mut rx_p1).await else {
        panic!("expected like");
    };
    let ServerEvent::Like(like_p2) = recv_event(&mut rx_p2).await else {
        panic!("expected like");
    };
    assert_eq!(like_p1.likes, 1);
    assert!(!like_p1.liked);
    assert_eq!(like_p2.likes, 1);
    assert!(like_p2.liked);
}

// =============================================================================
// AUTHORIZATION / ERRORS
// =============================================================================

#[tokio::test]
async fn owner_only_ops_reject_non_owners_quietly() {
    let (hub, _store) = test_hub();
    let (_p1, mut rx_p1) = join(&hub, "u-owner").await;
    let (p2, mut rx_p2) = join(&hub, "u2").await;
    let ServerEvent::Joining { .. } = recv_event(&mut rx_p1).await else {
        panic!("expected joining");
    };

    hub.submit(p2, ClientEvent::Mask(MaskEvent { mask: false })).await;
    let ServerEvent::Error { code, .. } = recv_event(&mut rx_p2).await else {
        panic!("expected error frame");
    };
    assert_eq!(code, "E_FORBIDDEN");
    // Nobody else observes a failed attempt.
    assert_no_event(&mut rx_p1).await;
}

#[tokio::test]
async fn validation_errors_go_to_initiator_only() {
    let (hub, _store) = test_hub();
    let (_p1, mut rx_p1) = join(&hub, "u-owner").await;
    let (p2, mut rx_p2) = join(&hub, "u2").await;
    let ServerEvent::Joining { .. } = recv_event(&mut rx_p1).await else {
        panic!("expected joining");
    };

    hub.submit(p2, save_event("m1", "card", "missing-column")).await;
    let ServerEvent::Error { code, .. } = recv_event(&mut rx_p2).await else {
        panic!("expected error frame");
    };
    assert_eq!(code, "E_UNKNOWN_COLUMN");
    assert_no_event(&mut rx_p1).await;
}

// =============================================================================
// BACKPRESSURE / LIFECYCLE
// =============================================================================

#[tokio::test]
async fn stalled_recipient_is_dropped_not_waited_on() {
    let (hub, _store) = test_hub();
    let (p1, mut rx_p1) = join(&hub, "u-owner").await;

    // A consumer with a one-slot queue that never drains.
    let (p2, mut rx_p2) = attach(&hub, 1).await;
    hub.submit(p2, register_event("u2", "Slow")).await;
    let ServerEvent::Joining { .. } = recv_event(&mut rx_p1).await else {
        panic!("expected joining");
    };

    // First broadcast fills the stalled queue (the register snapshot still
    // occupies its slot); the hub drops the connection instead of waiting.
    hub.submit(p1, save_event("m1", "one", "c1")).await;
    let ServerEvent::Message(_) = recv_event(&mut rx_p1).await else {
        panic!("expected message");
    };
    let ServerEvent::Closing { xid } = recv_event(&mut rx_p1).await else {
        panic!("expected closing for the stalled connection");
    };
    assert_eq!(xid, "u2");

    // The stalled queue got only its snapshot before being cut loose.
    let ServerEvent::Register(_) = recv_event(&mut rx_p2).await else {
        panic!("expected the buffered snapshot");
    };
    assert!(
        timeout(Duration::from_millis(80), rx_p2.recv())
            .await
            .map_or(true, |item| item.is_none()),
        "stalled connection should be closed"
    );
}

#[tokio::test]
async fn delete_board_drains_connections_terminally() {
    let (hub, _store) = test_hub();
    let (_p1, mut rx_p1) = join(&hub, "u-owner").await;

    hub.delete_board().await;
    let outbound = timeout(Duration::from_millis(500), rx_p1.recv())
        .await
        .expect("outbound receive timed out")
        .expect("channel closed");
    assert!(matches!(outbound, Outbound::BoardGone));

    // Late attach learns the same thing.
    let conn_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel(4);
    hub.attach(conn_id, tx).await;
    let outbound = timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("outbound receive timed out")
        .expect("channel closed");
    assert!(matches!(outbound, Outbound::BoardGone));
}

// =============================================================================
// PERSISTENCE
// =============================================================================

#[tokio::test]
async fn mutations_write_through_to_store() {
    let (hub, store) = test_hub();
    let (p1, mut rx_p1) = join(&hub, "u-owner").await;

    hub.submit(p1, save_event("m1", "persist me", "c1")).await;
    let ServerEvent::Message(_) = recv_event(&mut rx_p1).await else {
        panic!("expected message");
    };
    // The actor flushes mutation N before touching mutation N+1, so after
    // the next broadcast arrives the first flush has landed.
    hub.submit(p1, ClientEvent::Mask(MaskEvent { mask: false })).await;
    let ServerEvent::Mask { .. } = recv_event(&mut rx_p1).await else {
        panic!("expected mask");
    };

    let snapshot = store.get("b1").await.expect("get").expect("snapshot exists");
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].content, "persist me");
}

struct FailingStore;

#[async_trait::async_trait]
impl BoardStore for FailingStore {
    async fn get(&self, _board_xid: &str) -> Result<Option<crate::board::BoardSnapshot>, StoreError> {
        Ok(None)
    }
    async fn put(&self, _board_xid: &str, _snapshot: &crate::board::BoardSnapshot) -> Result<(), StoreError> {
        Err(StoreError::Corrupt(
            serde_json::from_str::<i32>("broken").expect_err("always fails"),
        ))
    }
    async fn delete(&self, _board_xid: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

#[tokio::test]
async fn flush_failure_degrades_health_but_keeps_serving() {
    let data = BoardData::new(test_board("b1", "u-owner"), default_columns());
    let config = Arc::new(HubConfig {
        flush_retries: 2,
        flush_retry_base: Duration::from_millis(1),
        ..HubConfig::default()
    });
    let health = FlushHealth::new();
    let hub = BoardHub::spawn("b1".into(), data, Arc::new(FailingStore), config, health.clone());

    let (p1, mut rx_p1) = join(&hub, "u-owner").await;
    hub.submit(p1, save_event("m1", "still broadcast", "c1")).await;

    // Availability over durability: the broadcast happens anyway...
    let ServerEvent::Message(msg) = recv_event(&mut rx_p1).await else {
        panic!("expected message");
    };
    assert_eq!(msg.msg, "still broadcast");

    // ...and the failure surfaces through the health accessor.
    hub.submit(p1, ClientEvent::Mask(MaskEvent { mask: false })).await;
    let ServerEvent::Mask { .. } = recv_event(&mut rx_p1).await else {
        panic!("expected mask");
    };
    assert!(health.last_flush_error().is_some());
}
