//! End-to-end signaling tests against a real WebSocket client.
//!
//! Boots the full axum app on an ephemeral port and drives it with
//! `tokio-tungstenite`, covering the scripted scenarios: solo join,
//! two-peer rendezvous, relay rewrite, seal by non-owner, seal-then-destroy,
//! and disconnect cleanup.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use lobby_relay::bus::Bus;
use lobby_relay::registry::Registry;
use lobby_relay::{handler, AppState};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Boots a fresh server with a short seal grace so destruction tests don't
/// need to wait the full 10 seconds.
async fn start_server(seal_grace: Duration) -> SocketAddr {
    let bus = Arc::new(Bus::new());
    let registry = Arc::new(Registry::new(bus.clone(), 1024, 4096, seal_grace));
    let state = Arc::new(AppState { registry, bus });

    async fn ws_upgrade(
        ws: WebSocketUpgrade,
        State(state): State<Arc<AppState>>,
    ) -> impl IntoResponse {
        ws.on_upgrade(move |socket| handler::handle_socket(socket, state))
    }

    let app = Router::new()
        .route("/socket/websocket", get(ws_upgrade))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr) -> WsStream {
    let url = format!("ws://{addr}/socket/websocket");
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

async fn send(ws: &mut WsStream, topic: &str, event: &str, payload: Value, msg_ref: Option<i64>) {
    let env = json!({ "topic": topic, "event": event, "payload": payload, "ref": msg_ref });
    ws.send(Message::Text(env.to_string())).await.unwrap();
}

async fn recv(ws: &mut WsStream) -> Value {
    match timeout(Duration::from_secs(2), ws.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

#[tokio::test]
async fn solo_join_gets_reply_then_id_and_no_broadcasts() {
    let addr = start_server(Duration::from_secs(10)).await;
    let mut a = connect(addr).await;

    send(&mut a, "lobby:room1", "phx_join", json!({"data": "room1"}), Some(1)).await;

    let reply = recv(&mut a).await;
    assert_eq!(reply["event"], "phx_reply");
    assert_eq!(reply["ref"], 1);
    assert_eq!(reply["payload"]["status"], "ok");
    assert_eq!(reply["payload"]["response"]["data"], "room1");
    assert_eq!(reply["payload"]["response"]["type"], 0);
    let user_id = reply["payload"]["response"]["id"].as_u64().unwrap();

    let id_push = recv(&mut a).await;
    assert_eq!(id_push["event"], "id");
    assert_eq!(id_push["payload"]["id"], user_id);
    assert_eq!(id_push["payload"]["type"], 1);

    assert!(timeout(Duration::from_millis(200), a.next()).await.is_err());
}

#[tokio::test]
async fn two_peer_rendezvous_exchanges_peer_connect() {
    let addr = start_server(Duration::from_secs(10)).await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;

    send(&mut a, "lobby:room1", "phx_join", json!({"data": "room1"}), Some(1)).await;
    let a_reply = recv(&mut a).await;
    let a_id = a_reply["payload"]["response"]["id"].as_u64().unwrap();
    let _ = recv(&mut a).await; // id push to self

    send(&mut b, "lobby:room1", "phx_join", json!({"data": "room1"}), Some(1)).await;
    let b_reply = recv(&mut b).await;
    let b_id = b_reply["payload"]["response"]["id"].as_u64().unwrap();

    let b_id_push = recv(&mut b).await;
    assert_eq!(b_id_push["event"], "id");

    let b_catchup = recv(&mut b).await;
    assert_eq!(b_catchup["event"], "peer_connect");
    assert_eq!(b_catchup["payload"]["id"], a_id);

    let a_peer_connect = recv(&mut a).await;
    assert_eq!(a_peer_connect["event"], "peer_connect");
    assert_eq!(a_peer_connect["payload"]["id"], b_id);
}

#[tokio::test]
async fn relay_rewrites_sender_id_and_targets_only_dest() {
    let addr = start_server(Duration::from_secs(10)).await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;

    send(&mut a, "lobby:room1", "phx_join", json!({"data": "room1"}), Some(1)).await;
    let a_reply = recv(&mut a).await;
    let a_id = a_reply["payload"]["response"]["id"].as_u64().unwrap();
    let _ = recv(&mut a).await;

    send(&mut b, "lobby:room1", "phx_join", json!({"data": "room1"}), Some(1)).await;
    let b_reply = recv(&mut b).await;
    let b_id = b_reply["payload"]["response"]["id"].as_u64().unwrap();
    let _ = recv(&mut b).await;
    let _ = recv(&mut b).await;
    let _ = recv(&mut a).await; // peer_connect about b

    send(&mut a, "lobby:room1", "offer", json!({"id": b_id, "data": "SDP_A"}), None).await;

    let offer = recv(&mut b).await;
    assert_eq!(offer["event"], "offer");
    assert_eq!(offer["payload"]["id"], a_id);
    assert_eq!(offer["payload"]["type"], 4);
    assert_eq!(offer["payload"]["data"], "SDP_A");

    assert!(timeout(Duration::from_millis(200), a.next()).await.is_err());
}

#[tokio::test]
async fn seal_by_non_owner_is_rejected() {
    let addr = start_server(Duration::from_secs(10)).await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;

    send(&mut a, "lobby:room1", "phx_join", json!({"data": "room1"}), Some(1)).await;
    let _ = recv(&mut a).await;
    let _ = recv(&mut a).await;

    send(&mut b, "lobby:room1", "phx_join", json!({"data": "room1"}), Some(1)).await;
    let _ = recv(&mut b).await;
    let _ = recv(&mut b).await;
    let _ = recv(&mut b).await;
    let _ = recv(&mut a).await;

    send(&mut b, "lobby:room1", "seal", json!({}), Some(2)).await;
    let reply = recv(&mut b).await;
    assert_eq!(reply["payload"]["status"], "error");
    assert_eq!(reply["payload"]["response"]["reason"], "not_authorized");
}

#[tokio::test]
async fn seal_then_destroy_rejects_join_until_grace_elapses() {
    let addr = start_server(Duration::from_millis(150)).await;
    let mut a = connect(addr).await;

    send(&mut a, "lobby:room1", "phx_join", json!({"data": "room1"}), Some(1)).await;
    let _ = recv(&mut a).await;
    let _ = recv(&mut a).await;

    send(&mut a, "lobby:room1", "seal", json!({}), Some(2)).await;
    let seal_reply = recv(&mut a).await;
    assert_eq!(seal_reply["payload"]["status"], "ok");
    let sealed_push = recv(&mut a).await;
    assert_eq!(sealed_push["event"], "sealed");

    let mut c = connect(addr).await;
    send(&mut c, "lobby:room1", "phx_join", json!({"data": "room1"}), Some(1)).await;
    let c_reply = recv(&mut c).await;
    assert_eq!(c_reply["payload"]["status"], "error");
    assert_eq!(c_reply["payload"]["response"]["reason"], "lobby_sealed");

    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut d = connect(addr).await;
    send(&mut d, "lobby:room1", "phx_join", json!({"data": "room1"}), Some(1)).await;
    let d_reply = recv(&mut d).await;
    assert_eq!(d_reply["payload"]["status"], "ok");
}

#[tokio::test]
async fn disconnect_broadcasts_peer_disconnect_and_updates_members() {
    let addr = start_server(Duration::from_secs(10)).await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;

    send(&mut a, "lobby:room1", "phx_join", json!({"data": "room1"}), Some(1)).await;
    let a_reply = recv(&mut a).await;
    let a_id = a_reply["payload"]["response"]["id"].as_u64().unwrap();
    let _ = recv(&mut a).await;

    send(&mut b, "lobby:room1", "phx_join", json!({"data": "room1"}), Some(1)).await;
    let _ = recv(&mut b).await;
    let _ = recv(&mut b).await;
    let _ = recv(&mut b).await;
    let _ = recv(&mut a).await;

    a.close(None).await.unwrap();

    let disconnect_push = recv(&mut b).await;
    assert_eq!(disconnect_push["event"], "peer_disconnect");
    assert_eq!(disconnect_push["payload"]["id"], a_id);
}
