//! Connection Handler.
//!
//! Owns one WebSocket session end to end: identity assignment, the
//! Connected/InLobby/Sealing state machine (derived fresh from the
//! Registry on every frame, never cached), and cleanup on close. A
//! connection holds no `current_lobby` field of its own — see
//! `DESIGN.md` for why that statelessness is what makes destruction
//! "forget" the lobby for free.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::unbounded_channel;
use tracing::{debug, info, warn};

use crate::bus::Bus;
use crate::identity::generate_user_id;
use crate::protocol::{
    name_from_topic, topic_for, InboundEnvelope, JoinPayload, Opcode, OutboundEnvelope,
    RelayPayload, SealPayload, WireMessage,
};
use crate::registry::{Registry, SealOutcome};
use crate::timer::schedule_destruction;

pub struct AppState {
    pub registry: Arc<Registry>,
    pub bus: Arc<Bus>,
}

/// Drives one WebSocket connection until it closes.
pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = unbounded_channel::<String>();
    let user_id = generate_user_id(&state.bus, tx);
    info!(user_id, "connection established");

    let mut writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(reply) = dispatch(&text, user_id, &state) {
                            if let Some(reply) = reply {
                                state.bus.send_to(user_id, &reply);
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ping/pong/binary: transport concern, ignored
                    Some(Err(e)) => {
                        warn!(user_id, error = %e, "transport error, closing");
                        break;
                    }
                }
            }
            _ = &mut writer => break,
        }
    }

    cleanup(user_id, &state).await;
    writer.abort();
}

/// Parses and dispatches one inbound frame. Returns `Ok(())` on frames that
/// need no reply (relays, pure pushes), or `Err(Some(reply))` with a scoped
/// error envelope, or `Err(None)` when the frame is too malformed to even
/// address a reply to (no parseable topic/ref).
fn dispatch(text: &str, user_id: u32, state: &AppState) -> Result<(), Option<OutboundEnvelope>> {
    let envelope: InboundEnvelope = match serde_json::from_str(text) {
        Ok(e) => e,
        Err(_) => return Err(None),
    };

    let topic = envelope.topic.clone();
    let msg_ref = envelope.msg_ref;
    let current_lobby = state.registry.lookup_lobby_of(user_id);

    match envelope.event.as_str() {
        "phx_join" => handle_join(envelope, user_id, state, current_lobby),
        "offer" => handle_relay(envelope, user_id, state, current_lobby, Opcode::Offer, "offer"),
        "answer" => handle_relay(envelope, user_id, state, current_lobby, Opcode::Answer, "answer"),
        "candidate" => {
            handle_relay(envelope, user_id, state, current_lobby, Opcode::Candidate, "candidate")
        }
        "seal" => handle_seal(envelope, user_id, state, current_lobby),
        "peer_connect" | "peer_disconnect" => {
            Err(Some(OutboundEnvelope::reply_error(topic, msg_ref, "bad_request")))
        }
        _ => Err(Some(OutboundEnvelope::reply_error(topic, msg_ref, "bad_request"))),
    }
}

fn handle_join(
    envelope: InboundEnvelope,
    user_id: u32,
    state: &AppState,
    current_lobby: Option<String>,
) -> Result<(), Option<OutboundEnvelope>> {
    let topic = envelope.topic.clone();
    let msg_ref = envelope.msg_ref;

    if current_lobby.is_some() {
        return Err(Some(OutboundEnvelope::reply_error(topic, msg_ref, "already_joined")));
    }

    let payload: JoinPayload = match serde_json::from_value(envelope.payload) {
        Ok(p) => p,
        Err(_) => return Err(Some(OutboundEnvelope::reply_error(topic, msg_ref, "bad_request"))),
    };
    let requested = if payload.data.is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        payload.data
    };

    match state.registry.join(requested, user_id) {
        Ok(outcome) => {
            let resolved_topic = topic_for(&outcome.resolved_name);

            let reply = OutboundEnvelope::reply_ok(
                resolved_topic.clone(),
                msg_ref,
                serde_json::to_value(WireMessage::new(user_id, Opcode::Join, &outcome.resolved_name))
                    .unwrap(),
            );
            state.bus.send_to(user_id, &reply);

            let id_push = OutboundEnvelope::push(
                resolved_topic.clone(),
                "id",
                serde_json::to_value(WireMessage::new(user_id, Opcode::Id, "")).unwrap(),
            );
            state.bus.send_to(user_id, &id_push);

            for peer in outcome.existing_peers {
                let catchup = OutboundEnvelope::push(
                    resolved_topic.clone(),
                    "peer_connect",
                    serde_json::to_value(WireMessage::new(peer, Opcode::PeerConnect, "")).unwrap(),
                );
                state.bus.send_to(user_id, &catchup);
            }
            Ok(())
        }
        Err(e) => Err(Some(OutboundEnvelope::reply_error(topic, msg_ref, e.reason()))),
    }
}

fn handle_relay(
    envelope: InboundEnvelope,
    user_id: u32,
    state: &AppState,
    current_lobby: Option<String>,
    opcode: Opcode,
    event_name: &str,
) -> Result<(), Option<OutboundEnvelope>> {
    let topic = envelope.topic.clone();
    let msg_ref = envelope.msg_ref;

    let Some(lobby_name) = current_lobby else {
        return Err(Some(OutboundEnvelope::reply_error(topic, msg_ref, "not_joined")));
    };
    if name_from_topic(&topic) != Some(lobby_name.as_str()) {
        return Err(Some(OutboundEnvelope::reply_error(topic, msg_ref, "bad_request")));
    }

    let payload: RelayPayload = match serde_json::from_value(envelope.payload) {
        Ok(p) => p,
        Err(_) => return Err(Some(OutboundEnvelope::reply_error(topic, msg_ref, "bad_request"))),
    };

    if state.registry.is_member(&lobby_name, payload.id) {
        let push = OutboundEnvelope::push(
            topic,
            event_name,
            serde_json::to_value(WireMessage::new(user_id, opcode, payload.data)).unwrap(),
        );
        state.bus.send_to(payload.id, &push);
    } else {
        debug!(user_id, dest = payload.id, "relay target not present, dropped silently");
    }
    Ok(())
}

fn handle_seal(
    envelope: InboundEnvelope,
    user_id: u32,
    state: &AppState,
    current_lobby: Option<String>,
) -> Result<(), Option<OutboundEnvelope>> {
    let topic = envelope.topic.clone();
    let msg_ref = envelope.msg_ref;

    let Some(lobby_name) = current_lobby else {
        return Err(Some(OutboundEnvelope::reply_error(topic, msg_ref, "not_joined")));
    };
    if serde_json::from_value::<SealPayload>(envelope.payload).is_err() {
        return Err(Some(OutboundEnvelope::reply_error(topic, msg_ref, "bad_request")));
    }

    match state.registry.seal(&lobby_name, user_id) {
        Ok(SealOutcome::Sealed) => {
            schedule_destruction(state.registry.clone(), lobby_name);
            state.bus.send_to(user_id, &OutboundEnvelope::reply_ok(topic, msg_ref, serde_json::json!({})));
            Ok(())
        }
        Ok(SealOutcome::AlreadySealed) => {
            state.bus.send_to(user_id, &OutboundEnvelope::reply_ok(topic, msg_ref, serde_json::json!({})));
            Ok(())
        }
        Err(e) => Err(Some(OutboundEnvelope::reply_error(topic, msg_ref, e.reason()))),
    }
}

async fn cleanup(user_id: u32, state: &AppState) {
    if let Some(lobby) = state.registry.lookup_lobby_of(user_id) {
        let _ = state.registry.leave(&lobby, user_id);
    }
    state.bus.unregister(user_id);
    info!(user_id, "connection closed, cleaned up");
}
