//! Broadcast Bus.
//!
//! A process-wide directory of connected peers plus the fan-out primitives
//! used by the Lobby Registry. There is no per-topic subscriber map: lobby
//! membership already lives in the Registry's `Lobby.peers`, so "publish to
//! topic" is just "send to this list of user_ids". Delivery is at-most-once
//! and non-blocking — a full or closed peer queue is skipped, never
//! awaited, so one slow subscriber can never stall another.

use dashmap::DashMap;
use tokio::sync::mpsc::UnboundedSender;

use crate::protocol::OutboundEnvelope;

/// Per-connection outbound queue. The handler's write task drains this and
/// serializes each envelope onto the WebSocket.
pub type ClientSender = UnboundedSender<String>;

/// The live `user_id -> outbound queue` directory.
pub struct Bus {
    peers: DashMap<u32, ClientSender>,
}

impl Bus {
    pub fn new() -> Self {
        Self {
            peers: DashMap::new(),
        }
    }

    /// Registers `user_id` iff it isn't already present. Returns `false`
    /// without touching the map if the slot is taken, so a caller generating
    /// candidate ids can retry on a fresh one instead of clobbering a peer
    /// that just won the race — `DashMap::entry` holds the shard lock across
    /// the check-and-insert, unlike a separate `contains_key` + `insert` pair.
    pub fn try_register(&self, user_id: u32, sender: ClientSender) -> bool {
        match self.peers.entry(user_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(sender);
                true
            }
        }
    }

    pub fn unregister(&self, user_id: u32) {
        self.peers.remove(&user_id);
    }

    pub fn connected_count(&self) -> usize {
        self.peers.len()
    }

    /// Sends one envelope to a single peer. Returns `false` if the peer is
    /// unknown or its queue is gone (transport already closing); this is
    /// not an error to the caller, matching the relay's "drop silently"
    /// semantics for a vanished destination peer.
    pub fn send_to(&self, user_id: u32, env: &OutboundEnvelope) -> bool {
        let Some(sender) = self.peers.get(&user_id) else {
            return false;
        };
        let Ok(text) = serde_json::to_string(env) else {
            return false;
        };
        sender.send(text).is_ok()
    }

    /// Delivers `env` to every peer in `recipients`, in order. Used while
    /// the Registry's lock is held so that broadcasts to a single topic are
    /// observed by every subscriber in publication order.
    pub fn broadcast(&self, recipients: &[u32], env: &OutboundEnvelope) {
        for &peer in recipients {
            self.send_to(peer, env);
        }
    }

    /// As [`Bus::broadcast`], excluding `except`.
    pub fn broadcast_from(&self, recipients: &[u32], except: u32, env: &OutboundEnvelope) {
        for &peer in recipients {
            if peer != except {
                self.send_to(peer, env);
            }
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}
