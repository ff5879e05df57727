//! Lobby Registry.
//!
//! The single source of truth for lobby membership. All structural
//! mutations go through one `parking_lot::Mutex`-guarded map, the
//! "mutex over the registry map" realization the signaling design allows.
//! Fan-out broadcasts for join/leave/seal are performed while the lock is
//! held: Bus sends are non-blocking queue pushes, not network I/O, so this
//! keeps broadcasts to a given lobby topic in the same order as the
//! mutations that produced them without a separate serialization point.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::bus::Bus;
use crate::error::{RelayError, Result};
use crate::protocol::{topic_for, OutboundEnvelope, WireMessage, Opcode};

/// One rendezvous room. Cloned out to callers as an immutable snapshot;
/// the registry is the only writer.
#[derive(Debug, Clone)]
pub struct Lobby {
    pub name: String,
    pub owner: u32,
    pub peers: Vec<u32>,
    pub sealed: bool,
    pub destruction_deadline: Option<Instant>,
}

impl Lobby {
    fn new(name: String, owner: u32) -> Self {
        Self {
            name,
            owner,
            peers: vec![owner],
            sealed: false,
            destruction_deadline: None,
        }
    }
}

/// Result of a successful `join`: the resolved name (server-generated if
/// the caller asked for one) and the peers already present before this
/// peer was added, so the caller can emit catch-up `peer_connect` pushes.
pub struct JoinOutcome {
    pub resolved_name: String,
    pub existing_peers: Vec<u32>,
}

/// Result of a `seal` call, distinguishing a fresh seal (which schedules
/// destruction) from an idempotent no-op re-seal by the same owner.
#[derive(Debug, PartialEq, Eq)]
pub enum SealOutcome {
    Sealed,
    AlreadySealed,
}

struct RegistryState {
    lobbies: HashMap<String, Lobby>,
    peer_index: HashMap<u32, String>,
}

pub struct Registry {
    state: Mutex<RegistryState>,
    bus: Arc<Bus>,
    max_lobbies: usize,
    max_peers: usize,
    pub seal_grace: Duration,
}

impl Registry {
    pub fn new(bus: Arc<Bus>, max_lobbies: usize, max_peers: usize, seal_grace: Duration) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                lobbies: HashMap::new(),
                peer_index: HashMap::new(),
            }),
            bus,
            max_lobbies,
            max_peers,
            seal_grace,
        }
    }

    /// Adds `user_id` to the lobby named `name`, creating it if absent.
    /// Rejects a second JOIN from a peer already in a lobby (I3) rather
    /// than deduping, per the ordered-peers invariant.
    pub fn join(&self, name: String, user_id: u32) -> Result<JoinOutcome> {
        let mut state = self.state.lock();

        if state.peer_index.contains_key(&user_id) {
            return Err(RelayError::AlreadyJoined);
        }

        let existing_peers = match state.lobbies.get(&name) {
            None => {
                if state.lobbies.len() >= self.max_lobbies {
                    return Err(RelayError::MaxLobbiesReached);
                }
                Vec::new()
            }
            Some(lobby) => {
                if lobby.sealed {
                    return Err(RelayError::LobbySealed);
                }
                if lobby.peers.len() >= self.max_peers {
                    return Err(RelayError::MaxPeersReached);
                }
                lobby.peers.clone()
            }
        };

        let lobby = state
            .lobbies
            .entry(name.clone())
            .or_insert_with(|| Lobby::new(name.clone(), user_id));
        if lobby.owner != user_id {
            lobby.peers.push(user_id);
        }
        state.peer_index.insert(user_id, name.clone());

        let peers_after = state.lobbies.get(&name).unwrap().peers.clone();
        let push = OutboundEnvelope::push(
            topic_for(&name),
            "peer_connect",
            serde_json::to_value(WireMessage::new(user_id, Opcode::PeerConnect, "")).unwrap(),
        );
        self.bus.broadcast_from(&peers_after, user_id, &push);

        info!(lobby = %name, user_id, "peer joined");
        Ok(JoinOutcome {
            resolved_name: name,
            existing_peers,
        })
    }

    /// Removes `user_id` from its lobby (no-op if not a member) and
    /// broadcasts `peer_disconnect` to the rest. Destroys the lobby if it
    /// becomes empty, bounding memory for lobbies nobody sealed.
    pub fn leave(&self, name: &str, user_id: u32) -> Result<()> {
        let mut state = self.state.lock();

        let Some(lobby) = state.lobbies.get_mut(name) else {
            return Err(RelayError::LobbyNotFound);
        };
        let before = lobby.peers.len();
        lobby.peers.retain(|&p| p != user_id);
        if lobby.peers.len() == before {
            return Ok(());
        }
        state.peer_index.remove(&user_id);

        let remaining = lobby.peers.clone();
        let empty = remaining.is_empty();

        let push = OutboundEnvelope::push(
            topic_for(name),
            "peer_disconnect",
            serde_json::to_value(WireMessage::new(user_id, Opcode::PeerDisconnect, "")).unwrap(),
        );
        self.bus.broadcast(&remaining, &push);

        if empty {
            state.lobbies.remove(name);
            debug!(lobby = %name, "lobby emptied, destroyed opportunistically");
        }
        info!(lobby = %name, user_id, "peer left");
        Ok(())
    }

    /// Seals a lobby. Only the owner may do so; re-sealing by the owner is
    /// an idempotent no-op with no second broadcast.
    pub fn seal(&self, name: &str, user_id: u32) -> Result<SealOutcome> {
        let mut state = self.state.lock();

        let Some(lobby) = state.lobbies.get_mut(name) else {
            return Err(RelayError::LobbyNotFound);
        };
        if lobby.owner != user_id {
            return Err(RelayError::NotAuthorized);
        }
        if lobby.sealed {
            return Ok(SealOutcome::AlreadySealed);
        }

        lobby.sealed = true;
        lobby.destruction_deadline = Some(Instant::now() + self.seal_grace);
        let peers = lobby.peers.clone();

        let push = OutboundEnvelope::push(
            topic_for(name),
            "sealed",
            serde_json::to_value(WireMessage::new(user_id, Opcode::Seal, "")).unwrap(),
        );
        self.bus.broadcast(&peers, &push);

        info!(lobby = %name, owner = user_id, "lobby sealed");
        Ok(SealOutcome::Sealed)
    }

    /// Unconditionally removes a lobby. Called by the destruction timer and
    /// the defense-in-depth sweep; a missing lobby (already destroyed, e.g.
    /// by emptying) is absorbed by the caller, not an error it must act on.
    pub fn destroy(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        let Some(lobby) = state.lobbies.remove(name) else {
            return Err(RelayError::LobbyNotFound);
        };
        for peer in &lobby.peers {
            state.peer_index.remove(peer);
        }
        info!(lobby = %name, "lobby destroyed");
        Ok(())
    }

    pub fn members(&self, name: &str) -> Result<Vec<u32>> {
        let state = self.state.lock();
        state
            .lobbies
            .get(name)
            .map(|l| l.peers.clone())
            .ok_or(RelayError::LobbyNotFound)
    }

    pub fn is_member(&self, name: &str, user_id: u32) -> bool {
        let state = self.state.lock();
        state
            .lobbies
            .get(name)
            .is_some_and(|l| l.peers.contains(&user_id))
    }

    pub fn lookup_lobby_of(&self, user_id: u32) -> Option<String> {
        self.state.lock().peer_index.get(&user_id).cloned()
    }

    /// Destroys every sealed lobby whose deadline has passed. A safety net
    /// for the one-shot timer; returns the names destroyed, for logging.
    pub fn sweep_expired(&self) -> Vec<String> {
        let now = Instant::now();
        let expired: Vec<String> = {
            let state = self.state.lock();
            state
                .lobbies
                .values()
                .filter(|l| l.sealed && l.destruction_deadline.is_some_and(|d| d <= now))
                .map(|l| l.name.clone())
                .collect()
        };
        for name in &expired {
            if self.destroy(name).is_ok() {
                warn!(lobby = %name, "destroyed by defense-in-depth sweep, timer missed its wakeup");
            }
        }
        expired
    }

    pub fn lobby_count(&self) -> usize {
        self.state.lock().lobbies.len()
    }

    pub fn sealed_count(&self) -> usize {
        self.state.lock().lobbies.values().filter(|l| l.sealed).count()
    }
}
