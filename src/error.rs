//! Protocol error taxonomy.
//!
//! Every failure the signaling engine can surface to a client is a variant
//! of [`RelayError`]. Each carries a stable wire symbol via [`RelayError::reason`]
//! so handlers never hand-write reason strings.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

/// A protocol-level failure. Never closes the connection — the handler
/// turns it into a scoped error reply.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayError {
    /// Malformed frame: missing/extra field, wrong type, non-integer id.
    #[error("malformed request")]
    BadRequest,

    /// Relay/seal attempted before a successful JOIN.
    #[error("must join a lobby first")]
    NotJoined,

    /// SEAL/relay/members against a lobby that no longer exists.
    #[error("lobby not found")]
    LobbyNotFound,

    /// JOIN into a lobby whose sealed flag is set.
    #[error("lobby is sealed")]
    LobbySealed,

    /// Lobby already has MAX_PEERS members.
    #[error("lobby has reached its peer limit")]
    MaxPeersReached,

    /// Registry already holds MAX_LOBBIES lobbies.
    #[error("registry has reached its lobby limit")]
    MaxLobbiesReached,

    /// SEAL attempted by a non-owner.
    #[error("only the lobby owner may do this")]
    NotAuthorized,

    /// A second JOIN from a connection already in a (different) lobby.
    #[error("already joined a lobby")]
    AlreadyJoined,
}

impl RelayError {
    /// The stable snake_case symbol sent on the wire.
    pub fn reason(&self) -> &'static str {
        match self {
            RelayError::BadRequest => "bad_request",
            RelayError::NotJoined => "not_joined",
            RelayError::LobbyNotFound => "lobby_not_found",
            RelayError::LobbySealed => "lobby_sealed",
            RelayError::MaxPeersReached => "max_peers_reached",
            RelayError::MaxLobbiesReached => "max_lobbies_reached",
            RelayError::NotAuthorized => "not_authorized",
            RelayError::AlreadyJoined => "already_joined",
        }
    }
}
