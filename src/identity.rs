//! Peer Identity Source.
//!
//! Assigns a fresh `u32` `user_id` to each new transport connection.
//! Uniqueness is only required among currently-connected peers, so the
//! generator rerolls against the live connection directory — but the check
//! and the registration have to be one atomic step, or two connections can
//! both pass a "is this id free?" check for the same candidate before either
//! has registered. See `Bus::try_register`.

use crate::bus::{Bus, ClientSender};

/// Generates a `user_id` not currently held by any connected peer and
/// registers `sender` under it in the same atomic step, retrying on a fresh
/// candidate if another connection wins the race for this one.
///
/// `0` is reserved to mean "no peer" on the wire (see `WireMessage`), so it
/// is never handed out.
pub fn generate_user_id(bus: &Bus, sender: ClientSender) -> u32 {
    loop {
        let candidate: u32 = rand::random();
        if candidate != 0 && bus.try_register(candidate, sender.clone()) {
            return candidate;
        }
    }
}
