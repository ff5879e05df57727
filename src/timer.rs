//! Destruction Timer.
//!
//! One-shot, lobby-scoped: fires `SEAL_GRACE` after a successful SEAL.
//! Cancellation is implicit — if the lobby is gone by the time this fires
//! (e.g. it emptied early), `Registry::destroy` returns `lobby_not_found`
//! and is absorbed here without complaint.

use std::sync::Arc;

use tracing::debug;

use crate::registry::Registry;

/// Spawns the one-shot timer for a lobby that was just sealed.
pub fn schedule_destruction(registry: Arc<Registry>, name: String) {
    let grace = registry.seal_grace;
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        if registry.destroy(&name).is_err() {
            debug!(lobby = %name, "destruction timer fired for an already-gone lobby");
        }
    });
}
