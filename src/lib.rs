//! Signaling protocol engine for named WebRTC lobbies.
//!
//! The binary (`main.rs`) is thin: it parses configuration, wires up the
//! axum router, and spawns the defense-in-depth sweep. Everything that
//! matters — capacity invariants, the connection state machine, relay
//! identity rewriting, sealing and destruction — lives in this library.

pub mod bus;
pub mod error;
pub mod handler;
pub mod identity;
pub mod protocol;
pub mod registry;
pub mod timer;

pub use handler::AppState;
pub use registry::Registry;
