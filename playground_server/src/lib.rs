//! `playground_server`
//!
//! Server-side systems:
//! - Room hosting with session handshake and replay
//! - Authoritative player positions
//! - Receives `MoveTo` intents
//! - Broadcasts `EntityChanged` patches
//!
//! Networking model:
//! - TCP: handshake/lifecycle plane (joins, leaves, teardown)
//! - UDP: position plane (move intents, patches)

pub mod server;

pub use server::RoomServer;
