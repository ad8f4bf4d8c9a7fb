//! `playground_client`
//!
//! Client-side systems:
//! - Connection management (reliable + unreliable channels)
//! - Entity registry for everyone in the room
//! - Interpolation scheduler for smooth remote motion
//! - Move-intent input
//! - Console wiring

pub mod client;
pub mod input;
pub mod interp;
pub mod registry;

pub use client::GameClient;
