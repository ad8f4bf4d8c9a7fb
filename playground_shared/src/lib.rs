//! `playground_shared`
//!
//! Shared libraries used by both client and server.
//!
//! Design goals:
//! - Deterministic and modular where practical.
//! - Clear separation of concerns (net, scene, math, config, console).
//! - Traits at the engine boundary for dependency injection.
//! - No `unsafe`.

pub mod config;
pub mod console;
pub mod math;
pub mod net;
pub mod scene;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::scene::*;
}
