//! Configuration system.
//!
//! Loads configuration from JSON strings/files (file IO left to app).

use serde::{Deserialize, Serialize};

/// Root configuration shared by client/server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    /// Server listen address, e.g. `127.0.0.1:41000`.
    pub server_addr: String,
    /// Room name the server hosts and clients display.
    #[serde(default = "default_room_name")]
    pub room_name: String,
    /// Player display name (client only).
    #[serde(default = "default_player_name")]
    pub player_name: String,
    /// Server broadcast cadence for position patches. Deliberately lower
    /// than the render rate so interpolation has work to do.
    #[serde(default = "default_patch_hz")]
    pub patch_hz: u32,
    /// Client render cadence.
    #[serde(default = "default_frame_hz")]
    pub frame_hz: u32,
    /// Fraction of the remaining distance an entity closes per frame.
    #[serde(default = "default_interp_alpha")]
    pub interp_alpha: f32,
}

fn default_room_name() -> String {
    "playground".to_string()
}

fn default_player_name() -> String {
    "Player".to_string()
}

fn default_patch_hz() -> u32 {
    20
}

fn default_frame_hz() -> u32 {
    60
}

fn default_interp_alpha() -> f32 {
    0.05
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:41000".to_string(),
            room_name: default_room_name(),
            player_name: default_player_name(),
            patch_hz: default_patch_hz(),
            frame_hz: default_frame_hz(),
            interp_alpha: default_interp_alpha(),
        }
    }
}

impl GameConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let cfg = GameConfig::from_json_str(r#"{"server_addr":"10.0.0.1:5000"}"#).unwrap();
        assert_eq!(cfg.server_addr, "10.0.0.1:5000");
        assert_eq!(cfg.room_name, "playground");
        assert_eq!(cfg.patch_hz, 20);
        assert_eq!(cfg.frame_hz, 60);
        assert!((cfg.interp_alpha - 0.05).abs() < f32::EPSILON);
    }
}
