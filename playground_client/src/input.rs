//! Move-intent input.
//!
//! In the full game this is a pointer pick against the ground plane. The
//! headless client produces the same intent from the console (`move`),
//! so everything downstream of the pick is identical.

use playground_shared::{
    math::Vec3,
    net::{RoomMsg, SessionId},
    scene::clamp_to_playfield,
};

/// Turns a picked world point into the wire intent for this session.
///
/// The point is clamped onto the playfield first, so a wild pick near the
/// horizon still lands inside the ground bounds.
pub fn build_move(session_id: SessionId, picked: Vec3) -> RoomMsg {
    RoomMsg::MoveTo {
        session_id,
        position: clamp_to_playfield(picked),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playground_shared::scene::{GROUND_Y, PLAYFIELD_CLAMP};

    #[test]
    fn build_move_clamps_the_pick() {
        let msg = build_move(SessionId::from("aaaaaaaaa"), Vec3::new(9000.0, 25.0, -3.0));
        match msg {
            RoomMsg::MoveTo { position, .. } => {
                assert_eq!(position, Vec3::new(PLAYFIELD_CLAMP, GROUND_Y, -3.0));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
