//! Scene abstraction.
//!
//! This crate intentionally does not depend on a graphics backend.
//! The client core needs exactly three operations from whatever engine
//! renders the world: create a visual for an entity, move it, destroy it.
//! Everything else (meshes, materials, lighting, cameras) belongs to the
//! backend implementation and never crosses this boundary.

use std::collections::HashMap;

use tracing::debug;

use crate::math::Vec3;

/// Side length of the square ground plane.
pub const GROUND_SIZE: f32 = 500.0;
/// Height at which entities sit on the ground.
pub const GROUND_Y: f32 = -1.0;
/// Movement targets are clamped to +/- this on the x/z axes, slightly
/// inside the ground edge.
pub const PLAYFIELD_CLAMP: f32 = 245.0;

/// Clamps a movement target onto the playfield: x/z pulled inside the
/// clamp bounds, y pinned to the ground. Both the client (before sending
/// an intent) and the server (before accepting one) apply this.
pub fn clamp_to_playfield(p: Vec3) -> Vec3 {
    Vec3::new(
        p.x.clamp(-PLAYFIELD_CLAMP, PLAYFIELD_CLAMP),
        GROUND_Y,
        p.z.clamp(-PLAYFIELD_CLAMP, PLAYFIELD_CLAMP),
    )
}

/// Opaque handle to a renderable object owned by the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SceneHandle(pub u64);

/// The minimal rendering API the client core consumes.
///
/// Implementations must treat a write to a disposed handle as a no-op:
/// an entity can leave between the frame snapshot and the transform write,
/// and that frame's write is simply skipped.
pub trait SceneBackend: Send + Sync {
    /// Creates a renderable at `initial` and returns its handle.
    fn create_handle(&mut self, initial: Vec3) -> SceneHandle;

    /// Destroys the renderable. Unknown handles are ignored.
    fn dispose_handle(&mut self, handle: SceneHandle);

    /// Moves the renderable. Disposed/unknown handles are ignored.
    fn set_handle_position(&mut self, handle: SceneHandle, position: Vec3);
}

/// A no-op scene useful for smoke tests. Allocates handles but renders
/// nothing and remembers nothing.
#[derive(Default)]
pub struct NullScene {
    next_id: u64,
}

impl SceneBackend for NullScene {
    fn create_handle(&mut self, _initial: Vec3) -> SceneHandle {
        let h = SceneHandle(self.next_id);
        self.next_id += 1;
        h
    }

    fn dispose_handle(&mut self, _handle: SceneHandle) {}

    fn set_handle_position(&mut self, _handle: SceneHandle, _position: Vec3) {}
}

/// A headless scene that tracks live handles and their last written
/// positions. Default backend for the terminal client and the test double
/// for registry/scheduler tests.
#[derive(Default)]
pub struct HeadlessScene {
    next_id: u64,
    positions: HashMap<SceneHandle, Vec3>,
    skipped_writes: u64,
}

impl HeadlessScene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently live handles.
    pub fn live_count(&self) -> usize {
        self.positions.len()
    }

    pub fn is_live(&self, handle: SceneHandle) -> bool {
        self.positions.contains_key(&handle)
    }

    /// Last position written for a live handle.
    pub fn position_of(&self, handle: SceneHandle) -> Option<Vec3> {
        self.positions.get(&handle).copied()
    }

    /// How many writes were dropped because the handle was gone.
    pub fn skipped_writes(&self) -> u64 {
        self.skipped_writes
    }
}

impl SceneBackend for HeadlessScene {
    fn create_handle(&mut self, initial: Vec3) -> SceneHandle {
        let h = SceneHandle(self.next_id);
        self.next_id += 1;
        self.positions.insert(h, initial);
        h
    }

    fn dispose_handle(&mut self, handle: SceneHandle) {
        self.positions.remove(&handle);
    }

    fn set_handle_position(&mut self, handle: SceneHandle, position: Vec3) {
        match self.positions.get_mut(&handle) {
            Some(slot) => *slot = position,
            None => {
                debug!(?handle, "Write to disposed handle skipped");
                self.skipped_writes += 1;
            }
        }
    }
}
