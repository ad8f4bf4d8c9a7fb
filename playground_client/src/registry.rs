//! Entity registry.
//!
//! Tracks every remote player currently in the room. Each live session id
//! owns exactly one renderable in the scene plus a pair of positions: the
//! position we are drawing this frame and the latest position the server
//! reported. Room notifications mutate the map; the interpolation
//! scheduler walks it once per frame and closes the gap between the two.

use std::collections::HashMap;

use playground_shared::{
    math::Vec3,
    net::SessionId,
    scene::{SceneBackend, SceneHandle},
};

/// Visual state of one remote player.
#[derive(Debug, Clone, Copy)]
pub struct RemoteEntity {
    /// Renderable owned by the scene backend.
    pub handle: SceneHandle,
    /// Position drawn this frame. Only the scheduler writes this.
    pub current: Vec3,
    /// Latest server-reported position. Only the registry writes this.
    pub target: Vec3,
}

impl RemoteEntity {
    /// Distance still to cover before the entity visually settles.
    pub fn remaining_distance(&self) -> f32 {
        self.current.distance(self.target)
    }
}

/// Non-fatal registry faults. Callers decide how loudly to report them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// A join arrived for an id that is already live. The existing entity
    /// is kept untouched.
    DuplicateEntity,
    /// A position update arrived for an id that is not live. Normal when
    /// a removal overtakes in-flight datagrams.
    UnknownEntity,
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::DuplicateEntity => write!(f, "entity already registered"),
            RegistryError::UnknownEntity => write!(f, "entity not registered"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Live entity map keyed by session id.
#[derive(Default)]
pub struct EntityRegistry {
    entities: HashMap<SessionId, RemoteEntity>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a joining session and creates its renderable.
    ///
    /// Both positions start at `initial`, so the entity appears in place
    /// and stands still instead of sliding in from somewhere else. A
    /// duplicate id leaves the existing entity untouched and reports
    /// [`RegistryError::DuplicateEntity`]; no second renderable is created.
    pub fn on_entity_join(
        &mut self,
        scene: &mut dyn SceneBackend,
        id: SessionId,
        initial: Vec3,
    ) -> Result<(), RegistryError> {
        if self.entities.contains_key(&id) {
            return Err(RegistryError::DuplicateEntity);
        }
        let handle = scene.create_handle(initial);
        self.entities.insert(
            id,
            RemoteEntity {
                handle,
                current: initial,
                target: initial,
            },
        );
        Ok(())
    }

    /// Retargets a live session. The drawn position is left alone; the
    /// scheduler closes the gap over the following frames.
    pub fn on_entity_change(&mut self, id: &SessionId, target: Vec3) -> Result<(), RegistryError> {
        match self.entities.get_mut(id) {
            Some(entity) => {
                entity.target = target;
                Ok(())
            }
            None => Err(RegistryError::UnknownEntity),
        }
    }

    /// Unregisters a session and disposes its renderable. Unknown ids are
    /// a no-op: removals can race position datagrams, and a repeated leave
    /// must not fail.
    pub fn on_entity_leave(&mut self, scene: &mut dyn SceneBackend, id: &SessionId) {
        if let Some(entity) = self.entities.remove(id) {
            scene.dispose_handle(entity.handle);
        }
    }

    /// Visits every live `(id, entity)` pair.
    pub fn for_each_live_entity<F>(&self, mut visit: F)
    where
        F: FnMut(&SessionId, &RemoteEntity),
    {
        for (id, entity) in &self.entities {
            visit(id, entity);
        }
    }

    /// Mutable walk for the scheduler's per-frame pass.
    pub(crate) fn entities_mut(
        &mut self,
    ) -> impl Iterator<Item = (&SessionId, &mut RemoteEntity)> {
        self.entities.iter_mut()
    }

    pub fn get(&self, id: &SessionId) -> Option<&RemoteEntity> {
        self.entities.get(id)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.entities.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Disposes every renderable and clears the map. Session teardown.
    pub fn dispose_all(&mut self, scene: &mut dyn SceneBackend) {
        for (_, entity) in self.entities.drain() {
            scene.dispose_handle(entity.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playground_shared::scene::HeadlessScene;

    fn sid(s: &str) -> SessionId {
        SessionId::from(s)
    }

    #[test]
    fn join_registers_at_rest() {
        let mut scene = HeadlessScene::new();
        let mut registry = EntityRegistry::new();

        let spawn = Vec3::new(42.0, -1.0, -17.0);
        registry
            .on_entity_join(&mut scene, sid("aaaaaaaaa"), spawn)
            .unwrap();

        let entity = registry.get(&sid("aaaaaaaaa")).unwrap();
        assert_eq!(entity.current, spawn);
        assert_eq!(entity.target, spawn);
        assert_eq!(entity.remaining_distance(), 0.0);
        assert_eq!(scene.position_of(entity.handle), Some(spawn));
    }

    #[test]
    fn duplicate_join_keeps_first_entity() {
        let mut scene = HeadlessScene::new();
        let mut registry = EntityRegistry::new();

        let first = Vec3::new(1.0, -1.0, 1.0);
        registry
            .on_entity_join(&mut scene, sid("aaaaaaaaa"), first)
            .unwrap();
        let err = registry
            .on_entity_join(&mut scene, sid("aaaaaaaaa"), Vec3::new(9.0, -1.0, 9.0))
            .unwrap_err();

        assert_eq!(err, RegistryError::DuplicateEntity);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&sid("aaaaaaaaa")).unwrap().current, first);
        assert_eq!(scene.live_count(), 1);
    }

    #[test]
    fn change_moves_target_only() {
        let mut scene = HeadlessScene::new();
        let mut registry = EntityRegistry::new();

        registry
            .on_entity_join(&mut scene, sid("aaaaaaaaa"), Vec3::ZERO)
            .unwrap();
        registry
            .on_entity_change(&sid("aaaaaaaaa"), Vec3::new(100.0, -1.0, 0.0))
            .unwrap();

        let entity = registry.get(&sid("aaaaaaaaa")).unwrap();
        assert_eq!(entity.current, Vec3::ZERO);
        assert_eq!(entity.target, Vec3::new(100.0, -1.0, 0.0));
    }

    #[test]
    fn change_after_leave_reports_unknown() {
        let mut scene = HeadlessScene::new();
        let mut registry = EntityRegistry::new();

        registry
            .on_entity_join(&mut scene, sid("aaaaaaaaa"), Vec3::ZERO)
            .unwrap();
        registry.on_entity_leave(&mut scene, &sid("aaaaaaaaa"));

        let err = registry
            .on_entity_change(&sid("aaaaaaaaa"), Vec3::new(5.0, -1.0, 5.0))
            .unwrap_err();
        assert_eq!(err, RegistryError::UnknownEntity);
        // The straggler must not resurrect the entity.
        assert!(registry.is_empty());
        assert_eq!(scene.live_count(), 0);
    }

    #[test]
    fn leave_is_idempotent_and_disposes() {
        let mut scene = HeadlessScene::new();
        let mut registry = EntityRegistry::new();

        registry
            .on_entity_join(&mut scene, sid("aaaaaaaaa"), Vec3::ZERO)
            .unwrap();
        let handle = registry.get(&sid("aaaaaaaaa")).unwrap().handle;

        registry.on_entity_leave(&mut scene, &sid("aaaaaaaaa"));
        assert!(!scene.is_live(handle));

        // Second leave and a leave for a never-seen id are both no-ops.
        registry.on_entity_leave(&mut scene, &sid("aaaaaaaaa"));
        registry.on_entity_leave(&mut scene, &sid("bbbbbbbbb"));
        assert!(registry.is_empty());
    }

    #[test]
    fn id_can_be_reused_after_leave() {
        let mut scene = HeadlessScene::new();
        let mut registry = EntityRegistry::new();

        registry
            .on_entity_join(&mut scene, sid("aaaaaaaaa"), Vec3::ZERO)
            .unwrap();
        registry.on_entity_leave(&mut scene, &sid("aaaaaaaaa"));

        let respawn = Vec3::new(7.0, -1.0, 7.0);
        registry
            .on_entity_join(&mut scene, sid("aaaaaaaaa"), respawn)
            .unwrap();
        assert_eq!(registry.get(&sid("aaaaaaaaa")).unwrap().current, respawn);
        assert_eq!(scene.live_count(), 1);
    }

    #[test]
    fn dispose_all_clears_scene_and_map() {
        let mut scene = HeadlessScene::new();
        let mut registry = EntityRegistry::new();

        registry
            .on_entity_join(&mut scene, sid("aaaaaaaaa"), Vec3::ZERO)
            .unwrap();
        registry
            .on_entity_join(&mut scene, sid("bbbbbbbbb"), Vec3::new(3.0, -1.0, 3.0))
            .unwrap();

        registry.dispose_all(&mut scene);
        assert!(registry.is_empty());
        assert_eq!(scene.live_count(), 0);
    }

    #[test]
    fn for_each_visits_every_live_entity() {
        let mut scene = HeadlessScene::new();
        let mut registry = EntityRegistry::new();

        registry
            .on_entity_join(&mut scene, sid("aaaaaaaaa"), Vec3::ZERO)
            .unwrap();
        registry
            .on_entity_join(&mut scene, sid("bbbbbbbbb"), Vec3::ZERO)
            .unwrap();

        let mut seen = Vec::new();
        registry.for_each_live_entity(|id, _| seen.push(id.clone()));
        seen.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        assert_eq!(seen, vec![sid("aaaaaaaaa"), sid("bbbbbbbbb")]);
    }
}
