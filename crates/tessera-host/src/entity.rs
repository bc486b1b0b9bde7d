//! Simulated entities

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tessera::{Entity, EntityId, Location, TeleportCause, TeleportError};
use tracing::debug;

static NEXT_ENTITY_ID: AtomicU64 = AtomicU64::new(1);

/// An entity living in a reference host world
#[derive(Debug)]
pub struct SimEntity {
    id: EntityId,
    valid: AtomicBool,
    location: Mutex<Location>,
    /// When set, every teleport is rejected with this reason
    failure: Mutex<Option<String>>,
    teleports: AtomicUsize,
}

impl SimEntity {
    /// Spawn an entity at `location`
    pub fn spawn(location: Location) -> Arc<Self> {
        let id = EntityId(NEXT_ENTITY_ID.fetch_add(1, Ordering::Relaxed));
        debug!(entity = id.0, world = location.world.name(), "entity spawned");
        Arc::new(Self {
            id,
            valid: AtomicBool::new(true),
            location: Mutex::new(location),
            failure: Mutex::new(None),
            teleports: AtomicUsize::new(0),
        })
    }

    /// Remove the entity from its world. Irreversible.
    pub fn remove(&self) {
        if self.valid.swap(false, Ordering::AcqRel) {
            debug!(entity = self.id.0, "entity removed");
        }
    }

    /// Move the entity directly, as world simulation would
    pub fn set_location(&self, location: Location) {
        *self.location.lock() = location;
    }

    /// Reject every later teleport with `reason`
    pub fn fail_teleports(&self, reason: impl Into<String>) {
        *self.failure.lock() = Some(reason.into());
    }

    /// Accept teleports again
    pub fn allow_teleports(&self) {
        *self.failure.lock() = None;
    }

    /// Successful teleports so far
    pub fn teleport_count(&self) -> usize {
        self.teleports.load(Ordering::Acquire)
    }
}

impl Entity for SimEntity {
    fn id(&self) -> EntityId {
        self.id
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    fn location(&self) -> Location {
        self.location.lock().clone()
    }

    fn teleport(&self, location: &Location, cause: TeleportCause) -> Result<(), TeleportError> {
        if !self.is_valid() {
            return Err(TeleportError::EntityRemoved);
        }
        if let Some(reason) = self.failure.lock().clone() {
            return Err(TeleportError::Rejected(reason));
        }
        self.set_location(location.clone());
        self.teleports.fetch_add(1, Ordering::AcqRel);
        debug!(entity = self.id.0, ?cause, "entity teleported");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera::World;

    fn here() -> Location {
        Location::new(World::new("overworld"), 0.5, 64.0, 0.5)
    }

    #[test]
    fn test_spawn_assigns_unique_ids() {
        let a = SimEntity::spawn(here());
        let b = SimEntity::spawn(here());
        assert_ne!(a.id(), b.id());
        assert!(a.is_valid());
    }

    #[test]
    fn test_teleport_moves_entity() {
        let entity = SimEntity::spawn(here());
        let there = Location::new(World::new("overworld"), 100.0, 70.0, -5.0);
        entity.teleport(&there, TeleportCause::Command).unwrap();
        assert_eq!(entity.location(), there);
        assert_eq!(entity.teleport_count(), 1);
    }

    #[test]
    fn test_teleport_failures() {
        let entity = SimEntity::spawn(here());
        entity.fail_teleports("chunk not loaded");
        assert_eq!(
            entity.teleport(&here(), TeleportCause::Plugin),
            Err(TeleportError::Rejected("chunk not loaded".to_string()))
        );
        entity.allow_teleports();
        assert!(entity.teleport(&here(), TeleportCause::Plugin).is_ok());

        entity.remove();
        assert!(!entity.is_valid());
        assert_eq!(
            entity.teleport(&here(), TeleportCause::Plugin),
            Err(TeleportError::EntityRemoved)
        );
    }
}
