use std::sync::atomic::{AtomicI32, Ordering};

use hecs::Entity;

use crate::collision::ColliderId;
use crate::dynamics::{BodyDesc, BodyHandle};

/// Handle value of a body that is not (or no longer) in the live world.
const UNREGISTERED: i32 = -1;

/// Shared record of one rigid body attached to an entity.
///
/// The handle is written only by the simulation while it holds its write
/// lock, and cleared before the engine-side removal runs, so a reader never
/// resolves a handle to a body that is being destroyed.
#[derive(Debug)]
pub struct BodyRegistration {
    id: u64,
    entity: Entity,
    desc: BodyDesc,
    contact_capacity: usize,
    handle: AtomicI32,
}

impl BodyRegistration {
    pub(crate) fn new(id: u64, entity: Entity, desc: BodyDesc, contact_capacity: usize) -> Self {
        Self {
            id,
            entity,
            desc,
            contact_capacity,
            handle: AtomicI32::new(UNREGISTERED),
        }
    }

    pub fn entity(&self) -> Entity {
        self.entity
    }

    /// Description the body was created from.
    pub fn desc(&self) -> &BodyDesc {
        &self.desc
    }

    /// Zero when contact collection is off.
    pub fn contact_capacity(&self) -> usize {
        self.contact_capacity
    }

    /// Engine handle while the body is live.
    pub fn handle(&self) -> Option<BodyHandle> {
        let raw = self.handle.load(Ordering::Acquire);
        (raw >= 0).then(|| ColliderId(raw as u32))
    }

    pub fn is_registered(&self) -> bool {
        self.handle().is_some()
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn set_handle(&self, handle: BodyHandle) {
        self.handle.store(handle.0 as i32, Ordering::Release);
    }

    /// Clears the handle, returning the previous one.
    pub(crate) fn take_handle(&self) -> Option<BodyHandle> {
        let raw = self.handle.swap(UNREGISTERED, Ordering::AcqRel);
        (raw >= 0).then(|| ColliderId(raw as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::{ColliderShape, Pose};

    #[test]
    fn handle_lifecycle() {
        let mut world = hecs::World::new();
        let entity = world.spawn(());
        let desc = BodyDesc::dynamic(ColliderShape::sphere(0.5).unwrap(), Pose::IDENTITY);
        let reg = BodyRegistration::new(7, entity, desc, 0);

        assert!(!reg.is_registered());
        reg.set_handle(ColliderId(3));
        assert_eq!(reg.handle(), Some(ColliderId(3)));
        assert_eq!(reg.take_handle(), Some(ColliderId(3)));
        assert_eq!(reg.take_handle(), None);
        assert_eq!(reg.id(), 7);
    }
}
