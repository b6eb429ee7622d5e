use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::OnceLock;

use glam::Vec3;
use hecs::Entity;
use tracing::warn;

/// One contact seen by a body during the last fixed step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyContact {
    /// Entity of the other body, when it is still registered.
    pub other: Option<Entity>,
    /// Points from the other body toward this one.
    pub normal: Vec3,
    pub point: Vec3,
    pub depth: f32,
}

/// Fixed-capacity per-body contact list written from narrow-phase workers.
///
/// Writers claim a slot with an atomic increment; contacts past capacity
/// are dropped. The buffer never grows while a step is running.
pub(crate) struct ContactBuffer {
    slots: Box<[OnceLock<BodyContact>]>,
    count: AtomicUsize,
    overflowed: AtomicBool,
}

impl ContactBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| OnceLock::new()).collect(),
            count: AtomicUsize::new(0),
            overflowed: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Safe to call from many threads at once.
    pub fn record(&self, contact: BodyContact, owner: Entity) {
        let index = self.count.fetch_add(1, Ordering::AcqRel);
        match self.slots.get(index) {
            Some(slot) => {
                let _ = slot.set(contact);
            }
            None => {
                if !self.overflowed.swap(true, Ordering::AcqRel) {
                    warn!(
                        entity = ?owner,
                        capacity = self.capacity(),
                        "contact buffer full, dropping contacts"
                    );
                }
            }
        }
    }

    /// Empties the buffer between steps.
    pub fn reset(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.take();
        }
        *self.count.get_mut() = 0;
        *self.overflowed.get_mut() = false;
    }

    /// Recorded contacts, at most `capacity`.
    pub fn contacts(&self) -> Vec<BodyContact> {
        let filled = self.count.load(Ordering::Acquire).min(self.capacity());
        self.slots[..filled].iter().filter_map(|s| s.get().copied()).collect()
    }

    /// Contacts offered this step, dropped ones included.
    #[cfg(test)]
    pub fn offered(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    fn contact(depth: f32) -> BodyContact {
        BodyContact {
            other: None,
            normal: Vec3::Y,
            point: Vec3::ZERO,
            depth,
        }
    }

    #[test]
    fn concurrent_writers_respect_capacity() {
        let mut world = hecs::World::new();
        let owner = world.spawn(());
        let mut buffer = ContactBuffer::new(8);

        (0..64).into_par_iter().for_each(|i| buffer.record(contact(i as f32), owner));
        assert_eq!(buffer.offered(), 64);
        assert_eq!(buffer.contacts().len(), 8);

        buffer.reset();
        assert!(buffer.contacts().is_empty());
        buffer.record(contact(1.0), owner);
        assert_eq!(buffer.contacts(), vec![contact(1.0)]);
    }

    #[test]
    fn zero_capacity_drops_everything() {
        let mut world = hecs::World::new();
        let owner = world.spawn(());
        let buffer = ContactBuffer::new(0);
        buffer.record(contact(0.1), owner);
        assert!(buffer.contacts().is_empty());
    }
}
