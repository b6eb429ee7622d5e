//! Collision query layer.
//!
//! The character controller only sees the [`CollisionQuery`] trait: convex
//! sweeps, broadphase AABB updates, overlapping-pair enumeration with contact
//! manifolds, and raycasts. [`crate::dynamics::PhysicsWorld`] is the in-process
//! backend that implements it.

pub mod narrow;
pub mod raycast;
pub mod shape;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

pub use shape::{ColliderShape, ConvexShape, MarginOverride};

/// Index of a collider inside a collision backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColliderId(pub u32);

/// Position and orientation in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Pose {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
        }
    }

    /// Interpolates position linearly and rotation spherically.
    pub fn lerp(&self, other: &Pose, t: f32) -> Pose {
        Pose {
            position: self.position.lerp(other.position, t),
            rotation: self.rotation.slerp(other.rotation, t),
        }
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Box covering all of space, used for unbounded shapes like planes.
    pub fn infinite() -> Self {
        Self {
            min: Vec3::splat(f32::NEG_INFINITY),
            max: Vec3::splat(f32::INFINITY),
        }
    }

    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && other.min.cmple(self.max).all()
    }

    pub fn expanded(&self, amount: f32) -> Aabb {
        Aabb {
            min: self.min - Vec3::splat(amount),
            max: self.max + Vec3::splat(amount),
        }
    }
}

/// Collision group bits. A collider belongs to some groups and collides with
/// the groups in its mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CollisionGroups(pub u32);

impl CollisionGroups {
    pub const NONE: Self = Self(0);
    pub const DEFAULT: Self = Self(1 << 0);
    pub const STATIC: Self = Self(1 << 1);
    pub const KINEMATIC: Self = Self(1 << 2);
    pub const DEBRIS: Self = Self(1 << 3);
    pub const SENSOR: Self = Self(1 << 4);
    pub const CHARACTER: Self = Self(1 << 5);
    pub const AI: Self = Self(1 << 6);
    pub const ALL: Self = Self(u32::MAX);

    #[inline]
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl std::ops::BitOr for CollisionGroups {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// Group membership plus the groups a collider accepts contacts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionFilter {
    pub group: CollisionGroups,
    pub mask: CollisionGroups,
}

impl CollisionFilter {
    pub const fn new(group: CollisionGroups, mask: CollisionGroups) -> Self {
        Self { group, mask }
    }

    /// Both sides must accept each other.
    #[inline]
    pub fn collides_with(&self, other: &CollisionFilter) -> bool {
        self.group.intersects(other.mask) && other.group.intersects(self.mask)
    }
}

impl Default for CollisionFilter {
    fn default() -> Self {
        Self::new(CollisionGroups::DEFAULT, CollisionGroups::ALL)
    }
}

/// Collision-relevant flags of one collider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColliderInfo {
    pub filter: CollisionFilter,
    /// Whether touching this collider blocks movement.
    pub contact_response: bool,
}

/// Outcome of one convex sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepResult {
    pub succeeded: bool,
    pub point: Vec3,
    pub normal: Vec3,
    /// 1.0 = reached the end pose unobstructed.
    pub fraction: f32,
    pub collider: Option<ColliderId>,
}

impl SweepResult {
    pub fn miss(end: Vec3) -> Self {
        Self {
            succeeded: false,
            point: end,
            normal: Vec3::ZERO,
            fraction: 1.0,
            collider: None,
        }
    }
}

/// Nearest (or every) intersection of a ray with a collider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub collider: ColliderId,
    pub point: Vec3,
    pub normal: Vec3,
    pub distance: f32,
    /// `distance / max_distance`.
    pub fraction: f32,
}

/// One point of a contact manifold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactPoint {
    /// Signed separation; negative means overlap.
    pub distance: f32,
    /// Contact normal in world space, pointing from body B toward body A.
    pub normal_on_b: Vec3,
    pub point_on_b: Vec3,
}

impl ContactPoint {
    /// Overlap depth, zero when separated.
    #[inline]
    pub fn penetration_depth(&self) -> f32 {
        (-self.distance).max(0.0)
    }
}

/// Contacts between the two bodies of an overlapping pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactManifold {
    pub body_a: ColliderId,
    pub body_b: ColliderId,
    pub points: Vec<ContactPoint>,
}

/// A pair from a broadphase pair cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlappingPair {
    pub a: ColliderId,
    pub b: ColliderId,
}

impl OverlappingPair {
    pub fn other(&self, id: ColliderId) -> ColliderId {
        if self.a == id {
            self.b
        } else {
            self.a
        }
    }
}

/// Parameters of one convex sweep.
#[derive(Debug, Clone, Copy)]
pub struct SweepQuery<'a> {
    pub shape: &'a ConvexShape,
    pub start: Pose,
    pub end: Pose,
    pub filter: CollisionFilter,
    /// Collider ignored by the sweep, usually the caster itself.
    pub skip: Option<ColliderId>,
    /// Overlap at the start pose tolerated before it counts as a hit.
    pub allowed_penetration: f32,
}

/// Query surface a collision backend exposes to the character controller.
pub trait CollisionQuery {
    /// First hit of `shape` moving from `start` to `end`.
    fn convex_sweep(&self, query: &SweepQuery<'_>) -> SweepResult;

    /// Moves the broadphase bounds of `id` and refreshes its pair cache.
    fn update_broadphase_aabb(&mut self, id: ColliderId, aabb: Aabb);

    /// Pairs currently cached for `id`, appended to `out`.
    fn overlapping_pairs(&self, id: ColliderId, out: &mut Vec<OverlappingPair>);

    /// Contact manifolds of one cached pair, appended to `out`.
    fn contact_manifolds(&self, pair: &OverlappingPair, out: &mut Vec<ContactManifold>);

    /// Drops every cached pair of `id`.
    fn clear_pair_cache(&mut self, id: ColliderId);

    fn collider_info(&self, id: ColliderId) -> Option<ColliderInfo>;

    fn world_transform(&self, id: ColliderId) -> Option<Pose>;

    fn set_world_transform(&mut self, id: ColliderId, pose: Pose);

    /// Swaps the collision shape of `id`. Returns `false` when `id` is not
    /// live.
    fn set_collider_shape(&mut self, id: ColliderId, shape: ColliderShape) -> bool;

    /// Nearest hit along a ray; `None` for a zero direction.
    fn raycast(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        filter: CollisionGroups,
    ) -> Option<RayHit>;

    /// Every hit along a ray, nearest first.
    fn raycast_all(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        filter: CollisionGroups,
    ) -> Vec<RayHit>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_requires_both_directions() {
        let character = CollisionFilter::new(
            CollisionGroups::CHARACTER,
            CollisionGroups::STATIC | CollisionGroups::KINEMATIC,
        );
        let wall = CollisionFilter::new(CollisionGroups::STATIC, CollisionGroups::ALL);
        let debris = CollisionFilter::new(CollisionGroups::DEBRIS, CollisionGroups::ALL);
        let picky = CollisionFilter::new(CollisionGroups::STATIC, CollisionGroups::DEBRIS);

        assert!(character.collides_with(&wall));
        assert!(!character.collides_with(&debris));
        assert!(!character.collides_with(&picky));
    }

    #[test]
    fn aabb_overlap_is_inclusive() {
        let a = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let b = Aabb::new(Vec3::ONE, Vec3::splat(2.0));
        let c = Aabb::new(Vec3::splat(1.5), Vec3::splat(2.0));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert!(Aabb::infinite().overlaps(&c));
    }
}
