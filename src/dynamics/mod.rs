//! Rigid-body dynamics.
//!
//! [`DynamicsEngine`] is the seam the simulation stepper drives. The engine
//! owns its handle tables and is only mutated between steps, under the
//! simulation's write lock. [`PhysicsWorld`] is the in-process engine.

mod solver;
mod world;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::collision::{
    ColliderId, ColliderShape, CollisionFilter, CollisionGroups, CollisionQuery, Pose, SweepQuery,
    SweepResult,
};
use crate::error::{PhysicsError, PhysicsResult};

pub use world::PhysicsWorld;

/// Engine-side handle of a body. Shares the index space of the collision
/// layer so a body and its collider are the same id.
pub type BodyHandle = ColliderId;

/// How a body moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyKind {
    /// Moved by gravity, velocity and contacts.
    Dynamic,
    /// Moved only by its own velocity or by direct pose writes.
    Kinematic,
    /// Never moves.
    Static,
}

/// Surface response coefficients, averaged between the two bodies of a
/// contact.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// 0.0 = ice, 1.0 = rubber.
    pub friction: f32,
    /// 0.0 = no bounce, 1.0 = perfect bounce.
    pub restitution: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            friction: 0.5,
            restitution: 0.3,
        }
    }
}

/// Everything needed to create a body.
#[derive(Debug, Clone)]
pub struct BodyDesc {
    pub kind: BodyKind,
    pub shape: ColliderShape,
    pub pose: Pose,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    /// Kilograms. Ignored for kinematic and static bodies.
    pub mass: f32,
    pub filter: CollisionFilter,
    pub material: Material,
    /// Per-body damping, added to the world-wide value.
    pub linear_damping: f32,
    pub angular_damping: f32,
    /// Replaces world gravity for this body.
    pub gravity_override: Option<Vec3>,
    /// Linear speed cap.
    pub max_speed: Option<f32>,
    /// Ghost bodies report contacts but are never pushed and never push.
    pub ghost: bool,
    /// Whether sweeps and solvers treat this body as solid.
    pub contact_response: bool,
}

impl BodyDesc {
    pub fn new(kind: BodyKind, shape: ColliderShape, pose: Pose) -> Self {
        let group = match kind {
            BodyKind::Dynamic => CollisionGroups::DEFAULT,
            BodyKind::Kinematic => CollisionGroups::KINEMATIC,
            BodyKind::Static => CollisionGroups::STATIC,
        };
        Self {
            kind,
            shape,
            pose,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            mass: 1.0,
            filter: CollisionFilter::new(group, CollisionGroups::ALL),
            material: Material::default(),
            linear_damping: 0.0,
            angular_damping: 0.0,
            gravity_override: None,
            max_speed: None,
            ghost: false,
            contact_response: true,
        }
    }

    pub fn dynamic(shape: ColliderShape, pose: Pose) -> Self {
        Self::new(BodyKind::Dynamic, shape, pose)
    }

    pub fn kinematic(shape: ColliderShape, pose: Pose) -> Self {
        Self::new(BodyKind::Kinematic, shape, pose)
    }

    pub fn fixed(shape: ColliderShape, pose: Pose) -> Self {
        Self::new(BodyKind::Static, shape, pose)
    }

    pub fn with_mass(mut self, mass: f32) -> Self {
        self.mass = mass;
        self
    }

    /// Mass from a density in kg/m³ and the shape's volume.
    pub fn with_density(mut self, density: f32) -> Self {
        self.mass = density * self.shape.volume();
        self
    }

    pub fn with_velocity(mut self, linear: Vec3) -> Self {
        self.linear_velocity = linear;
        self
    }

    pub fn with_filter(mut self, filter: CollisionFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.material = material;
        self
    }

    pub fn with_gravity(mut self, gravity: Vec3) -> Self {
        self.gravity_override = Some(gravity);
        self
    }

    pub fn with_max_speed(mut self, max_speed: f32) -> Self {
        self.max_speed = Some(max_speed);
        self
    }

    pub fn with_damping(mut self, linear: f32, angular: f32) -> Self {
        self.linear_damping = linear;
        self.angular_damping = angular;
        self
    }

    pub fn as_ghost(mut self) -> Self {
        self.ghost = true;
        self
    }

    /// Setup-time checks: shape dimensions, and for dynamic bodies a
    /// positive mass and a bounded shape.
    pub fn validate(&self) -> PhysicsResult<()> {
        self.shape.validate()?;
        if self.kind == BodyKind::Dynamic {
            if !(self.mass > 0.0) {
                return Err(PhysicsError::InvalidConfig(format!(
                    "dynamic body mass must be positive, got {}",
                    self.mass
                )));
            }
            if !self.shape.is_convex() {
                return Err(PhysicsError::InvalidShape(
                    "dynamic bodies cannot use a plane".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Sink for contacts found during a step. Called from narrow-phase worker
/// threads, once per body of each touching pair.
pub trait ContactRecorder: Sync {
    /// `normal` points from `other` toward `body`.
    fn record(&self, body: BodyHandle, other: BodyHandle, normal: Vec3, point: Vec3, depth: f32);
}

/// Discards every contact.
impl ContactRecorder for () {
    fn record(&self, _: BodyHandle, _: BodyHandle, _: Vec3, _: Vec3, _: f32) {}
}

/// Operations the simulation stepper needs from a dynamics engine.
pub trait DynamicsEngine: CollisionQuery + Send + Sync {
    fn add_body(&mut self, desc: &BodyDesc) -> PhysicsResult<BodyHandle>;

    /// Returns `false` when the handle is not live.
    fn remove_body(&mut self, handle: BodyHandle) -> bool;

    /// Advances the world by exactly `dt`.
    fn step(&mut self, dt: f32, recorder: &dyn ContactRecorder);

    fn body_pose(&self, handle: BodyHandle) -> Option<Pose>;

    fn body_kind(&self, handle: BodyHandle) -> Option<BodyKind>;

    fn linear_velocity(&self, handle: BodyHandle) -> Option<Vec3>;

    fn set_linear_velocity(&mut self, handle: BodyHandle, velocity: Vec3);

    /// Every hit of a convex sweep, nearest first.
    fn convex_sweep_all(&self, query: &SweepQuery<'_>) -> Vec<SweepResult>;

    /// Drops every body.
    fn clear(&mut self);

    fn body_count(&self) -> usize;
}
