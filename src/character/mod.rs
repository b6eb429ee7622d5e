//! Kinematic character controller.
//!
//! The controller moves a ghost collider through the world with convex
//! sweeps and pushes it back out of overlapping geometry. It never feels
//! forces; a [`CharacterMovement`] strategy decides each physics step where
//! it wants to go.

mod controller;
mod movement;
mod recovery;
mod sweep;

use glam::{Quat, Vec3};

use crate::collision::{
    ColliderId, CollisionFilter, CollisionQuery, ContactManifold, ConvexShape, OverlappingPair,
};

pub use movement::{WalkMovement, WalkState};

/// Velocity update hook, invoked synchronously once per physics step.
pub trait CharacterMovement {
    /// Decide this step's motion, usually through
    /// [`KinematicCharacterController::apply_position`].
    fn on_physics_update(
        &mut self,
        controller: &mut KinematicCharacterController,
        world: &mut dyn CollisionQuery,
        dt: f32,
    );

    /// Called from [`KinematicCharacterController::reset`].
    fn on_reset(&mut self) {}
}

/// Movement strategy stored in a controller.
pub type BoxedMovement = Box<dyn CharacterMovement + Send + Sync>;

/// Sweep-and-slide character driven by walk direction and vertical
/// velocity along its up axis.
pub struct KinematicCharacterController {
    collider: ColliderId,
    shape: ConvexShape,
    filter: CollisionFilter,

    max_penetration_depth: f32,
    added_margin: f32,
    recovery_iterations: u32,
    sweep_iterations: u32,

    up: Vec3,
    gravity: f32,
    max_slope_radians: f32,
    max_slope_cosine: f32,

    /// Desired horizontal velocity, orthogonal to `up`.
    walk_direction: Vec3,
    /// Unit direction of the movement currently being swept.
    normalized_direction: Vec3,
    vertical_velocity: f32,
    vertical_offset: f32,
    angular_velocity: Vec3,
    linear_damping: f32,
    angular_damping: f32,

    current_position: Vec3,
    target_position: Vec3,
    orientation: Quat,
    current_velocity: Vec3,
    touching_contact: bool,

    // Reused between recovery passes.
    pairs: Vec<OverlappingPair>,
    manifolds: Vec<ContactManifold>,

    movement: Option<BoxedMovement>,
}
