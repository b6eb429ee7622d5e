use glam::{Quat, Vec3};

use super::{BoxedMovement, KinematicCharacterController};
use crate::collision::{
    ColliderId, ColliderShape, CollisionFilter, CollisionQuery, ConvexShape, Pose, SweepResult,
};
use crate::config::CharacterSettings;
use crate::error::PhysicsResult;

/// Tolerance of the ground heuristic.
const ON_GROUND_EPSILON: f32 = 1e-5;

/// Rotation taking `from` onto `to`; identity when either is zero.
fn shortest_arc(from: Vec3, to: Vec3) -> Quat {
    match (from.try_normalize(), to.try_normalize()) {
        (Some(from), Some(to)) => Quat::from_rotation_arc(from, to),
        _ => Quat::IDENTITY,
    }
}

impl KinematicCharacterController {
    /// Builds a controller for the backend collider `collider` standing at
    /// `pose`. Fails with `MissingConvexShape` for planes.
    pub fn new(
        collider: ColliderId,
        shape: ColliderShape,
        filter: CollisionFilter,
        settings: &CharacterSettings,
        pose: Pose,
    ) -> PhysicsResult<Self> {
        let shape = ConvexShape::new(shape)?;
        let max_slope = settings.max_slope_degrees.to_radians();
        Ok(Self {
            collider,
            shape,
            filter,
            max_penetration_depth: settings.max_penetration_depth,
            added_margin: settings.added_margin,
            recovery_iterations: settings.recovery_iterations.max(1),
            sweep_iterations: settings.sweep_iterations.max(1),
            up: Vec3::Y,
            gravity: settings.gravity,
            max_slope_radians: max_slope,
            max_slope_cosine: max_slope.cos(),
            walk_direction: Vec3::ZERO,
            normalized_direction: Vec3::ZERO,
            vertical_velocity: 0.0,
            vertical_offset: 0.0,
            angular_velocity: Vec3::ZERO,
            linear_damping: 0.0,
            angular_damping: 0.0,
            current_position: pose.position,
            target_position: pose.position,
            orientation: pose.rotation,
            current_velocity: Vec3::ZERO,
            touching_contact: false,
            pairs: Vec::new(),
            manifolds: Vec::new(),
            movement: None,
        })
    }

    pub fn with_movement(mut self, movement: BoxedMovement) -> Self {
        self.movement = Some(movement);
        self
    }

    pub fn set_movement(&mut self, movement: Option<BoxedMovement>) {
        self.movement = movement;
    }

    pub fn has_movement(&self) -> bool {
        self.movement.is_some()
    }

    pub fn collider(&self) -> ColliderId {
        self.collider
    }

    pub fn shape(&self) -> &ConvexShape {
        &self.shape
    }

    /// Replaces the collision shape of the controller and of its backend
    /// collider, keeping the current margin. Sweeps and penetration
    /// recovery see the new size from the next move on.
    pub fn set_shape(
        &mut self,
        world: &mut dyn CollisionQuery,
        shape: ColliderShape,
    ) -> PhysicsResult<()> {
        let mut convex = ConvexShape::new(shape)?;
        convex.set_margin(self.shape.margin());
        world.set_collider_shape(self.collider, shape);

        let pose = world
            .world_transform(self.collider)
            .unwrap_or_else(|| self.pose());
        world.update_broadphase_aabb(self.collider, convex.aabb(&pose));
        self.shape = convex;
        Ok(())
    }

    pub fn filter(&self) -> CollisionFilter {
        self.filter
    }

    pub fn position(&self) -> Vec3 {
        self.current_position
    }

    /// Overwrites the cached position without touching the backend.
    pub fn set_position(&mut self, position: Vec3) {
        self.current_position = position;
    }

    pub fn orientation(&self) -> Quat {
        self.orientation
    }

    /// Takes effect on the backend at the next committed move.
    pub fn set_orientation(&mut self, orientation: Quat) {
        self.orientation = orientation.normalize();
    }

    pub fn pose(&self) -> Pose {
        Pose::new(self.current_position, self.orientation)
    }

    /// Displacement per second measured over the last physics step.
    pub fn current_velocity(&self) -> Vec3 {
        self.current_velocity
    }

    pub fn set_current_velocity(&mut self, velocity: Vec3) {
        self.current_velocity = velocity;
    }

    /// Whether the last recovery found penetrating contacts.
    pub fn touching_contact(&self) -> bool {
        self.touching_contact
    }

    /// Splits `velocity` into a walk direction orthogonal to `up` and a
    /// signed vertical speed along `up`.
    pub fn set_linear_velocity(&mut self, velocity: Vec3) {
        self.vertical_velocity = velocity.dot(self.up);
        self.walk_direction = velocity - self.up * self.vertical_velocity;
    }

    /// Walk direction plus vertical velocity along `up`.
    pub fn linear_velocity(&self) -> Vec3 {
        self.walk_direction + self.up * self.vertical_velocity
    }

    pub fn walk_direction(&self) -> Vec3 {
        self.walk_direction
    }

    pub fn vertical_velocity(&self) -> f32 {
        self.vertical_velocity
    }

    pub fn vertical_offset(&self) -> f32 {
        self.vertical_offset
    }

    /// Vertical displacement of the last step, fed to [`Self::on_ground`].
    pub fn set_vertical_offset(&mut self, offset: f32) {
        self.vertical_offset = offset;
    }

    pub fn angular_velocity(&self) -> Vec3 {
        self.angular_velocity
    }

    pub fn set_angular_velocity(&mut self, velocity: Vec3) {
        self.angular_velocity = velocity;
    }

    pub fn linear_damping(&self) -> f32 {
        self.linear_damping
    }

    pub fn set_linear_damping(&mut self, damping: f32) {
        self.linear_damping = damping.clamp(0.0, 1.0);
    }

    pub fn angular_damping(&self) -> f32 {
        self.angular_damping
    }

    pub fn set_angular_damping(&mut self, damping: f32) {
        self.angular_damping = damping.clamp(0.0, 1.0);
    }

    pub fn up(&self) -> Vec3 {
        self.up
    }

    /// Sets the up axis. With gravity active the request goes through
    /// [`Self::set_gravity`] so gravity keeps pointing down the new axis.
    pub fn set_up(&mut self, up: Vec3) {
        if up.length_squared() > 0.0 && self.gravity > 0.0 {
            self.set_gravity(-self.gravity * up.normalize());
            return;
        }
        self.set_up_vector(up);
    }

    /// Changes the up axis and turns the orientation by the inverse of the
    /// shortest arc from the new up to the old one.
    pub fn set_up_vector(&mut self, up: Vec3) {
        if self.up == up {
            return;
        }
        let old = self.up;
        self.up = up.normalize_or_zero();
        let rotation = shortest_arc(self.up, old);
        self.orientation = (rotation.inverse() * self.orientation).normalize();
    }

    /// Gravity vector, `-magnitude * up`.
    pub fn gravity(&self) -> Vec3 {
        -self.gravity * self.up
    }

    pub fn gravity_magnitude(&self) -> f32 {
        self.gravity
    }

    /// Stores the magnitude of `gravity` and, when it is non-zero, makes
    /// its opposite the new up axis.
    pub fn set_gravity(&mut self, gravity: Vec3) {
        self.gravity = gravity.length();
        if gravity.length_squared() > 0.0 {
            self.set_up_vector(-gravity);
        }
    }

    /// Cheap heuristic: no vertical motion in progress.
    pub fn on_ground(&self) -> bool {
        self.vertical_velocity.abs() < ON_GROUND_EPSILON
            && self.vertical_offset.abs() < ON_GROUND_EPSILON
    }

    pub fn max_slope(&self) -> f32 {
        self.max_slope_radians
    }

    pub fn max_slope_cosine(&self) -> f32 {
        self.max_slope_cosine
    }

    pub fn set_max_slope(&mut self, radians: f32) {
        self.max_slope_radians = radians;
        self.max_slope_cosine = radians.cos();
    }

    pub fn max_penetration_depth(&self) -> f32 {
        self.max_penetration_depth
    }

    pub fn set_max_penetration_depth(&mut self, depth: f32) {
        self.max_penetration_depth = depth;
    }

    pub fn added_margin(&self) -> f32 {
        self.added_margin
    }

    /// Whether a surface with this normal counts as floor.
    pub fn is_walkable(&self, normal: Vec3) -> bool {
        normal.dot(self.up) >= self.max_slope_cosine
    }

    /// Teleports to `position`, keeping the orientation and dropping all
    /// velocity. No sweep, no recovery.
    pub fn warp(&mut self, world: &mut dyn CollisionQuery, position: Vec3) {
        self.current_position = position;
        self.target_position = position;
        self.current_velocity = Vec3::ZERO;
        self.walk_direction = Vec3::ZERO;
        self.vertical_velocity = 0.0;
        world.set_world_transform(self.collider, self.pose());
    }

    /// Clears velocity state and the backend pair cache, then tells the
    /// movement strategy.
    pub fn reset(&mut self, world: &mut dyn CollisionQuery) {
        self.vertical_velocity = 0.0;
        self.vertical_offset = 0.0;
        self.walk_direction = Vec3::ZERO;
        self.current_velocity = Vec3::ZERO;
        world.clear_pair_cache(self.collider);
        if let Some(movement) = self.movement.as_mut() {
            movement.on_reset();
        }
    }

    /// Snapshots the backend pose before the movement strategy runs.
    pub fn pre_step(&mut self, world: &dyn CollisionQuery) {
        if let Some(pose) = world.world_transform(self.collider) {
            self.current_position = pose.position;
        }
        self.target_position = self.current_position;
    }

    /// One physics tick: snapshot, run the movement strategy, commit the
    /// resulting pose. Does nothing without a strategy.
    pub fn update_action(&mut self, world: &mut dyn CollisionQuery, dt: f32) {
        let Some(mut movement) = self.movement.take() else {
            return;
        };
        self.pre_step(world);
        let start = self.current_position;

        movement.on_physics_update(self, world, dt);
        // The strategy may have installed a replacement for itself.
        if self.movement.is_none() {
            self.movement = Some(movement);
        }

        if dt > 0.0 {
            self.current_velocity = (self.current_position - start) / dt;
        }
        world.set_world_transform(self.collider, self.pose());
    }

    /// Moves to `position`, either directly or by sweeping toward it, then
    /// optionally recovers from penetration. Returns where the controller
    /// ended up.
    pub fn apply_position(
        &mut self,
        world: &mut dyn CollisionQuery,
        position: Vec3,
        do_sweep: bool,
        recover_from_penetration: bool,
    ) -> Vec3 {
        if do_sweep {
            let walk = position - self.current_position;
            self.step_forward_and_strafe(world, walk);
        } else {
            self.current_position = position;
        }
        world.set_world_transform(self.collider, self.pose());

        if recover_from_penetration {
            self.recover_from_penetration(world);
        }
        self.current_position
    }

    /// Single sweep of the controller shape between two positions.
    pub fn do_sweep(&mut self, world: &dyn CollisionQuery, start: Vec3, end: Vec3) -> SweepResult {
        let start = Pose::new(start, self.orientation);
        let end = Pose::new(end, self.orientation);
        if start == end {
            return SweepResult::miss(end.position);
        }
        let hit = self.sweep(world, &start, &end);
        if hit.succeeded && self.blocked_by(world, hit.collider) {
            hit
        } else {
            SweepResult::miss(end.position)
        }
    }
}
