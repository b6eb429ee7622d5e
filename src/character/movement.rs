use glam::{Quat, Vec3};

use super::{CharacterMovement, KinematicCharacterController};
use crate::collision::CollisionQuery;
use crate::fsm::StateMachine;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// How far below the feet the walkable-ground probe reaches.
const GROUND_PROBE_DISTANCE: f32 = 0.05;
/// Vertical moves shorter than this are treated as not moving.
const VERTICAL_SLOP: f32 = 1e-4;
const DEFAULT_JUMP_SPEED: f32 = 7.0;

// ---------------------------------------------------------------------------
// WalkState transition logic
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkState {
    Grounded,
    Jumping,
    Falling,
}

/// What a step observed, fed to [`WalkState::next`].
struct WalkCtx {
    on_ground: bool,
    walkable: bool,
    vertical_velocity: f32,
}

impl WalkState {
    /// Next state, or `None` to stay.
    fn next(self, ctx: &WalkCtx) -> Option<WalkState> {
        let supported = ctx.on_ground && ctx.walkable;
        match self {
            Self::Grounded if !supported => Some(Self::Falling),
            Self::Jumping if ctx.vertical_velocity <= 0.0 => {
                Some(if supported { Self::Grounded } else { Self::Falling })
            }
            Self::Falling if supported => Some(Self::Grounded),
            _ => None,
        }
    }

    pub fn is_airborne(self) -> bool {
        matches!(self, Self::Jumping | Self::Falling)
    }
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// Walking movement: horizontal intent, controller gravity, jumps.
///
/// Each step first sweeps the horizontal part of the move, then the
/// vertical part with penetration recovery. A blocked vertical move zeroes
/// vertical velocity so landing and bumping a ceiling both stop the fall
/// or rise.
#[derive(Debug, Clone)]
pub struct WalkMovement {
    /// Horizontal velocity the character wants, in m/s.
    pub desired_velocity: Vec3,
    pub jump_speed: f32,
    jump_requested: bool,
    fsm: StateMachine<WalkState>,
}

impl Default for WalkMovement {
    fn default() -> Self {
        Self::new()
    }
}

impl WalkMovement {
    pub fn new() -> Self {
        Self {
            desired_velocity: Vec3::ZERO,
            jump_speed: DEFAULT_JUMP_SPEED,
            jump_requested: false,
            fsm: StateMachine::new(WalkState::Falling),
        }
    }

    /// Jumps at the next step if the character is grounded then.
    pub fn jump(&mut self) {
        self.jump_requested = true;
    }

    pub fn state(&self) -> WalkState {
        self.fsm.state()
    }

    /// Seconds spent in the current state.
    pub fn time_in_state(&self) -> f32 {
        self.fsm.elapsed()
    }

    fn turn(controller: &mut KinematicCharacterController, dt: f32) {
        let spin = controller.angular_velocity() * (1.0 - controller.angular_damping());
        controller.set_angular_velocity(spin);
        if spin != Vec3::ZERO {
            let orientation = Quat::from_scaled_axis(spin * dt) * controller.orientation();
            controller.set_orientation(orientation);
        }
    }
}

impl CharacterMovement for WalkMovement {
    fn on_physics_update(
        &mut self,
        controller: &mut KinematicCharacterController,
        world: &mut dyn CollisionQuery,
        dt: f32,
    ) {
        let up = controller.up();

        let mut vertical = controller.vertical_velocity();
        if std::mem::take(&mut self.jump_requested) && self.fsm.state() == WalkState::Grounded {
            vertical = self.jump_speed;
            self.fsm.go(WalkState::Jumping);
        }
        vertical -= controller.gravity_magnitude() * dt;
        controller.set_linear_velocity(self.desired_velocity + up * vertical);
        Self::turn(controller, dt);

        let start = controller.position();
        let after_walk =
            controller.apply_position(world, start + controller.walk_direction() * dt, true, false);

        let intended = controller.vertical_velocity() * dt;
        let end = controller.apply_position(world, after_walk + up * intended, true, true);
        let moved = (end - after_walk).dot(up);

        let blocked = intended.abs() > VERTICAL_SLOP && (moved - intended).abs() > VERTICAL_SLOP;
        if blocked {
            controller.set_linear_velocity(controller.walk_direction());
        }
        controller.set_vertical_offset(if moved.abs() > VERTICAL_SLOP { moved } else { 0.0 });

        let probe = controller.do_sweep(world, end, end - up * GROUND_PROBE_DISTANCE);
        let ctx = WalkCtx {
            on_ground: controller.on_ground(),
            walkable: probe.succeeded && controller.is_walkable(probe.normal),
            vertical_velocity: controller.vertical_velocity(),
        };
        if let Some(next) = self.fsm.state().next(&ctx) {
            self.fsm.go(next);
        }
        self.fsm.tick(dt);
    }

    fn on_reset(&mut self) {
        self.jump_requested = false;
        self.fsm.reset(WalkState::Falling);
    }
}
