use glam::Vec3;

use super::KinematicCharacterController;
use crate::collision::{ColliderId, CollisionQuery, Pose, SweepQuery, SweepResult};

/// Sweeping stops once less than this share of the move is left.
const MIN_REMAINING_FRACTION: f32 = 0.01;

fn reflect(direction: Vec3, normal: Vec3) -> Vec3 {
    direction - 2.0 * direction.dot(normal) * normal
}

fn perpendicular_component(direction: Vec3, normal: Vec3) -> Vec3 {
    direction - normal * direction.dot(normal)
}

impl KinematicCharacterController {
    /// Moves by `walk_move`, sliding along whatever the sweeps hit.
    ///
    /// Each hit deflects the rest of the move onto the surface of that one
    /// obstacle. Concave corners touching several planes at once are not
    /// solved together and can stop the move early.
    pub(super) fn step_forward_and_strafe(&mut self, world: &dyn CollisionQuery, walk_move: Vec3) {
        self.target_position = self.current_position + walk_move;
        self.normalized_direction = walk_move.normalize_or_zero();

        let mut fraction = 1.0_f32;
        for _ in 0..self.sweep_iterations {
            if fraction <= MIN_REMAINING_FRACTION {
                break;
            }
            let start = Pose::new(self.current_position, self.orientation);
            let end = Pose::new(self.target_position, self.orientation);
            let hit = if start == end {
                SweepResult::miss(end.position)
            } else {
                self.sweep(world, &start, &end)
            };

            // Termination heuristic only; not the distance travelled.
            fraction -= hit.fraction;

            if hit.succeeded && self.blocked_by(world, hit.collider) {
                self.current_position = self.current_position.lerp(self.target_position, hit.fraction);
                self.update_target_position_based_on_collision(hit.normal);

                let current_dir = self.target_position - self.current_position;
                if current_dir.length_squared() <= f32::EPSILON {
                    break;
                }
                // Stop rather than bounce back against the requested move.
                if current_dir.normalize().dot(self.normalized_direction) <= 0.0 {
                    break;
                }
            } else {
                self.current_position = self.target_position;
            }
        }
    }

    /// Redirects the remaining move along the surface with `hit_normal`.
    fn update_target_position_based_on_collision(&mut self, hit_normal: Vec3) {
        let movement = self.target_position - self.current_position;
        let length = movement.length();
        if length <= f32::EPSILON {
            return;
        }
        let reflected = reflect(movement / length, hit_normal).normalize_or_zero();
        let perpendicular = perpendicular_component(reflected, hit_normal);
        self.target_position = self.current_position + perpendicular * length;
    }

    /// Convex sweep with the shape temporarily grown by the added margin.
    pub(super) fn sweep(&mut self, world: &dyn CollisionQuery, start: &Pose, end: &Pose) -> SweepResult {
        let added = self.added_margin;
        let filter = self.filter;
        let skip = Some(self.collider);
        let shape = self.shape.enlarge_margin(added);
        let query = SweepQuery {
            shape: &shape,
            start: *start,
            end: *end,
            filter,
            skip,
            allowed_penetration: 0.0,
        };
        world.convex_sweep(&query)
    }

    /// Whether a hit on `other` should stop this controller.
    pub(super) fn blocked_by(&self, world: &dyn CollisionQuery, other: Option<ColliderId>) -> bool {
        let responds = world
            .collider_info(self.collider)
            .map_or(true, |info| info.contact_response);
        let passes_filter = other
            .and_then(|id| world.collider_info(id))
            .map_or(true, |info| self.filter.collides_with(&info.filter));
        responds && passes_filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn head_on_reflection_has_no_tangent() {
        let n = Vec3::NEG_X;
        let r = reflect(Vec3::X, n);
        assert_relative_eq!(r.x, -1.0);
        assert_eq!(perpendicular_component(r, n), Vec3::ZERO);
    }

    #[test]
    fn oblique_reflection_keeps_tangent() {
        let n = Vec3::NEG_X;
        let dir = Vec3::new(1.0, 0.0, 1.0).normalize();
        let p = perpendicular_component(reflect(dir, n), n);
        assert_relative_eq!(p.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(p.z, dir.z, epsilon = 1e-6);
    }
}
