use tracing::debug;

use super::KinematicCharacterController;
use crate::collision::{CollisionQuery, Pose};

/// Share of the penetration depth corrected per pass.
const RECOVERY_FACTOR: f32 = 0.2;

impl KinematicCharacterController {
    /// Pushes the controller out of overlapping geometry, a damped fraction
    /// of each contact's depth per pass, until a pass applies no correction
    /// or the pass budget runs out. Returns whether any pass corrected.
    pub fn recover_from_penetration(&mut self, world: &mut dyn CollisionQuery) -> bool {
        self.touching_contact = false;
        let mut passes = 0;
        while self.recovery_pass(world) {
            passes += 1;
            self.touching_contact = true;
            if passes >= self.recovery_iterations {
                debug!(
                    collider = self.collider.0,
                    passes,
                    position = ?self.current_position,
                    "penetration recovery hit its pass limit"
                );
                break;
            }
        }
        self.touching_contact
    }

    /// One correction pass over every cached pair.
    fn recovery_pass(&mut self, world: &mut dyn CollisionQuery) -> bool {
        let pose = world
            .world_transform(self.collider)
            .unwrap_or_else(|| self.pose());

        // The last move may have carried us into new AABB overlaps; refresh
        // the pair cache before reading contacts from it.
        world.update_broadphase_aabb(self.collider, self.shape.aabb(&pose));
        self.current_position = pose.position;

        let mut pairs = std::mem::take(&mut self.pairs);
        let mut manifolds = std::mem::take(&mut self.manifolds);
        pairs.clear();
        world.overlapping_pairs(self.collider, &mut pairs);

        let mut corrected = false;
        for pair in &pairs {
            let (Some(a), Some(b)) = (world.collider_info(pair.a), world.collider_info(pair.b))
            else {
                continue;
            };
            if !a.contact_response || !b.contact_response {
                continue;
            }
            if !a.filter.collides_with(&b.filter) {
                continue;
            }

            manifolds.clear();
            world.contact_manifolds(pair, &mut manifolds);
            for manifold in &manifolds {
                // Normals point from B toward A.
                let sign = if manifold.body_a == self.collider { -1.0 } else { 1.0 };
                for point in &manifold.points {
                    if point.distance < -self.max_penetration_depth {
                        self.current_position +=
                            point.normal_on_b * (sign * point.distance * RECOVERY_FACTOR);
                        corrected = true;
                    }
                }
            }
        }

        self.pairs = pairs;
        self.manifolds = manifolds;
        world.set_world_transform(self.collider, Pose::new(self.current_position, pose.rotation));
        corrected
    }
}
