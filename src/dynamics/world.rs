use glam::{Quat, Vec3};
use rayon::prelude::*;

use super::solver::{self, ContactConstraint};
use super::{BodyDesc, BodyHandle, BodyKind, ContactRecorder, DynamicsEngine, Material};
use crate::collision::narrow::{self, Core};
use crate::collision::raycast::ray_shape;
use crate::collision::{
    Aabb, ColliderId, ColliderInfo, ColliderShape, CollisionFilter, CollisionGroups,
    CollisionQuery, ContactManifold, ContactPoint, OverlappingPair, Pose, RayHit, SweepQuery,
    SweepResult,
};
use crate::config::PhysicsSettings;
use crate::error::PhysicsResult;

/// Pairs closer than this still produce manifold points.
const CONTACT_BREAKING_THRESHOLD: f32 = 0.02;

pub(super) struct Body {
    pub kind: BodyKind,
    pub shape: ColliderShape,
    pub pose: Pose,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    pub inv_mass: f32,
    pub filter: CollisionFilter,
    pub material: Material,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub gravity_override: Option<Vec3>,
    pub max_speed: Option<f32>,
    pub ghost: bool,
    pub contact_response: bool,
    pub aabb: Aabb,
    /// Broadphase pairs, refreshed by `update_broadphase_aabb`.
    pairs: Vec<OverlappingPair>,
}

impl Body {
    fn core(&self) -> Core {
        self.shape.core(&self.pose, 0.0)
    }

    /// Takes part in velocity and position correction.
    pub fn responds(&self) -> bool {
        self.contact_response && !self.ghost
    }
}

/// In-process rigid-body world.
///
/// Bodies live in a slot arena; a removed body's slot is reused by the
/// next add.
pub struct PhysicsWorld {
    bodies: Vec<Option<Body>>,
    free: Vec<u32>,
    gravity: Vec3,
    linear_damping: f32,
    angular_damping: f32,
    velocity_iterations: u32,
}

impl PhysicsWorld {
    pub fn new(settings: &PhysicsSettings) -> Self {
        Self {
            bodies: Vec::new(),
            free: Vec::new(),
            gravity: settings.gravity,
            linear_damping: settings.linear_damping,
            angular_damping: settings.angular_damping,
            velocity_iterations: settings.velocity_iteration_count.max(1),
        }
    }

    pub fn gravity(&self) -> Vec3 {
        self.gravity
    }

    pub fn set_gravity(&mut self, gravity: Vec3) {
        self.gravity = gravity;
    }

    fn body(&self, id: ColliderId) -> Option<&Body> {
        self.bodies.get(id.0 as usize).and_then(Option::as_ref)
    }

    fn body_mut(&mut self, id: ColliderId) -> Option<&mut Body> {
        self.bodies.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    fn live(&self) -> impl Iterator<Item = (ColliderId, &Body)> {
        self.bodies
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.as_ref().map(|b| (ColliderId(i as u32), b)))
    }

    /// Semi-implicit Euler: velocity first, then position.
    fn integrate(&mut self, dt: f32) {
        let gravity = self.gravity;
        let world_linear = self.linear_damping;
        let world_angular = self.angular_damping;

        for body in self.bodies.iter_mut().flatten() {
            match body.kind {
                BodyKind::Static => {}
                BodyKind::Kinematic => {
                    body.pose.position += body.linear_velocity * dt;
                    body.pose.rotation = integrate_rotation(body.pose.rotation, body.angular_velocity, dt);
                }
                BodyKind::Dynamic => {
                    body.linear_velocity += body.gravity_override.unwrap_or(gravity) * dt;

                    // vel *= (1 - drag * dt)
                    let linear = (1.0 - (world_linear + body.linear_damping) * dt).max(0.0);
                    let angular = (1.0 - (world_angular + body.angular_damping) * dt).max(0.0);
                    body.linear_velocity *= linear;
                    body.angular_velocity *= angular;

                    if let Some(max_speed) = body.max_speed {
                        body.linear_velocity = body.linear_velocity.clamp_length_max(max_speed);
                    }

                    body.pose.position += body.linear_velocity * dt;
                    body.pose.rotation = integrate_rotation(body.pose.rotation, body.angular_velocity, dt);
                }
            }
            body.aabb = body.shape.aabb(&body.pose, 0.0);
        }
    }

    /// Brute-force broadphase over live bodies. Only pairs that can move
    /// something are kept.
    fn candidate_pairs(&self) -> Vec<(u32, u32)> {
        let mut pairs = Vec::new();
        for i in 0..self.bodies.len() {
            let Some(a) = &self.bodies[i] else { continue };
            for j in (i + 1)..self.bodies.len() {
                let Some(b) = &self.bodies[j] else { continue };
                if a.kind != BodyKind::Dynamic && b.kind != BodyKind::Dynamic {
                    continue;
                }
                if !a.filter.collides_with(&b.filter) || !a.aabb.overlaps(&b.aabb) {
                    continue;
                }
                pairs.push((i as u32, j as u32));
            }
        }
        pairs
    }

    /// Exact contacts for the candidate pairs, fanned out across rayon
    /// workers. Contacts are reported to `recorder` from the workers.
    fn narrow_phase(&self, recorder: &dyn ContactRecorder) -> Vec<ContactConstraint> {
        let pairs = self.candidate_pairs();
        pairs
            .par_iter()
            .filter_map(|&(i, j)| {
                let a = self.bodies[i as usize].as_ref()?;
                let b = self.bodies[j as usize].as_ref()?;
                let sep = narrow::separation(&a.core(), &b.core())?;
                if sep.distance >= 0.0 {
                    return None;
                }
                let depth = -sep.distance;
                let (ia, ib) = (ColliderId(i), ColliderId(j));
                recorder.record(ia, ib, sep.normal, sep.point_on_b, depth);
                recorder.record(ib, ia, -sep.normal, sep.point_on_a, depth);

                if !a.responds() || !b.responds() {
                    return None;
                }
                Some(ContactConstraint {
                    a: i,
                    b: j,
                    normal: sep.normal,
                    depth,
                    restitution: (a.material.restitution + b.material.restitution) * 0.5,
                    friction: (a.material.friction + b.material.friction) * 0.5,
                })
            })
            .collect()
    }

    fn sweep_hits(&self, query: &SweepQuery<'_>) -> Vec<SweepResult> {
        let swept = {
            let a = query.shape.aabb(&query.start);
            let b = query.shape.aabb(&query.end);
            Aabb::new(a.min.min(b.min), a.max.max(b.max))
        };

        let mut hits: Vec<SweepResult> = self
            .live()
            .filter(|(id, body)| {
                Some(*id) != query.skip
                    && body.contact_response
                    && query.filter.collides_with(&body.filter)
                    && swept.overlaps(&body.aabb)
            })
            .filter_map(|(id, body)| {
                let hit = narrow::convex_sweep(
                    query.shape,
                    &query.start,
                    &query.end,
                    &body.core(),
                    query.allowed_penetration,
                )?;
                Some(SweepResult {
                    succeeded: true,
                    point: hit.point,
                    normal: hit.normal,
                    fraction: hit.fraction,
                    collider: Some(id),
                })
            })
            .collect();
        hits.sort_by(|a, b| a.fraction.total_cmp(&b.fraction));
        hits
    }

    fn ray_hits(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        filter: CollisionGroups,
    ) -> Vec<RayHit> {
        let Some(dir) = direction.try_normalize() else {
            return Vec::new();
        };
        if !(max_distance > 0.0) {
            return Vec::new();
        }
        let mut hits: Vec<RayHit> = self
            .live()
            .filter(|(_, body)| body.filter.group.intersects(filter))
            .filter_map(|(id, body)| {
                let (t, normal) = ray_shape(&body.shape, &body.pose, origin, dir)?;
                (t <= max_distance).then(|| RayHit {
                    collider: id,
                    point: origin + dir * t,
                    normal,
                    distance: t,
                    fraction: t / max_distance,
                })
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits
    }
}

fn integrate_rotation(rotation: Quat, angular_velocity: Vec3, dt: f32) -> Quat {
    if angular_velocity == Vec3::ZERO {
        return rotation;
    }
    (Quat::from_scaled_axis(angular_velocity * dt) * rotation).normalize()
}

impl DynamicsEngine for PhysicsWorld {
    fn add_body(&mut self, desc: &BodyDesc) -> PhysicsResult<BodyHandle> {
        desc.validate()?;
        let inv_mass = match desc.kind {
            BodyKind::Dynamic => 1.0 / desc.mass,
            BodyKind::Kinematic | BodyKind::Static => 0.0,
        };

        let body = Body {
            kind: desc.kind,
            shape: desc.shape,
            pose: desc.pose,
            linear_velocity: desc.linear_velocity,
            angular_velocity: desc.angular_velocity,
            inv_mass,
            filter: desc.filter,
            material: desc.material,
            linear_damping: desc.linear_damping,
            angular_damping: desc.angular_damping,
            gravity_override: desc.gravity_override,
            max_speed: desc.max_speed,
            ghost: desc.ghost,
            contact_response: desc.contact_response,
            aabb: desc.shape.aabb(&desc.pose, 0.0),
            pairs: Vec::new(),
        };

        let index = match self.free.pop() {
            Some(index) => {
                self.bodies[index as usize] = Some(body);
                index
            }
            None => {
                self.bodies.push(Some(body));
                (self.bodies.len() - 1) as u32
            }
        };
        Ok(ColliderId(index))
    }

    fn remove_body(&mut self, handle: BodyHandle) -> bool {
        let Some(slot) = self.bodies.get_mut(handle.0 as usize) else {
            return false;
        };
        if slot.take().is_none() {
            return false;
        }
        self.free.push(handle.0);
        for body in self.bodies.iter_mut().flatten() {
            body.pairs.retain(|p| p.a != handle && p.b != handle);
        }
        true
    }

    fn step(&mut self, dt: f32, recorder: &dyn ContactRecorder) {
        self.integrate(dt);
        let contacts = self.narrow_phase(recorder);
        solver::resolve(&mut self.bodies, &contacts, self.velocity_iterations);
    }

    fn body_pose(&self, handle: BodyHandle) -> Option<Pose> {
        self.body(handle).map(|b| b.pose)
    }

    fn body_kind(&self, handle: BodyHandle) -> Option<BodyKind> {
        self.body(handle).map(|b| b.kind)
    }

    fn linear_velocity(&self, handle: BodyHandle) -> Option<Vec3> {
        self.body(handle).map(|b| b.linear_velocity)
    }

    fn set_linear_velocity(&mut self, handle: BodyHandle, velocity: Vec3) {
        if let Some(body) = self.body_mut(handle) {
            body.linear_velocity = velocity;
        }
    }

    fn convex_sweep_all(&self, query: &SweepQuery<'_>) -> Vec<SweepResult> {
        self.sweep_hits(query)
    }

    fn clear(&mut self) {
        self.bodies.clear();
        self.free.clear();
    }

    fn body_count(&self) -> usize {
        self.bodies.iter().flatten().count()
    }
}

impl CollisionQuery for PhysicsWorld {
    fn convex_sweep(&self, query: &SweepQuery<'_>) -> SweepResult {
        self.sweep_hits(query)
            .into_iter()
            .next()
            .unwrap_or_else(|| SweepResult::miss(query.end.position))
    }

    fn update_broadphase_aabb(&mut self, id: ColliderId, aabb: Aabb) {
        let Some(body) = self.body(id) else { return };
        let filter = body.filter;
        let pairs: Vec<OverlappingPair> = self
            .live()
            .filter(|(other, b)| {
                *other != id && b.filter.collides_with(&filter) && b.aabb.overlaps(&aabb)
            })
            .map(|(other, _)| OverlappingPair { a: id, b: other })
            .collect();
        if let Some(body) = self.body_mut(id) {
            body.aabb = aabb;
            body.pairs = pairs;
        }
    }

    fn overlapping_pairs(&self, id: ColliderId, out: &mut Vec<OverlappingPair>) {
        if let Some(body) = self.body(id) {
            out.extend_from_slice(&body.pairs);
        }
    }

    fn contact_manifolds(&self, pair: &OverlappingPair, out: &mut Vec<ContactManifold>) {
        let (Some(a), Some(b)) = (self.body(pair.a), self.body(pair.b)) else {
            return;
        };
        let Some(sep) = narrow::separation(&a.core(), &b.core()) else {
            return;
        };
        if sep.distance >= CONTACT_BREAKING_THRESHOLD {
            return;
        }
        out.push(ContactManifold {
            body_a: pair.a,
            body_b: pair.b,
            points: vec![ContactPoint {
                distance: sep.distance,
                normal_on_b: sep.normal,
                point_on_b: sep.point_on_b,
            }],
        });
    }

    fn clear_pair_cache(&mut self, id: ColliderId) {
        if let Some(body) = self.body_mut(id) {
            body.pairs.clear();
        }
    }

    fn collider_info(&self, id: ColliderId) -> Option<ColliderInfo> {
        self.body(id).map(|b| ColliderInfo {
            filter: b.filter,
            contact_response: b.contact_response,
        })
    }

    fn world_transform(&self, id: ColliderId) -> Option<Pose> {
        self.body(id).map(|b| b.pose)
    }

    fn set_world_transform(&mut self, id: ColliderId, pose: Pose) {
        if let Some(body) = self.body_mut(id) {
            body.pose = pose;
        }
    }

    fn set_collider_shape(&mut self, id: ColliderId, shape: ColliderShape) -> bool {
        let Some(body) = self.body_mut(id) else {
            return false;
        };
        body.shape = shape;
        body.aabb = shape.aabb(&body.pose, 0.0);
        true
    }

    fn raycast(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        filter: CollisionGroups,
    ) -> Option<RayHit> {
        self.ray_hits(origin, direction, max_distance, filter)
            .into_iter()
            .next()
    }

    fn raycast_all(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        filter: CollisionGroups,
    ) -> Vec<RayHit> {
        self.ray_hits(origin, direction, max_distance, filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn world() -> PhysicsWorld {
        PhysicsWorld::new(&PhysicsSettings::default())
    }

    fn ground() -> BodyDesc {
        BodyDesc::fixed(ColliderShape::plane(Vec3::Y, 0.0).unwrap(), Pose::IDENTITY)
    }

    #[test]
    fn removed_slots_are_reused() {
        let mut w = world();
        let sphere = ColliderShape::sphere(0.5).unwrap();
        let a = w.add_body(&BodyDesc::dynamic(sphere, Pose::IDENTITY)).unwrap();
        let b = w.add_body(&BodyDesc::dynamic(sphere, Pose::IDENTITY)).unwrap();
        assert!(w.remove_body(a));
        assert!(!w.remove_body(a));
        let c = w.add_body(&BodyDesc::dynamic(sphere, Pose::IDENTITY)).unwrap();
        assert_eq!(a, c);
        assert_ne!(b, c);
        assert_eq!(w.body_count(), 2);
    }

    #[test]
    fn dynamic_body_needs_mass() {
        let mut w = world();
        let desc = BodyDesc::dynamic(ColliderShape::sphere(0.5).unwrap(), Pose::IDENTITY)
            .with_mass(0.0);
        assert!(matches!(
            w.add_body(&desc),
            Err(crate::error::PhysicsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn sphere_comes_to_rest_on_ground() {
        let mut w = world();
        w.add_body(&ground()).unwrap();
        let ball = w
            .add_body(&BodyDesc::dynamic(
                ColliderShape::sphere(0.5).unwrap(),
                Pose::from_position(Vec3::new(0.0, 2.0, 0.0)),
            ))
            .unwrap();
        for _ in 0..240 {
            w.step(1.0 / 60.0, &());
        }
        let y = w.body_pose(ball).unwrap().position.y;
        assert!((y - 0.5).abs() < 0.05, "resting height {y}");
    }

    #[test]
    fn gravity_override_and_max_speed() {
        let mut w = world();
        let desc = BodyDesc::dynamic(ColliderShape::sphere(0.5).unwrap(), Pose::IDENTITY)
            .with_gravity(Vec3::new(0.0, -100.0, 0.0))
            .with_max_speed(2.0);
        let h = w.add_body(&desc).unwrap();
        for _ in 0..10 {
            w.step(1.0 / 60.0, &());
        }
        assert_relative_eq!(w.linear_velocity(h).unwrap().length(), 2.0, epsilon = 1e-4);
    }

    #[test]
    fn ghost_reports_contacts_without_response() {
        use parking_lot::Mutex;

        struct Collect(Mutex<Vec<(BodyHandle, BodyHandle, Vec3)>>);
        impl ContactRecorder for Collect {
            fn record(&self, body: BodyHandle, other: BodyHandle, normal: Vec3, _: Vec3, _: f32) {
                self.0.lock().push((body, other, normal));
            }
        }

        let mut w = world();
        let sensor = w
            .add_body(
                &BodyDesc::kinematic(ColliderShape::sphere(1.0).unwrap(), Pose::IDENTITY)
                    .as_ghost(),
            )
            .unwrap();
        let ball = w
            .add_body(
                &BodyDesc::dynamic(
                    ColliderShape::sphere(0.5).unwrap(),
                    Pose::from_position(Vec3::new(0.0, 1.0, 0.0)),
                )
                .with_gravity(Vec3::ZERO),
            )
            .unwrap();
        let recorder = Collect(Mutex::new(Vec::new()));
        w.step(1.0 / 60.0, &recorder);

        let contacts = recorder.0.into_inner();
        assert_eq!(contacts.len(), 2);
        let (_, _, n) = contacts.iter().find(|c| c.0 == ball).copied().unwrap();
        assert!(n.y > 0.9);
        assert!(contacts.iter().any(|c| c.0 == sensor && c.2.y < -0.9));
        assert_eq!(w.body_pose(ball).unwrap().position, Vec3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn raycast_nearest_and_all() {
        let mut w = world();
        w.add_body(&ground()).unwrap();
        let sphere = ColliderShape::sphere(0.5).unwrap();
        let top = w
            .add_body(&BodyDesc::fixed(sphere, Pose::from_position(Vec3::new(0.0, 3.0, 0.0))))
            .unwrap();

        let hit = w
            .raycast(Vec3::new(0.0, 10.0, 0.0), Vec3::NEG_Y, 100.0, CollisionGroups::ALL)
            .unwrap();
        assert_eq!(hit.collider, top);
        assert_relative_eq!(hit.distance, 6.5, epsilon = 1e-4);

        let all = w.raycast_all(Vec3::new(0.0, 10.0, 0.0), Vec3::NEG_Y, 100.0, CollisionGroups::ALL);
        assert_eq!(all.len(), 2);
        assert!(all[0].distance < all[1].distance);

        assert!(w.raycast(Vec3::ZERO, Vec3::ZERO, 10.0, CollisionGroups::ALL).is_none());
        assert!(w
            .raycast(Vec3::new(0.0, 10.0, 0.0), Vec3::NEG_Y, 100.0, CollisionGroups::DEBRIS)
            .is_none());
    }

    #[test]
    fn pair_cache_follows_broadphase_updates() {
        let mut w = world();
        let wall = w
            .add_body(&BodyDesc::fixed(
                ColliderShape::cuboid(Vec3::ONE).unwrap(),
                Pose::from_position(Vec3::new(3.0, 0.0, 0.0)),
            ))
            .unwrap();
        let shape = ColliderShape::sphere(0.5).unwrap();
        let ghost = w
            .add_body(&BodyDesc::kinematic(shape, Pose::IDENTITY).as_ghost())
            .unwrap();

        let mut pairs = Vec::new();
        w.update_broadphase_aabb(ghost, shape.aabb(&Pose::IDENTITY, 0.0));
        w.overlapping_pairs(ghost, &mut pairs);
        assert!(pairs.is_empty());

        let near = Pose::from_position(Vec3::new(1.7, 0.0, 0.0));
        w.set_world_transform(ghost, near);
        w.update_broadphase_aabb(ghost, shape.aabb(&near, 0.0));
        w.overlapping_pairs(ghost, &mut pairs);
        assert_eq!(pairs, vec![OverlappingPair { a: ghost, b: wall }]);

        let mut manifolds = Vec::new();
        w.contact_manifolds(&pairs[0], &mut manifolds);
        assert_eq!(manifolds.len(), 1);
        assert_relative_eq!(manifolds[0].points[0].distance, -0.2, epsilon = 1e-4);

        w.clear_pair_cache(ghost);
        pairs.clear();
        w.overlapping_pairs(ghost, &mut pairs);
        assert!(pairs.is_empty());
    }
}
