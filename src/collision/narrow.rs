//! Narrow-phase geometry.
//!
//! Every convex shape is reduced to a skeleton (point, segment or solid box)
//! inflated by a radius. Distances between skeletons come from closed-form
//! projections where they exist and alternating projection otherwise; when
//! the skeletons themselves overlap, the penetration axis is picked from a
//! small set of candidate axes. Planes are half-spaces and handled directly.

use glam::{Quat, Vec3};

use super::{ConvexShape, Pose};

const EPSILON: f32 = 1e-6;
/// Skeleton gaps below this are treated as overlap.
const SKELETON_OVERLAP: f32 = 1e-4;
const PROJECTION_ITERATIONS: usize = 32;
const MAX_ADVANCE_ITERATIONS: usize = 64;

/// Distance at which a sweep reports contact.
pub const CONTACT_TOLERANCE: f32 = 1e-3;

/// Collision geometry placed in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Core {
    Point {
        center: Vec3,
        radius: f32,
    },
    Segment {
        a: Vec3,
        b: Vec3,
        radius: f32,
    },
    Box {
        center: Vec3,
        rotation: Quat,
        half_extents: Vec3,
        radius: f32,
    },
    /// Solid region `dot(p, normal) <= offset`.
    HalfSpace {
        normal: Vec3,
        offset: f32,
    },
}

impl Core {
    pub fn radius(&self) -> f32 {
        match *self {
            Core::Point { radius, .. } | Core::Segment { radius, .. } | Core::Box { radius, .. } => {
                radius
            }
            Core::HalfSpace { .. } => 0.0,
        }
    }

    pub fn center(&self) -> Vec3 {
        match *self {
            Core::Point { center, .. } | Core::Box { center, .. } => center,
            Core::Segment { a, b, .. } => (a + b) * 0.5,
            Core::HalfSpace { normal, offset } => normal * offset,
        }
    }

    /// Largest distance from the center to the skeleton.
    pub fn skeleton_extent(&self) -> f32 {
        match *self {
            Core::Point { .. } => 0.0,
            Core::Segment { a, b, .. } => (b - a).length() * 0.5,
            Core::Box { half_extents, .. } => half_extents.length(),
            Core::HalfSpace { .. } => f32::INFINITY,
        }
    }

    /// Closest point of the skeleton to `p`.
    pub fn project(&self, p: Vec3) -> Vec3 {
        match *self {
            Core::Point { center, .. } => center,
            Core::Segment { a, b, .. } => closest_point_on_segment(a, b, p),
            Core::Box {
                center,
                rotation,
                half_extents,
                ..
            } => {
                let local = rotation.inverse() * (p - center);
                center + rotation * local.clamp(-half_extents, half_extents)
            }
            Core::HalfSpace { normal, offset } => {
                let above = p.dot(normal) - offset;
                p - normal * above.max(0.0)
            }
        }
    }

    /// Skeleton point furthest along `dir`.
    pub fn support(&self, dir: Vec3) -> Vec3 {
        match *self {
            Core::Point { center, .. } => center,
            Core::Segment { a, b, .. } => {
                if a.dot(dir) >= b.dot(dir) {
                    a
                } else {
                    b
                }
            }
            Core::Box {
                center,
                rotation,
                half_extents,
                ..
            } => {
                let local = rotation.inverse() * dir;
                let corner = Vec3::new(
                    half_extents.x.copysign(local.x),
                    half_extents.y.copysign(local.y),
                    half_extents.z.copysign(local.z),
                );
                center + rotation * corner
            }
            Core::HalfSpace { normal, offset } => normal * offset,
        }
    }

    fn face_axes(&self, out: &mut Vec<Vec3>) {
        if let Core::Box { rotation, .. } = *self {
            out.extend([rotation * Vec3::X, rotation * Vec3::Y, rotation * Vec3::Z]);
        }
    }

    fn edge_axes(&self, out: &mut Vec<Vec3>) {
        match *self {
            Core::Segment { a, b, .. } => {
                if let Some(dir) = (b - a).try_normalize() {
                    out.push(dir);
                }
            }
            Core::Box { .. } => self.face_axes(out),
            _ => {}
        }
    }
}

/// Signed distance between two cores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Separation {
    /// Negative when the shapes overlap.
    pub distance: f32,
    /// Unit normal pointing from B toward A.
    pub normal: Vec3,
    pub point_on_a: Vec3,
    pub point_on_b: Vec3,
}

impl Separation {
    fn flipped(self) -> Self {
        Self {
            distance: self.distance,
            normal: -self.normal,
            point_on_a: self.point_on_b,
            point_on_b: self.point_on_a,
        }
    }
}

pub fn closest_point_on_segment(a: Vec3, b: Vec3, p: Vec3) -> Vec3 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq < 1e-12 {
        return a;
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    a + ab * t
}

/// Closest points between segments `p1q1` and `p2q2`.
pub fn closest_points_between_segments(p1: Vec3, q1: Vec3, p2: Vec3, q2: Vec3) -> (Vec3, Vec3) {
    let d1 = q1 - p1;
    let d2 = q2 - p2;
    let r = p1 - p2;
    let a = d1.length_squared();
    let e = d2.length_squared();
    let f = d2.dot(r);

    if a <= EPSILON && e <= EPSILON {
        return (p1, p2);
    }
    let (s, t) = if a <= EPSILON {
        (0.0, (f / e).clamp(0.0, 1.0))
    } else {
        let c = d1.dot(r);
        if e <= EPSILON {
            ((-c / a).clamp(0.0, 1.0), 0.0)
        } else {
            let b = d1.dot(d2);
            let denom = a * e - b * b;
            let mut s = if denom > EPSILON {
                ((b * f - c * e) / denom).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let mut t = (b * s + f) / e;
            if t < 0.0 {
                t = 0.0;
                s = (-c / a).clamp(0.0, 1.0);
            } else if t > 1.0 {
                t = 1.0;
                s = ((b - c) / a).clamp(0.0, 1.0);
            }
            (s, t)
        }
    };
    (p1 + d1 * s, p2 + d2 * t)
}

fn closest_skeleton_points(a: &Core, b: &Core) -> (Vec3, Vec3) {
    match (*a, *b) {
        (Core::Point { center, .. }, _) => (center, b.project(center)),
        (_, Core::Point { center, .. }) => (a.project(center), center),
        (Core::Segment { a: p1, b: q1, .. }, Core::Segment { a: p2, b: q2, .. }) => {
            closest_points_between_segments(p1, q1, p2, q2)
        }
        _ => {
            let mut pb = b.project(a.center());
            let mut pa = a.project(pb);
            for _ in 0..PROJECTION_ITERATIONS {
                let next_b = b.project(pa);
                let next_a = a.project(next_b);
                let moved = (next_a - pa).length_squared() + (next_b - pb).length_squared();
                pa = next_a;
                pb = next_b;
                if moved < EPSILON * EPSILON {
                    break;
                }
            }
            (pa, pb)
        }
    }
}

/// Signed distance between `a` and `b`; `None` for two half-spaces.
pub fn separation(a: &Core, b: &Core) -> Option<Separation> {
    match (*a, *b) {
        (Core::HalfSpace { .. }, Core::HalfSpace { .. }) => None,
        (_, Core::HalfSpace { normal, offset }) => Some(against_half_space(a, normal, offset)),
        (Core::HalfSpace { normal, offset }, _) => {
            Some(against_half_space(b, normal, offset).flipped())
        }
        _ => Some(between_cores(a, b)),
    }
}

fn against_half_space(core: &Core, normal: Vec3, offset: f32) -> Separation {
    let deepest = core.support(-normal) - normal * core.radius();
    let distance = deepest.dot(normal) - offset;
    Separation {
        distance,
        normal,
        point_on_a: deepest,
        point_on_b: deepest - normal * distance,
    }
}

fn between_cores(a: &Core, b: &Core) -> Separation {
    let (pa, pb) = closest_skeleton_points(a, b);
    let gap = pa - pb;
    let len = gap.length();
    if len > SKELETON_OVERLAP {
        let normal = gap / len;
        return Separation {
            distance: len - a.radius() - b.radius(),
            normal,
            point_on_a: pa - normal * a.radius(),
            point_on_b: pb + normal * b.radius(),
        };
    }
    deep_penetration(a, b)
}

/// Minimum-overlap axis over box faces, edge cross products and the
/// center offset.
fn deep_penetration(a: &Core, b: &Core) -> Separation {
    let mut axes = Vec::with_capacity(24);
    a.face_axes(&mut axes);
    b.face_axes(&mut axes);

    let mut edges_a = Vec::with_capacity(3);
    let mut edges_b = Vec::with_capacity(3);
    a.edge_axes(&mut edges_a);
    b.edge_axes(&mut edges_b);
    for ea in &edges_a {
        for eb in &edges_b {
            axes.push(ea.cross(*eb));
        }
    }
    for e in edges_a.iter().chain(edges_b.iter()) {
        axes.extend([e.cross(Vec3::X), e.cross(Vec3::Y), e.cross(Vec3::Z)]);
    }
    axes.push(a.center() - b.center());
    axes.push(Vec3::Y);

    let (ra, rb) = (a.radius(), b.radius());
    let mut best = (f32::INFINITY, Vec3::Y);
    for axis in axes.into_iter().filter_map(Vec3::try_normalize) {
        for n in [axis, -axis] {
            let b_max = b.support(n).dot(n) + rb;
            let a_min = a.support(-n).dot(n) - ra;
            let overlap = b_max - a_min;
            if overlap < best.0 {
                best = (overlap, n);
            }
        }
    }

    let (overlap, normal) = best;
    let point_on_b = b.support(normal) + normal * rb;
    Separation {
        distance: -overlap,
        normal,
        point_on_a: point_on_b - normal * overlap,
        point_on_b,
    }
}

/// First contact of a swept convex shape against a static core.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepHit {
    pub fraction: f32,
    /// Points from the target toward the swept shape.
    pub normal: Vec3,
    pub point: Vec3,
}

/// Conservative advancement of `shape` from `start` to `end` against
/// `target`.
///
/// Contact counts only while the shape approaches the target along the
/// contact normal, so sliding along or leaving a touched surface is not a
/// hit. Overlap shallower than `allowed_penetration` is tolerated.
pub fn convex_sweep(
    shape: &ConvexShape,
    start: &Pose,
    end: &Pose,
    target: &Core,
    allowed_penetration: f32,
) -> Option<SweepHit> {
    let delta = end.position - start.position;
    let rotation_bound =
        start.rotation.angle_between(end.rotation) * shape.core(start).skeleton_extent();
    let threshold = CONTACT_TOLERANCE - allowed_penetration.max(0.0);
    let aim = threshold - CONTACT_TOLERANCE * 0.5;

    let mut t = 0.0_f32;
    let mut last = None;
    for _ in 0..MAX_ADVANCE_ITERATIONS {
        let pose = start.lerp(end, t);
        let sep = separation(&shape.core(&pose), target)?;
        let closing = -delta.dot(sep.normal);
        if sep.distance <= threshold {
            if closing > EPSILON {
                return Some(SweepHit {
                    fraction: t,
                    normal: sep.normal,
                    point: sep.point_on_b,
                });
            }
            return None;
        }

        let speed = closing + rotation_bound;
        if speed <= EPSILON {
            return None;
        }
        t += (sep.distance - aim) / speed;
        if t > 1.0 {
            return None;
        }
        last = Some(sep);
    }

    // Out of iterations while still closing in; report the conservative
    // time so the caller never tunnels.
    last.map(|sep| SweepHit {
        fraction: t.clamp(0.0, 1.0),
        normal: sep.normal,
        point: sep.point_on_b,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::ColliderShape;
    use approx::assert_relative_eq;

    fn sphere(center: Vec3, radius: f32) -> Core {
        Core::Point { center, radius }
    }

    #[test]
    fn sphere_distance_and_normal() {
        let sep = separation(&sphere(Vec3::new(3.0, 0.0, 0.0), 1.0), &sphere(Vec3::ZERO, 1.0))
            .unwrap();
        assert_relative_eq!(sep.distance, 1.0, epsilon = 1e-5);
        assert_relative_eq!(sep.normal.x, 1.0, epsilon = 1e-5);
        assert_relative_eq!(sep.point_on_b.x, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn half_space_penetration_is_negative() {
        let ground = Core::HalfSpace {
            normal: Vec3::Y,
            offset: 0.0,
        };
        let sep = separation(&sphere(Vec3::new(0.0, 0.25, 0.0), 0.5), &ground).unwrap();
        assert_relative_eq!(sep.distance, -0.25, epsilon = 1e-5);
        assert_relative_eq!(sep.normal.y, 1.0, epsilon = 1e-5);

        let flipped = separation(&ground, &sphere(Vec3::new(0.0, 0.25, 0.0), 0.5)).unwrap();
        assert_relative_eq!(flipped.normal.y, -1.0, epsilon = 1e-5);
    }

    #[test]
    fn point_inside_box_pushes_out_through_nearest_face() {
        let block = Core::Box {
            center: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            half_extents: Vec3::new(2.0, 1.0, 2.0),
            radius: 0.0,
        };
        let sep = separation(&sphere(Vec3::new(0.0, 0.8, 0.0), 0.1), &block).unwrap();
        assert_relative_eq!(sep.normal.y, 1.0, epsilon = 1e-5);
        assert_relative_eq!(sep.distance, -0.3, epsilon = 1e-4);
    }

    #[test]
    fn capsule_beside_box() {
        let block = Core::Box {
            center: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            half_extents: Vec3::ONE,
            radius: 0.0,
        };
        let capsule = Core::Segment {
            a: Vec3::new(2.0, -0.5, 0.0),
            b: Vec3::new(2.0, 0.5, 0.0),
            radius: 0.5,
        };
        let sep = separation(&capsule, &block).unwrap();
        assert_relative_eq!(sep.distance, 0.5, epsilon = 1e-3);
        assert_relative_eq!(sep.normal.x, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn sweep_stops_at_wall() {
        let shape = ConvexShape::new(ColliderShape::sphere(0.5).unwrap()).unwrap();
        let wall = Core::HalfSpace {
            normal: Vec3::NEG_X,
            offset: -3.0,
        };
        let start = Pose::IDENTITY;
        let end = Pose::from_position(Vec3::new(5.0, 0.0, 0.0));
        let hit = convex_sweep(&shape, &start, &end, &wall, 0.0).unwrap();
        assert_relative_eq!(hit.fraction * 5.0, 2.5, epsilon = 1e-3);
        assert_relative_eq!(hit.normal.x, -1.0, epsilon = 1e-5);
    }

    #[test]
    fn sweep_parallel_to_touching_surface_is_a_miss() {
        let shape = ConvexShape::new(ColliderShape::sphere(0.5).unwrap()).unwrap();
        let ground = Core::HalfSpace {
            normal: Vec3::Y,
            offset: 0.0,
        };
        let start = Pose::from_position(Vec3::new(0.0, 0.5, 0.0));
        let end = Pose::from_position(Vec3::new(4.0, 0.5, 0.0));
        assert!(convex_sweep(&shape, &start, &end, &ground, 0.0).is_none());
    }

    #[test]
    fn zero_length_sweep_is_a_miss() {
        let shape = ConvexShape::new(ColliderShape::sphere(0.5).unwrap()).unwrap();
        let target = sphere(Vec3::new(0.2, 0.0, 0.0), 0.5);
        assert!(convex_sweep(&shape, &Pose::IDENTITY, &Pose::IDENTITY, &target, 0.0).is_none());
    }

    #[test]
    fn sweep_against_sphere_converges() {
        let shape = ConvexShape::new(ColliderShape::sphere(0.5).unwrap()).unwrap();
        let target = sphere(Vec3::new(4.0, 0.3, 0.0), 1.0);
        let end = Pose::from_position(Vec3::new(8.0, 0.0, 0.0));
        let hit = convex_sweep(&shape, &Pose::IDENTITY, &end, &target, 0.0).unwrap();
        let at_hit = Vec3::new(8.0 * hit.fraction, 0.0, 0.0);
        assert_relative_eq!((at_hit - Vec3::new(4.0, 0.3, 0.0)).length(), 1.5, epsilon = 1e-2);
    }
}
