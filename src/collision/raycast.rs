use glam::Vec3;

use super::{ColliderShape, Pose};

/// Ray against one shape. `dir` must be unit length. Returns the hit
/// distance and the surface normal there.
///
/// Rays starting inside a solid report the exit point, except for planes
/// where the origin itself is the hit.
pub fn ray_shape(shape: &ColliderShape, pose: &Pose, origin: Vec3, dir: Vec3) -> Option<(f32, Vec3)> {
    match *shape {
        ColliderShape::Sphere { radius } => {
            let t = ray_sphere_intersection(origin, dir, pose.position, radius)?;
            let normal = (origin + dir * t - pose.position).normalize_or(Vec3::Y);
            Some((t, normal))
        }
        ColliderShape::Capsule { radius, height } => {
            let local_origin = pose.rotation.inverse() * (origin - pose.position);
            let local_dir = pose.rotation.inverse() * dir;
            let (t, normal) =
                ray_capsule_intersection(local_origin, local_dir, radius, height * 0.5 - radius)?;
            Some((t, pose.rotation * normal))
        }
        ColliderShape::Box { half_extents } => {
            let local_origin = pose.rotation.inverse() * (origin - pose.position);
            let local_dir = pose.rotation.inverse() * dir;
            let (t, normal) = ray_aabb_intersection(local_origin, local_dir, half_extents)?;
            Some((t, pose.rotation * normal))
        }
        ColliderShape::Plane { normal, offset } => {
            let normal = pose.rotation * normal;
            let offset = offset + normal.dot(pose.position);
            ray_plane_intersection(origin, dir, normal, offset).map(|t| (t, normal))
        }
    }
}

fn ray_sphere_intersection(origin: Vec3, dir: Vec3, center: Vec3, radius: f32) -> Option<f32> {
    let oc = origin - center;
    let a = dir.dot(dir);
    let b = 2.0 * oc.dot(dir);
    let c = oc.dot(oc) - radius * radius;
    let discriminant = b * b - 4.0 * a * c;

    if discriminant < 0.0 {
        return None;
    }

    let sqrt_d = discriminant.sqrt();
    let t1 = (-b - sqrt_d) / (2.0 * a);
    let t2 = (-b + sqrt_d) / (2.0 * a);

    if t1 > 0.0 {
        Some(t1)
    } else if t2 > 0.0 {
        Some(t2)
    } else {
        None
    }
}

/// Capsule along local Y with caps centered at `±half_segment`.
fn ray_capsule_intersection(
    origin: Vec3,
    dir: Vec3,
    radius: f32,
    half_segment: f32,
) -> Option<(f32, Vec3)> {
    let mut best: Option<(f32, Vec3)> = None;
    let mut consider = |t: f32, normal: Vec3| {
        if t > 0.0 && best.map_or(true, |(b, _)| t < b) {
            best = Some((t, normal));
        }
    };

    // Cylinder wall, clipped to the segment.
    let a = dir.x * dir.x + dir.z * dir.z;
    if a > 1e-12 {
        let b = 2.0 * (origin.x * dir.x + origin.z * dir.z);
        let c = origin.x * origin.x + origin.z * origin.z - radius * radius;
        let discriminant = b * b - 4.0 * a * c;
        if discriminant >= 0.0 {
            let sqrt_d = discriminant.sqrt();
            for t in [(-b - sqrt_d) / (2.0 * a), (-b + sqrt_d) / (2.0 * a)] {
                let p = origin + dir * t;
                if p.y.abs() <= half_segment {
                    consider(t, Vec3::new(p.x, 0.0, p.z).normalize_or(Vec3::X));
                }
            }
        }
    }

    for cap in [Vec3::Y * half_segment, Vec3::NEG_Y * half_segment] {
        if let Some(t) = ray_sphere_intersection(origin, dir, cap, radius) {
            let p = origin + dir * t;
            // Only the outer hemisphere belongs to the capsule surface.
            if (p.y - cap.y) * cap.y.signum() >= -1e-5 {
                consider(t, (p - cap).normalize_or(Vec3::Y));
            }
        }
    }

    best
}

fn ray_aabb_intersection(origin: Vec3, dir: Vec3, half: Vec3) -> Option<(f32, Vec3)> {
    let min = -half;
    let max = half;
    let inv_dir = Vec3::ONE / dir;

    let t1 = (min - origin) * inv_dir;
    let t2 = (max - origin) * inv_dir;
    let near = t1.min(t2);
    let far = t1.max(t2);

    let tmin = near.max_element();
    let tmax = far.min_element();

    if tmax < 0.0 || tmin > tmax {
        return None;
    }

    // Starting inside the box reports the exit face.
    let (t, faces, sign) = if tmin < 0.0 {
        (tmax, far, 1.0)
    } else {
        (tmin, near, -1.0)
    };
    let axis = if faces.x == t {
        Vec3::X * dir.x.signum()
    } else if faces.y == t {
        Vec3::Y * dir.y.signum()
    } else {
        Vec3::Z * dir.z.signum()
    };
    Some((t, axis * sign))
}

fn ray_plane_intersection(origin: Vec3, dir: Vec3, normal: Vec3, offset: f32) -> Option<f32> {
    let height = origin.dot(normal) - offset;
    if height <= 0.0 {
        return Some(0.0);
    }
    let approach = -dir.dot(normal);
    if approach <= 1e-9 {
        return None;
    }
    Some(height / approach)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Quat;

    #[test]
    fn ray_hits_box_face_normal() {
        let shape = ColliderShape::cuboid(Vec3::ONE).unwrap();
        let pose = Pose::from_position(Vec3::new(5.0, 0.0, 0.0));
        let (t, n) = ray_shape(&shape, &pose, Vec3::ZERO, Vec3::X).unwrap();
        assert_relative_eq!(t, 4.0, epsilon = 1e-5);
        assert_relative_eq!(n.x, -1.0, epsilon = 1e-5);
    }

    #[test]
    fn ray_hits_capsule_side_and_cap() {
        let shape = ColliderShape::capsule(0.5, 2.0).unwrap();
        let pose = Pose::IDENTITY;
        let (t, n) = ray_shape(&shape, &pose, Vec3::new(-3.0, 0.2, 0.0), Vec3::X).unwrap();
        assert_relative_eq!(t, 2.5, epsilon = 1e-5);
        assert_relative_eq!(n.x, -1.0, epsilon = 1e-5);

        let (t, n) = ray_shape(&shape, &pose, Vec3::new(0.0, 5.0, 0.0), Vec3::NEG_Y).unwrap();
        assert_relative_eq!(t, 4.0, epsilon = 1e-5);
        assert_relative_eq!(n.y, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn rotated_box_uses_local_frame() {
        let shape = ColliderShape::cuboid(Vec3::new(2.0, 0.5, 0.5)).unwrap();
        let pose = Pose::new(
            Vec3::new(0.0, 5.0, 0.0),
            Quat::from_rotation_z(std::f32::consts::FRAC_PI_2),
        );
        let (t, _) = ray_shape(&shape, &pose, Vec3::ZERO, Vec3::Y).unwrap();
        assert_relative_eq!(t, 3.0, epsilon = 1e-4);
    }

    #[test]
    fn ray_misses_plane_when_parallel() {
        let plane = ColliderShape::plane(Vec3::Y, 0.0).unwrap();
        assert!(ray_shape(&plane, &Pose::IDENTITY, Vec3::Y, Vec3::X).is_none());
        let (t, _) = ray_shape(&plane, &Pose::IDENTITY, Vec3::Y * 2.0, Vec3::NEG_Y).unwrap();
        assert_relative_eq!(t, 2.0);
    }
}
