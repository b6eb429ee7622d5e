use glam::Vec3;

use super::world::Body;

/// Below this approach speed a contact is treated as resting and does not
/// bounce.
const REST_VELOCITY_THRESHOLD: f32 = 0.5;

/// One penetrating pair.
/// `normal` points from `b` toward `a`: moving `a` along it separates them.
pub(super) struct ContactConstraint {
    pub a: u32,
    pub b: u32,
    pub normal: Vec3,
    pub depth: f32,
    pub restitution: f32,
    pub friction: f32,
}

/// Impulse response over all contacts, `iterations` passes, followed by a
/// single positional push split by inverse mass.
pub(super) fn resolve(bodies: &mut [Option<Body>], contacts: &[ContactConstraint], iterations: u32) {
    for _ in 0..iterations {
        for c in contacts {
            apply_impulse(bodies, c);
        }
    }
    for c in contacts {
        separate(bodies, c);
    }
}

fn pair_mut(bodies: &mut [Option<Body>], a: u32, b: u32) -> Option<(&mut Body, &mut Body)> {
    let (a, b) = (a as usize, b as usize);
    if a == b || a >= bodies.len() || b >= bodies.len() {
        return None;
    }
    let (a_slot, b_slot) = if a < b {
        let (lo, hi) = bodies.split_at_mut(b);
        (&mut lo[a], &mut hi[0])
    } else {
        let (lo, hi) = bodies.split_at_mut(a);
        (&mut hi[0], &mut lo[b])
    };
    Some((a_slot.as_mut()?, b_slot.as_mut()?))
}

fn apply_impulse(bodies: &mut [Option<Body>], c: &ContactConstraint) {
    let Some((a, b)) = pair_mut(bodies, c.a, c.b) else {
        return;
    };
    let inv_sum = a.inv_mass + b.inv_mass;
    if inv_sum <= 0.0 {
        return;
    }

    let n = c.normal;
    let relative = a.linear_velocity - b.linear_velocity;
    let vel_along_n = relative.dot(n);
    // Negative = A moving into B.
    if vel_along_n >= 0.0 {
        return;
    }

    let e = if -vel_along_n < REST_VELOCITY_THRESHOLD {
        0.0
    } else {
        c.restitution
    };
    let j = -(1.0 + e) * vel_along_n / inv_sum;
    a.linear_velocity += n * (j * a.inv_mass);
    b.linear_velocity -= n * (j * b.inv_mass);

    // Coulomb friction: never reverses the sliding direction.
    let relative = a.linear_velocity - b.linear_velocity;
    let tangent_vel = relative - relative.dot(n) * n;
    let tangent_speed = tangent_vel.length();
    if tangent_speed < 1e-6 {
        return;
    }
    let tangent_dir = tangent_vel / tangent_speed;
    let jt = (c.friction * j).min(tangent_speed / inv_sum);
    a.linear_velocity -= tangent_dir * (jt * a.inv_mass);
    b.linear_velocity += tangent_dir * (jt * b.inv_mass);
}

fn separate(bodies: &mut [Option<Body>], c: &ContactConstraint) {
    let Some((a, b)) = pair_mut(bodies, c.a, c.b) else {
        return;
    };
    let inv_sum = a.inv_mass + b.inv_mass;
    if inv_sum <= 0.0 {
        return;
    }
    let push = c.normal * c.depth;
    a.pose.position += push * (a.inv_mass / inv_sum);
    b.pose.position -= push * (b.inv_mass / inv_sum);
}
