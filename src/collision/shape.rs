use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use super::narrow::Core;
use super::{Aabb, Pose};
use crate::error::{PhysicsError, PhysicsResult};

/// Collision shape attached to a body.
///
/// Capsules and boxes are oriented by the owning pose; the capsule axis is
/// local Y and `height` is the total height including both caps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ColliderShape {
    Sphere { radius: f32 },
    Capsule { radius: f32, height: f32 },
    Box { half_extents: Vec3 },
    Plane { normal: Vec3, offset: f32 },
}

impl ColliderShape {
    pub fn sphere(radius: f32) -> PhysicsResult<Self> {
        if !(radius > 0.0) {
            return Err(PhysicsError::InvalidShape(format!(
                "sphere radius must be positive, got {radius}"
            )));
        }
        Ok(Self::Sphere { radius })
    }

    /// Capsule of total `height`. The cylindrical part must have positive
    /// length, so `height` has to exceed `2 * radius`.
    pub fn capsule(radius: f32, height: f32) -> PhysicsResult<Self> {
        if !(radius > 0.0) {
            return Err(PhysicsError::InvalidShape(format!(
                "capsule radius must be positive, got {radius}"
            )));
        }
        if height - 2.0 * radius <= 0.0 {
            return Err(PhysicsError::InvalidShape(format!(
                "capsule height {height} must exceed 2 * radius ({})",
                2.0 * radius
            )));
        }
        Ok(Self::Capsule { radius, height })
    }

    pub fn cuboid(half_extents: Vec3) -> PhysicsResult<Self> {
        if !half_extents.cmpgt(Vec3::ZERO).all() {
            return Err(PhysicsError::InvalidShape(format!(
                "box half extents must be positive, got {half_extents}"
            )));
        }
        Ok(Self::Box { half_extents })
    }

    /// Half-space `dot(p, normal) <= offset`. The normal is normalized here.
    pub fn plane(normal: Vec3, offset: f32) -> PhysicsResult<Self> {
        let normal = normal.try_normalize().ok_or_else(|| {
            PhysicsError::InvalidShape("plane normal must not be zero".into())
        })?;
        Ok(Self::Plane { normal, offset })
    }

    pub fn is_convex(&self) -> bool {
        !matches!(self, Self::Plane { .. })
    }

    /// Re-checks dimensions of a shape built by hand rather than through the
    /// constructors.
    pub fn validate(&self) -> PhysicsResult<()> {
        match *self {
            Self::Sphere { radius } => Self::sphere(radius).map(|_| ()),
            Self::Capsule { radius, height } => Self::capsule(radius, height).map(|_| ()),
            Self::Box { half_extents } => Self::cuboid(half_extents).map(|_| ()),
            Self::Plane { normal, offset } => Self::plane(normal, offset).map(|_| ()),
        }
    }

    /// Volume used to derive mass from density.
    pub fn volume(&self) -> f32 {
        use std::f32::consts::PI;
        match *self {
            Self::Sphere { radius } => 4.0 / 3.0 * PI * radius.powi(3),
            Self::Capsule { radius, height } => {
                let cylinder = height - 2.0 * radius;
                PI * radius * radius * cylinder + 4.0 / 3.0 * PI * radius.powi(3)
            }
            Self::Box { half_extents } => 8.0 * half_extents.x * half_extents.y * half_extents.z,
            Self::Plane { .. } => f32::INFINITY,
        }
    }

    /// Core geometry placed at `pose`, inflated by `margin`.
    pub fn core(&self, pose: &Pose, margin: f32) -> Core {
        match *self {
            Self::Sphere { radius } => Core::Point {
                center: pose.position,
                radius: radius + margin,
            },
            Self::Capsule { radius, height } => {
                let half = pose.rotation * Vec3::Y * (height * 0.5 - radius);
                Core::Segment {
                    a: pose.position - half,
                    b: pose.position + half,
                    radius: radius + margin,
                }
            }
            Self::Box { half_extents } => Core::Box {
                center: pose.position,
                rotation: pose.rotation,
                half_extents,
                radius: margin,
            },
            Self::Plane { normal, offset } => {
                // Planes live in world space; the pose only translates them.
                let normal = pose.rotation * normal;
                Core::HalfSpace {
                    normal,
                    offset: offset + normal.dot(pose.position) + margin,
                }
            }
        }
    }

    pub fn aabb(&self, pose: &Pose, margin: f32) -> Aabb {
        match *self {
            Self::Sphere { radius } => {
                let r = Vec3::splat(radius + margin);
                Aabb::new(pose.position - r, pose.position + r)
            }
            Self::Capsule { radius, height } => {
                let half = pose.rotation * Vec3::Y * (height * 0.5 - radius);
                let r = Vec3::splat(radius + margin);
                let a = pose.position - half;
                let b = pose.position + half;
                Aabb::new(a.min(b) - r, a.max(b) + r)
            }
            Self::Box { half_extents } => {
                let extent = rotated_extent(pose.rotation, half_extents) + Vec3::splat(margin);
                Aabb::new(pose.position - extent, pose.position + extent)
            }
            Self::Plane { .. } => Aabb::infinite(),
        }
    }
}

fn rotated_extent(rotation: Quat, half_extents: Vec3) -> Vec3 {
    let x = (rotation * Vec3::X * half_extents.x).abs();
    let y = (rotation * Vec3::Y * half_extents.y).abs();
    let z = (rotation * Vec3::Z * half_extents.z).abs();
    x + y + z
}

/// A convex shape plus the collision margin it is queried with.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvexShape {
    shape: ColliderShape,
    margin: f32,
}

impl ConvexShape {
    pub fn new(shape: ColliderShape) -> PhysicsResult<Self> {
        if !shape.is_convex() {
            return Err(PhysicsError::MissingConvexShape);
        }
        shape.validate()?;
        Ok(Self { shape, margin: 0.0 })
    }

    pub fn shape(&self) -> &ColliderShape {
        &self.shape
    }

    pub fn margin(&self) -> f32 {
        self.margin
    }

    pub fn set_margin(&mut self, margin: f32) {
        self.margin = margin.max(0.0);
    }

    /// Temporarily grows the margin by `added`. The previous margin comes
    /// back when the guard drops.
    pub fn enlarge_margin(&mut self, added: f32) -> MarginOverride<'_> {
        let previous = self.margin;
        self.margin = previous + added;
        MarginOverride {
            shape: self,
            previous,
        }
    }

    pub fn core(&self, pose: &Pose) -> Core {
        self.shape.core(pose, self.margin)
    }

    pub fn aabb(&self, pose: &Pose) -> Aabb {
        self.shape.aabb(pose, self.margin)
    }
}

/// Scoped margin override returned by [`ConvexShape::enlarge_margin`].
pub struct MarginOverride<'a> {
    shape: &'a mut ConvexShape,
    previous: f32,
}

impl std::ops::Deref for MarginOverride<'_> {
    type Target = ConvexShape;

    fn deref(&self) -> &ConvexShape {
        self.shape
    }
}

impl Drop for MarginOverride<'_> {
    fn drop(&mut self) {
        self.shape.margin = self.previous;
    }
}
