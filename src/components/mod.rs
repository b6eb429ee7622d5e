use std::sync::Arc;

use glam::{Quat, Vec3};

use crate::collision::Pose;
use crate::simulation::{BodyRegistration, CharacterHandle};

/// Spatial transform with position, rotation, and scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalTransform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl LocalTransform {
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }

    pub fn from_pose(pose: &Pose) -> Self {
        Self {
            position: pose.position,
            rotation: pose.rotation,
            scale: Vec3::ONE,
        }
    }

    pub fn pose(&self) -> Pose {
        Pose::new(self.position, self.rotation)
    }

    /// Copies position and rotation, keeping scale.
    pub fn set_pose(&mut self, pose: &Pose) {
        self.position = pose.position;
        self.rotation = pose.rotation;
    }
}

/// Rigid body owned by the simulation.
pub struct RigidBody(pub Arc<BodyRegistration>);

/// Character controller owned by the simulation.
#[derive(Clone, Copy)]
pub struct CharacterBody(pub CharacterHandle);

/// Display name used in logs.
pub struct Name(pub &'static str);
