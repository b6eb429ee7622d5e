use std::sync::Arc;

use glam::Vec3;
use hecs::{Entity, World};

use crate::character::WalkMovement;
use crate::collision::{ColliderShape, Pose};
use crate::components::Name;
use crate::dynamics::{BodyDesc, Material};
use crate::error::PhysicsResult;
use crate::simulation::{BodyRegistration, CharacterHandle, ContactCollection, Simulation};

// ---------------------------------------------------------------------------
// Player proportions
// ---------------------------------------------------------------------------

/// Collider proportions of the player capsule.
struct PlayerRig {
    radius: f32,
    /// Total capsule height, caps included.
    height: f32,
    walk_speed: f32,
}

fn default_rig() -> PlayerRig {
    PlayerRig {
        radius: 0.3,
        height: 1.8,
        walk_speed: 3.0,
    }
}

// ---------------------------------------------------------------------------
// Spawners
// ---------------------------------------------------------------------------

/// Infinite static ground plane at y = 0.
pub fn spawn_ground(world: &mut World, sim: &Simulation) -> PhysicsResult<Entity> {
    let entity = world.spawn((Name("ground"),));
    let desc = BodyDesc::fixed(ColliderShape::plane(Vec3::Y, 0.0)?, Pose::IDENTITY).with_material(
        Material {
            friction: 0.8,
            restitution: 0.0,
        },
    );
    sim.attach_to_scene(world, entity, desc, ContactCollection::Off)?;
    Ok(entity)
}

/// Static axis-aligned box. `pos` is the world-space center.
pub fn spawn_static_box(
    world: &mut World,
    sim: &Simulation,
    pos: Vec3,
    half_extents: Vec3,
) -> PhysicsResult<Entity> {
    let entity = world.spawn((Name("box"),));
    let desc = BodyDesc::fixed(ColliderShape::cuboid(half_extents)?, Pose::from_position(pos))
        .with_material(Material {
            friction: 0.8,
            restitution: 0.0,
        });
    sim.attach_to_scene(world, entity, desc, ContactCollection::Off)?;
    Ok(entity)
}

/// Dynamic sphere that collects contacts, so gameplay can ask whether it
/// is resting on something.
pub fn spawn_physics_sphere(
    world: &mut World,
    sim: &Simulation,
    pos: Vec3,
    radius: f32,
    initial_vel: Vec3,
) -> PhysicsResult<(Entity, Arc<BodyRegistration>)> {
    let entity = world.spawn((Name("sphere"),));
    let desc = BodyDesc::dynamic(ColliderShape::sphere(radius)?, Pose::from_position(pos))
        .with_density(400.0)
        .with_velocity(initial_vel)
        .with_damping(0.5, 0.5)
        .with_material(Material {
            friction: 0.7,
            restitution: 0.3,
        });
    let registration = sim.attach_to_scene(world, entity, desc, ContactCollection::Default)?;
    Ok((entity, registration))
}

/// Capsule character walking along `walk_dir`. `pos` is the capsule center.
pub fn spawn_player(
    world: &mut World,
    sim: &Simulation,
    pos: Vec3,
    walk_dir: Vec3,
) -> PhysicsResult<(Entity, CharacterHandle)> {
    let rig = default_rig();
    let entity = world.spawn((Name("player"),));

    let mut movement = WalkMovement::new();
    movement.desired_velocity = walk_dir.normalize_or_zero() * rig.walk_speed;

    let handle = sim.attach_character_to_scene(
        world,
        entity,
        ColliderShape::capsule(rig.radius, rig.height)?,
        Pose::from_position(pos),
        Some(Box::new(movement)),
    )?;
    Ok((entity, handle))
}
