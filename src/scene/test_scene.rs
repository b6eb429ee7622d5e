use glam::Vec3;
use hecs::World;

use crate::error::PhysicsResult;
use crate::scene::prefabs::{spawn_ground, spawn_physics_sphere, spawn_player, spawn_static_box};
use crate::simulation::{CharacterHandle, Simulation};

/// Build and populate the demo scene: ground, a few boxes, falling spheres
/// and a walking player. Returns the player's character handle.
pub fn load_test_scene(world: &mut World, sim: &Simulation) -> PhysicsResult<CharacterHandle> {
    spawn_ground(world, sim)?;

    // Boxes scattered around spawn
    for &(x, z, h) in &[(6.0_f32, -4.0_f32, 2.0_f32), (-5.0, 3.0, 3.5), (3.0, 7.0, 1.5)] {
        spawn_static_box(world, sim, Vec3::new(x, h / 2.0, z), Vec3::new(2.5, h / 2.0, 3.5))?;
    }

    spawn_physics_sphere(world, sim, Vec3::new(0.0, 2.0, -3.0), 0.5, Vec3::new(0.0, 5.0, 0.0))?;
    spawn_physics_sphere(world, sim, Vec3::new(1.5, 6.0, -2.0), 0.35, Vec3::ZERO)?;

    // Spawns slightly above the ground and walks toward the first box.
    let (_, player) = spawn_player(world, sim, Vec3::new(0.0, 1.0, 0.0), Vec3::new(1.0, 0.0, -0.6))?;
    Ok(player)
}
