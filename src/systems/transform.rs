use std::collections::HashMap;

use hecs::{Entity, World};
use rayon::prelude::*;

use crate::collision::Pose;
use crate::components::LocalTransform;

/// Writes simulated poses into the matching entities' `LocalTransform`.
///
/// Each entity's transform is written by exactly one worker, so the parallel
/// path needs no synchronisation beyond the query borrow. Entities without a
/// pose are left untouched.
pub fn sync_transforms(world: &mut World, poses: &HashMap<Entity, Pose>, parallel: bool) {
    if poses.is_empty() {
        return;
    }
    let mut targets: Vec<(Entity, &mut LocalTransform)> =
        world.query_mut::<&mut LocalTransform>().into_iter().collect();

    let apply = |(entity, transform): &mut (Entity, &mut LocalTransform)| {
        if let Some(pose) = poses.get(entity) {
            transform.set_pose(pose);
        }
    };
    if parallel {
        targets.par_iter_mut().for_each(apply);
    } else {
        targets.iter_mut().for_each(apply);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn serial_and_parallel_agree() {
        for parallel in [false, true] {
            let mut world = World::new();
            let moved: Vec<Entity> = (0..32)
                .map(|_| world.spawn((LocalTransform::new(Vec3::ZERO),)))
                .collect();
            let untouched = world.spawn((LocalTransform::new(Vec3::NEG_ONE),));

            let poses: HashMap<Entity, Pose> = moved
                .iter()
                .enumerate()
                .map(|(i, e)| (*e, Pose::from_position(Vec3::X * i as f32)))
                .collect();
            sync_transforms(&mut world, &poses, parallel);

            for (i, e) in moved.iter().enumerate() {
                let t = world.get::<&LocalTransform>(*e).unwrap();
                assert_eq!(t.position, Vec3::X * i as f32);
            }
            let t = world.get::<&LocalTransform>(untouched).unwrap();
            assert_eq!(t.position, Vec3::NEG_ONE);
        }
    }
}
