use approx::assert_relative_eq;
use glam::Vec3;
use hecs::{Entity, World};
use keel::character::WalkMovement;
use keel::collision::{ColliderShape, CollisionFilter, CollisionGroups, ConvexShape, Pose};
use keel::components::LocalTransform;
use keel::dynamics::BodyDesc;
use keel::simulation::{ContactCollection, Simulation};
use keel::{PhysicsError, PhysicsSettings};

const DT: f32 = 1.0 / 60.0;

fn sim() -> Simulation {
    Simulation::new(PhysicsSettings::default()).unwrap()
}

fn ground(world: &mut World, sim: &Simulation) -> Entity {
    let entity = world.spawn(());
    let desc = BodyDesc::fixed(ColliderShape::plane(Vec3::Y, 0.0).unwrap(), Pose::IDENTITY);
    sim.attach_to_scene(world, entity, desc, ContactCollection::Off)
        .unwrap();
    entity
}

fn ball(pos: Vec3) -> BodyDesc {
    BodyDesc::dynamic(ColliderShape::sphere(0.5).unwrap(), Pose::from_position(pos))
}

// ---------------------------------------------------------------------------
// Fixed-step accumulator
// ---------------------------------------------------------------------------

#[test]
fn short_frames_accumulate_without_stepping() {
    let sim = sim();
    let mut world = World::new();

    let report = sim.simulate(DT * 0.5, &mut world);
    assert_eq!(report.steps, 0);
    assert_eq!(report.real_step, 0.0);
    assert_relative_eq!(report.remaining, DT * 0.5, epsilon = 1e-6);

    let report = sim.simulate(DT * 0.6, &mut world);
    assert_eq!(report.steps, 1);
    assert_relative_eq!(report.simulated, DT, epsilon = 1e-6);
    assert_relative_eq!(report.remaining, DT * 0.1, epsilon = 1e-5);
}

#[test]
fn long_frames_are_capped_and_carried_over() {
    let sim = sim();
    let mut world = World::new();
    let max = sim.settings().max_steps_per_frame;

    let report = sim.simulate(DT * 10.0, &mut world);
    assert_eq!(report.steps, max);
    assert_relative_eq!(report.real_step, DT * max as f32, epsilon = 1e-5);
    assert_relative_eq!(report.remaining, DT * (10 - max) as f32, epsilon = 1e-4);
    assert_relative_eq!(sim.remaining_time(), report.remaining);
}

#[test]
fn time_warp_scales_frame_time() {
    let sim = sim();
    let mut world = World::new();

    sim.set_time_warp(0.0);
    assert_eq!(sim.simulate(1.0, &mut world).steps, 0);
    assert_eq!(sim.remaining_time(), 0.0);

    sim.set_time_warp(2.0);
    assert_eq!(sim.simulate(DT, &mut world).steps, 2);
}

// ---------------------------------------------------------------------------
// Staged add / remove
// ---------------------------------------------------------------------------

#[test]
fn add_then_remove_in_one_frame_never_goes_live() {
    let sim = sim();
    let mut world = World::new();
    let e = world.spawn(());

    let reg = sim.attach_rigid_body(e, ball(Vec3::Y * 3.0), ContactCollection::Off).unwrap();
    assert!(sim.detach_rigid_body(&reg));
    sim.simulate(DT, &mut world);

    assert!(!reg.is_registered());
    assert_eq!(sim.body_count(), 0);
    assert!(matches!(sim.contacts(e), Err(PhysicsError::UnknownEntity)));
}

#[test]
fn removal_clears_handle_at_next_step_boundary() {
    let sim = sim();
    let mut world = World::new();
    let e = world.spawn(());
    let reg = sim.attach_rigid_body(e, ball(Vec3::Y * 3.0), ContactCollection::Default).unwrap();
    sim.simulate(DT, &mut world);
    assert!(reg.is_registered());

    assert!(!sim.detach_rigid_body(&reg));
    // Still live until the next drain.
    assert!(reg.is_registered());
    assert_eq!(sim.body_count(), 1);

    sim.simulate(0.0, &mut world);
    assert!(reg.handle().is_none());
    assert_eq!(sim.body_count(), 0);
    assert!(matches!(sim.contacts(e), Err(PhysicsError::UnknownEntity)));
}

#[test]
fn invalid_body_is_rejected_at_attach() {
    let sim = sim();
    let mut world = World::new();
    let e = world.spawn(());
    let err = sim
        .attach_rigid_body(e, ball(Vec3::ZERO).with_mass(0.0), ContactCollection::Off)
        .unwrap_err();
    assert!(matches!(err, PhysicsError::InvalidConfig(_)));

    let err = ColliderShape::capsule(0.5, 1.0).unwrap_err();
    assert!(matches!(err, PhysicsError::InvalidShape(_)));
}

#[test]
fn clear_unregisters_everything() {
    let sim = sim();
    let mut world = World::new();
    ground(&mut world, &sim);
    let e = world.spawn(());
    let reg = sim.attach_rigid_body(e, ball(Vec3::Y * 3.0), ContactCollection::Off).unwrap();
    sim.simulate(0.0, &mut world);
    assert_eq!(sim.body_count(), 2);

    sim.clear();
    assert_eq!(sim.body_count(), 0);
    assert!(!reg.is_registered());
    assert!(sim.raycast(Vec3::Y, Vec3::NEG_Y, 10.0, CollisionGroups::ALL, None).is_none());
}

// ---------------------------------------------------------------------------
// Transforms and contacts
// ---------------------------------------------------------------------------

#[test]
fn falling_body_syncs_to_its_entity() {
    let sim = sim();
    let mut world = World::new();
    let e = world.spawn(());
    sim.attach_to_scene(&mut world, e, ball(Vec3::Y * 10.0), ContactCollection::Off)
        .unwrap();

    for _ in 0..30 {
        sim.simulate(DT, &mut world);
    }
    let y = world.get::<&LocalTransform>(e).unwrap().position.y;
    assert!(y < 10.0 && y > 5.0, "y = {y}");
}

#[test]
fn resting_body_reports_ground_contact() {
    let sim = sim();
    let mut world = World::new();
    let floor = ground(&mut world, &sim);
    let e = world.spawn(());
    sim.attach_to_scene(&mut world, e, ball(Vec3::Y * 0.5), ContactCollection::Default)
        .unwrap();

    for _ in 0..60 {
        sim.simulate(DT, &mut world);
    }

    let contacts = sim.contacts(e).unwrap();
    assert!(!contacts.is_empty());
    assert_eq!(contacts[0].other, Some(floor));

    let contact = sim.ground_contact(e).expect("resting on the floor");
    assert_relative_eq!(contact.normal.y, 1.0, epsilon = 1e-4);
    // Contacts are only collected when asked for.
    assert!(sim.contacts(floor).unwrap().is_empty());
}

#[test]
fn full_contact_buffer_drops_extra_contacts() {
    let sim = sim();
    let mut world = World::new();
    ground(&mut world, &sim);
    let wall = world.spawn(());
    let wall_desc = BodyDesc::fixed(
        ColliderShape::cuboid(Vec3::new(0.5, 1.0, 1.0)).unwrap(),
        Pose::from_position(Vec3::new(0.95, 1.0, 0.0)),
    );
    sim.attach_to_scene(&mut world, wall, wall_desc, ContactCollection::Off)
        .unwrap();

    let e = world.spawn(());
    sim.attach_to_scene(&mut world, e, ball(Vec3::Y * 0.5), ContactCollection::Capacity(1))
        .unwrap();

    // One step: the ball sinks into the floor while overlapping the wall.
    assert_eq!(sim.simulate(DT, &mut world).steps, 1);
    assert_eq!(sim.contacts(e).unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[test]
fn raycasts_resolve_entities() {
    let sim = sim();
    let mut world = World::new();
    let floor = ground(&mut world, &sim);
    let e = world.spawn(());
    sim.attach_rigid_body(e, ball(Vec3::Y * 3.0), ContactCollection::Off).unwrap();
    sim.simulate(0.0, &mut world);

    let hit = sim
        .raycast(Vec3::Y * 10.0, Vec3::NEG_Y, 100.0, CollisionGroups::ALL, None)
        .unwrap();
    assert_eq!(hit.entity, Some(e));
    assert_relative_eq!(hit.distance, 6.5, epsilon = 1e-4);
    assert_relative_eq!(hit.normal.y, 1.0, epsilon = 1e-4);

    let all = sim.raycast_penetrating(Vec3::Y * 10.0, Vec3::NEG_Y, 100.0, CollisionGroups::ALL, None);
    assert_eq!(all.len(), 2);
    assert_eq!(all[1].entity, Some(floor));
    assert_relative_eq!(all[1].distance, 10.0, epsilon = 1e-4);

    // Only static geometry.
    let hit = sim
        .raycast_to(Vec3::Y * 10.0, Vec3::NEG_Y, CollisionGroups::STATIC, None)
        .unwrap();
    assert_eq!(hit.entity, Some(floor));
    assert_relative_eq!(hit.fraction, 10.0 / 11.0, epsilon = 1e-4);

    assert!(sim.raycast(Vec3::Y, Vec3::ZERO, 10.0, CollisionGroups::ALL, None).is_none());
    assert!(sim.raycast_to(Vec3::Y, Vec3::Y, CollisionGroups::ALL, None).is_none());
}

#[test]
fn raycasts_honor_skip() {
    let sim = sim();
    let mut world = World::new();
    let floor = ground(&mut world, &sim);
    let e = world.spawn(());
    sim.attach_rigid_body(e, ball(Vec3::Y * 3.0), ContactCollection::Off).unwrap();
    sim.simulate(0.0, &mut world);

    let hit = sim
        .raycast(Vec3::Y * 10.0, Vec3::NEG_Y, 100.0, CollisionGroups::ALL, Some(e))
        .unwrap();
    assert_eq!(hit.entity, Some(floor));
    assert_relative_eq!(hit.distance, 10.0, epsilon = 1e-4);

    let hit = sim
        .raycast_to(Vec3::Y * 10.0, Vec3::NEG_Y, CollisionGroups::ALL, Some(e))
        .unwrap();
    assert_eq!(hit.entity, Some(floor));

    let all = sim.raycast_penetrating(Vec3::Y * 10.0, Vec3::NEG_Y, 100.0, CollisionGroups::ALL, Some(floor));
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].entity, Some(e));

    // Skipping an entity with no body changes nothing.
    let stranger = world.spawn(());
    let hit = sim
        .raycast(Vec3::Y * 10.0, Vec3::NEG_Y, 100.0, CollisionGroups::ALL, Some(stranger))
        .unwrap();
    assert_eq!(hit.entity, Some(e));
}

#[test]
fn shape_sweeps_honor_skip() {
    let sim = sim();
    let mut world = World::new();
    let floor = ground(&mut world, &sim);
    sim.simulate(0.0, &mut world);

    let probe = ConvexShape::new(ColliderShape::sphere(0.5).unwrap()).unwrap();
    let start = Pose::from_position(Vec3::Y * 5.0);
    let end = Pose::from_position(Vec3::Y * -5.0);
    let filter = CollisionFilter::default();

    let hit = sim.shape_sweep(&probe, start, end, filter, None).unwrap();
    assert_eq!(hit.entity, Some(floor));
    assert_relative_eq!(hit.fraction, 0.45, epsilon = 1e-3);
    assert_relative_eq!(hit.distance, 4.5, epsilon = 1e-2);
    assert_eq!(sim.shape_sweep_penetrating(&probe, start, end, filter, None).len(), 1);

    assert!(sim.shape_sweep(&probe, start, end, filter, Some(floor)).is_none());
    assert!(sim
        .shape_sweep_penetrating(&probe, start, end, filter, Some(floor))
        .is_empty());
}

#[test]
fn queries_run_alongside_stepping() {
    let sim = sim();
    let mut world = World::new();
    ground(&mut world, &sim);
    sim.simulate(0.0, &mut world);

    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for i in 0..100 {
                    let from = Vec3::new(i as f32, 5.0, 0.0);
                    let hit = sim.raycast(from, Vec3::NEG_Y, 10.0, CollisionGroups::ALL, None);
                    assert!(hit.is_some());
                }
            });
        }
        for _ in 0..30 {
            sim.simulate(DT, &mut world);
        }
    });
}

// ---------------------------------------------------------------------------
// Characters
// ---------------------------------------------------------------------------

#[test]
fn character_lands_and_walks() {
    let sim = sim();
    let mut world = World::new();
    ground(&mut world, &sim);
    let e = world.spawn(());

    let mut walk = WalkMovement::new();
    walk.desired_velocity = Vec3::new(2.0, 0.0, 0.0);
    let player = sim
        .attach_character_to_scene(
            &mut world,
            e,
            ColliderShape::capsule(0.3, 1.8).unwrap(),
            Pose::from_position(Vec3::Y * 0.95),
            Some(Box::new(walk)),
        )
        .unwrap();

    for _ in 0..60 {
        sim.simulate(DT, &mut world);
    }

    let pose = sim.character_pose(player).unwrap();
    assert!(pose.position.x > 1.5 && pose.position.x < 2.1, "x = {}", pose.position.x);
    assert!(pose.position.y > 0.9 && pose.position.y < 0.95, "y = {}", pose.position.y);
    assert_eq!(world.get::<&LocalTransform>(e).unwrap().position, pose.position);

    let grounded = sim.with_character_mut(player, |c, _| c.on_ground()).unwrap();
    assert!(grounded);
}

#[test]
fn character_is_stopped_by_a_dynamic_crate() {
    let sim = sim();
    let mut world = World::new();
    ground(&mut world, &sim);

    // Heavy crate resting on the ground, near face at x = 1.5.
    let crate_entity = world.spawn(());
    let desc = BodyDesc::dynamic(
        ColliderShape::cuboid(Vec3::splat(0.5)).unwrap(),
        Pose::from_position(Vec3::new(2.0, 0.5, 0.0)),
    )
    .with_mass(1000.0);
    sim.attach_to_scene(&mut world, crate_entity, desc, ContactCollection::Off)
        .unwrap();

    let e = world.spawn(());
    let mut walk = WalkMovement::new();
    walk.desired_velocity = Vec3::new(3.0, 0.0, 0.0);
    let player = sim
        .attach_character_to_scene(
            &mut world,
            e,
            ColliderShape::capsule(0.3, 1.8).unwrap(),
            Pose::from_position(Vec3::Y * 0.95),
            Some(Box::new(walk)),
        )
        .unwrap();

    for _ in 0..120 {
        sim.simulate(DT, &mut world);
    }

    let x = sim.character_pose(player).unwrap().position.x;
    assert!(x > 0.9 && x < 1.3, "x = {x}");
}

#[test]
fn character_warp_and_detach() {
    let sim = sim();
    let mut world = World::new();
    let e = world.spawn(());
    let player = sim
        .attach_character(e, ColliderShape::sphere(0.4).unwrap(), Pose::IDENTITY, None, None)
        .unwrap();
    assert_eq!(sim.body_count(), 1);

    let target = Vec3::new(4.0, 2.0, -1.0);
    sim.with_character_mut(player, |c, world| c.warp(world, target)).unwrap();
    assert_eq!(sim.character_pose(player).unwrap().position, target);

    assert!(sim.detach_character(player));
    assert!(!sim.detach_character(player));
    assert_eq!(sim.body_count(), 0);
    assert!(sim.character_pose(player).is_none());
}
