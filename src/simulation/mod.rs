//! Fixed-step simulation host.
//!
//! [`Simulation`] owns a [`DynamicsEngine`] behind a reader-writer lock.
//! Queries take the read lock; stepping, staged add/remove drains and
//! character edits take the write lock. Bodies attached from gameplay code
//! are staged and only reach the engine at the start of the next
//! [`Simulation::simulate`] call, never in the middle of a step.

mod contacts;
mod registry;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use glam::Vec3;
use hecs::{Entity, World};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::character::{BoxedMovement, KinematicCharacterController};
use crate::collision::{
    ColliderId, ColliderShape, CollisionFilter, CollisionGroups, CollisionQuery, ConvexShape, Pose,
    RayHit, SweepQuery, SweepResult,
};
use crate::components::{CharacterBody, LocalTransform, RigidBody};
use crate::config::PhysicsSettings;
use crate::dynamics::{BodyDesc, BodyHandle, BodyKind, ContactRecorder, DynamicsEngine, PhysicsWorld};
use crate::error::{PhysicsError, PhysicsResult};
use crate::systems::sync_transforms;

pub use contacts::BodyContact;
pub use registry::BodyRegistration;

use contacts::ContactBuffer;

/// Minimum `normal · -gravity` for a contact to count as ground.
pub const DEFAULT_GROUND_THRESHOLD: f32 = 0.75;

/// Whether, and how many, contacts a body keeps per step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContactCollection {
    #[default]
    Off,
    /// Uses `PhysicsSettings::contact_capacity`.
    Default,
    Capacity(usize),
}

/// A ray or sweep hit resolved to its entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitResult {
    pub entity: Option<Entity>,
    pub point: Vec3,
    pub normal: Vec3,
    pub distance: f32,
    /// Share of the ray length or sweep path covered before the hit.
    pub fraction: f32,
}

/// What one [`Simulation::simulate`] call did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    /// Fixed steps taken.
    pub steps: u32,
    /// Seconds advanced, `steps * fixed_time_step`.
    pub simulated: f32,
    /// Accumulated time left for later calls.
    pub remaining: f32,
    /// Whole-step time handed to the pre-step callback.
    pub real_step: f32,
}

/// Character controller hosted by a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacterHandle(u32);

/// Character group, blocked by dynamic, static and kinematic bodies, AI
/// actors and other characters.
pub fn default_character_filter() -> CollisionFilter {
    CollisionFilter::new(
        CollisionGroups::CHARACTER,
        CollisionGroups::DEFAULT
            | CollisionGroups::STATIC
            | CollisionGroups::KINEMATIC
            | CollisionGroups::AI
            | CollisionGroups::CHARACTER,
    )
}

/// Per-frame hook, called with seconds.
pub type StepCallback = Box<dyn FnMut(f32) + Send>;

#[derive(Default)]
struct StepCallbacks {
    pre: Option<StepCallback>,
    post: Option<StepCallback>,
}

struct BodyRecord {
    entity: Entity,
    /// `None` for character ghosts.
    registration: Option<Arc<BodyRegistration>>,
    contacts: Option<ContactBuffer>,
}

struct CharacterSlot {
    entity: Entity,
    controller: KinematicCharacterController,
}

struct Live<E> {
    engine: E,
    /// Indexed by engine handle.
    bodies: Vec<Option<BodyRecord>>,
    entities: HashMap<Entity, BodyHandle>,
    characters: Vec<Option<CharacterSlot>>,
    remaining: f32,
    time_warp: f32,
}

impl<E: DynamicsEngine> Live<E> {
    fn record(&self, handle: BodyHandle) -> Option<&BodyRecord> {
        self.bodies.get(handle.0 as usize).and_then(Option::as_ref)
    }

    fn entity_of(&self, handle: BodyHandle) -> Option<Entity> {
        self.record(handle).map(|r| r.entity)
    }

    fn insert_record(&mut self, handle: BodyHandle, record: BodyRecord) {
        let index = handle.0 as usize;
        if self.bodies.len() <= index {
            self.bodies.resize_with(index + 1, || None);
        }
        self.entities.insert(record.entity, handle);
        self.bodies[index] = Some(record);
    }

    /// Nulls the lookup slot, then removes the engine body.
    fn remove_record(&mut self, handle: BodyHandle) {
        if let Some(record) = self.bodies.get_mut(handle.0 as usize).and_then(Option::take) {
            if self.entities.get(&record.entity) == Some(&handle) {
                self.entities.remove(&record.entity);
            }
        }
        self.engine.remove_body(handle);
    }

    fn ray_result(&self, hit: RayHit) -> HitResult {
        HitResult {
            entity: self.entity_of(hit.collider),
            point: hit.point,
            normal: hit.normal,
            distance: hit.distance,
            fraction: hit.fraction,
        }
    }

    fn sweep_result(&self, hit: SweepResult, length: f32) -> HitResult {
        HitResult {
            entity: hit.collider.and_then(|h| self.entity_of(h)),
            point: hit.point,
            normal: hit.normal,
            distance: hit.fraction * length,
            fraction: hit.fraction,
        }
    }
}

/// Routes engine contacts into per-body buffers. Runs on narrow-phase
/// workers.
struct MappingRecorder<'a> {
    bodies: &'a [Option<BodyRecord>],
}

impl ContactRecorder for MappingRecorder<'_> {
    fn record(&self, body: BodyHandle, other: BodyHandle, normal: Vec3, point: Vec3, depth: f32) {
        let Some(Some(record)) = self.bodies.get(body.0 as usize) else {
            return;
        };
        let Some(buffer) = &record.contacts else {
            return;
        };
        let other = self
            .bodies
            .get(other.0 as usize)
            .and_then(Option::as_ref)
            .map(|r| r.entity);
        buffer.record(
            BodyContact {
                other,
                normal,
                point,
                depth,
            },
            record.entity,
        );
    }
}

/// Fixed-step rigid-body and character simulation.
pub struct Simulation<E: DynamicsEngine = PhysicsWorld> {
    settings: PhysicsSettings,
    live: RwLock<Live<E>>,
    pending_add: Mutex<BTreeMap<u64, Arc<BodyRegistration>>>,
    pending_remove: Mutex<BTreeMap<u64, Arc<BodyRegistration>>>,
    next_id: AtomicU64,
    callbacks: Mutex<StepCallbacks>,
}

impl Simulation<PhysicsWorld> {
    /// Simulation over the in-process [`PhysicsWorld`].
    pub fn new(settings: PhysicsSettings) -> PhysicsResult<Self> {
        let world = PhysicsWorld::new(&settings);
        Self::with_engine(settings, world)
    }
}

impl<E: DynamicsEngine> Simulation<E> {
    pub fn with_engine(settings: PhysicsSettings, engine: E) -> PhysicsResult<Self> {
        settings.validate()?;
        let time_warp = settings.time_warp;
        Ok(Self {
            settings,
            live: RwLock::new(Live {
                engine,
                bodies: Vec::new(),
                entities: HashMap::new(),
                characters: Vec::new(),
                remaining: 0.0,
                time_warp,
            }),
            pending_add: Mutex::new(BTreeMap::new()),
            pending_remove: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(0),
            callbacks: Mutex::new(StepCallbacks::default()),
        })
    }

    pub fn settings(&self) -> &PhysicsSettings {
        &self.settings
    }

    pub fn time_warp(&self) -> f32 {
        self.live.read().time_warp
    }

    /// Negative values are clamped to zero (paused).
    pub fn set_time_warp(&self, time_warp: f32) {
        self.live.write().time_warp = time_warp.max(0.0);
    }

    /// Accumulated time not yet simulated.
    pub fn remaining_time(&self) -> f32 {
        self.live.read().remaining
    }

    /// Live engine bodies, character ghosts included.
    pub fn body_count(&self) -> usize {
        self.live.read().engine.body_count()
    }

    /// Called once per `simulate` with the whole-step time about to run.
    pub fn set_pre_step(&self, callback: impl FnMut(f32) + Send + 'static) {
        self.callbacks.lock().pre = Some(Box::new(callback));
    }

    /// Called once per `simulate` after transform sync, with the simulated
    /// time.
    pub fn set_post_step(&self, callback: impl FnMut(f32) + Send + 'static) {
        self.callbacks.lock().post = Some(Box::new(callback));
    }

    /// Read access to the engine.
    pub fn read_engine<R>(&self, f: impl FnOnce(&E) -> R) -> R {
        f(&self.live.read().engine)
    }

    /// Write access to the engine between steps.
    pub fn with_engine_mut<R>(&self, f: impl FnOnce(&mut E) -> R) -> R {
        f(&mut self.live.write().engine)
    }

    // -----------------------------------------------------------------------
    // Rigid bodies
    // -----------------------------------------------------------------------

    /// Stages a body for `entity`. It becomes live at the start of the next
    /// `simulate` call.
    pub fn attach_rigid_body(
        &self,
        entity: Entity,
        desc: BodyDesc,
        contacts: ContactCollection,
    ) -> PhysicsResult<Arc<BodyRegistration>> {
        desc.validate()?;
        let capacity = match contacts {
            ContactCollection::Off => 0,
            ContactCollection::Default => self.settings.contact_capacity,
            ContactCollection::Capacity(n) => n,
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let registration = Arc::new(BodyRegistration::new(id, entity, desc, capacity));
        self.pending_add.lock().insert(id, Arc::clone(&registration));
        Ok(registration)
    }

    /// Like [`Self::attach_rigid_body`], and also gives the entity its
    /// [`RigidBody`] and [`LocalTransform`] components.
    pub fn attach_to_scene(
        &self,
        scene: &mut World,
        entity: Entity,
        desc: BodyDesc,
        contacts: ContactCollection,
    ) -> PhysicsResult<Arc<BodyRegistration>> {
        if !scene.contains(entity) {
            return Err(PhysicsError::UnknownEntity);
        }
        let transform = LocalTransform::from_pose(&desc.pose);
        let registration = self.attach_rigid_body(entity, desc, contacts)?;
        scene
            .insert(entity, (RigidBody(Arc::clone(&registration)), transform))
            .map_err(|_| PhysicsError::UnknownEntity)?;
        Ok(registration)
    }

    /// Stages removal of a body. A body still waiting to be added is
    /// dropped from the add set instead; returns `true` in that case.
    pub fn detach_rigid_body(&self, registration: &Arc<BodyRegistration>) -> bool {
        if self.pending_add.lock().remove(&registration.id()).is_some() {
            return true;
        }
        self.pending_remove
            .lock()
            .insert(registration.id(), Arc::clone(registration));
        false
    }

    /// Removals first, then additions.
    fn drain_staged(&self, live: &mut Live<E>) {
        let removals = std::mem::take(&mut *self.pending_remove.lock());
        let additions = std::mem::take(&mut *self.pending_add.lock());
        if removals.is_empty() && additions.is_empty() {
            return;
        }

        let mut removed = 0usize;
        for registration in removals.values() {
            if let Some(handle) = registration.take_handle() {
                live.remove_record(handle);
                removed += 1;
            }
        }

        let mut added = 0usize;
        for registration in additions.into_values() {
            match live.engine.add_body(registration.desc()) {
                Ok(handle) => {
                    registration.set_handle(handle);
                    let capacity = registration.contact_capacity();
                    live.insert_record(
                        handle,
                        BodyRecord {
                            entity: registration.entity(),
                            contacts: (capacity > 0).then(|| ContactBuffer::new(capacity)),
                            registration: Some(registration),
                        },
                    );
                    added += 1;
                }
                Err(error) => {
                    warn!(entity = ?registration.entity(), %error, "staged body rejected by engine");
                }
            }
        }
        debug!(added, removed, "drained staged bodies");
    }

    // -----------------------------------------------------------------------
    // Stepping
    // -----------------------------------------------------------------------

    /// Advances the simulation by `dt` seconds of frame time.
    ///
    /// Frame time (scaled by the time warp) accumulates; whole fixed steps
    /// are taken from it, at most `max_steps_per_frame` per call. Characters
    /// run their movement after every engine step. Entity transforms in
    /// `scene` are refreshed once when at least one step ran.
    pub fn simulate(&self, dt: f32, scene: &mut World) -> StepReport {
        let fixed = self.settings.fixed_time_step;
        let max_steps = self.settings.max_steps_per_frame;

        let real_step = {
            let mut live = self.live.write();
            self.drain_staged(&mut live);
            live.remaining += dt.max(0.0) * live.time_warp;
            let whole = live.remaining - live.remaining % fixed;
            whole.min(max_steps as f32 * fixed)
        };

        self.invoke(|c| &mut c.pre, real_step);

        let (steps, remaining) = {
            let mut live = self.live.write();
            let Live {
                engine,
                bodies,
                characters,
                remaining,
                ..
            } = &mut *live;

            let mut steps = 0u32;
            while *remaining >= fixed && steps < max_steps {
                trace!(step = steps, remaining = *remaining, "fixed step");
                for buffer in bodies.iter_mut().flatten().filter_map(|r| r.contacts.as_mut()) {
                    buffer.reset();
                }
                engine.step(fixed, &MappingRecorder { bodies: bodies.as_slice() });
                for slot in characters.iter_mut().flatten() {
                    slot.controller.update_action(&mut *engine, fixed);
                }
                *remaining -= fixed;
                steps += 1;
            }
            (steps, *remaining)
        };

        let simulated = steps as f32 * fixed;
        if steps > 0 {
            let poses = self.moving_poses();
            sync_transforms(scene, &poses, self.settings.parallel_transform_sync);
        }
        self.invoke(|c| &mut c.post, simulated);

        StepReport {
            steps,
            simulated,
            remaining,
            real_step,
        }
    }

    /// Runs a callback with no lock held, so it may call back into the
    /// simulation.
    fn invoke(&self, slot: impl Fn(&mut StepCallbacks) -> &mut Option<StepCallback>, seconds: f32) {
        let Some(mut callback) = slot(&mut *self.callbacks.lock()).take() else {
            return;
        };
        callback(seconds);
        let mut callbacks = self.callbacks.lock();
        let current = slot(&mut *callbacks);
        if current.is_none() {
            *current = Some(callback);
        }
    }

    /// Poses of every non-static body and every character.
    fn moving_poses(&self) -> HashMap<Entity, Pose> {
        let live = self.live.read();
        let mut poses = HashMap::new();
        for (index, record) in live.bodies.iter().enumerate() {
            let Some(record) = record else { continue };
            if record.registration.is_none() {
                continue;
            }
            let handle = ColliderId(index as u32);
            if live.engine.body_kind(handle) == Some(BodyKind::Static) {
                continue;
            }
            if let Some(pose) = live.engine.body_pose(handle) {
                poses.insert(record.entity, pose);
            }
        }
        for slot in live.characters.iter().flatten() {
            poses.insert(slot.entity, slot.controller.pose());
        }
        poses
    }

    /// Drops every live body and character. Staged bodies stay staged.
    pub fn clear(&self) {
        let mut live = self.live.write();
        for record in live.bodies.iter().flatten() {
            if let Some(registration) = &record.registration {
                registration.take_handle();
            }
        }
        live.bodies.clear();
        live.entities.clear();
        live.characters.clear();
        live.engine.clear();
    }

    // -----------------------------------------------------------------------
    // Contacts
    // -----------------------------------------------------------------------

    /// Contacts `entity`'s body saw during the last fixed step.
    pub fn contacts(&self, entity: Entity) -> PhysicsResult<Vec<BodyContact>> {
        let live = self.live.read();
        let record = live
            .entities
            .get(&entity)
            .and_then(|h| live.record(*h))
            .ok_or(PhysicsError::UnknownEntity)?;
        Ok(record.contacts.as_ref().map(ContactBuffer::contacts).unwrap_or_default())
    }

    /// First contact pushing `entity` against gravity, using
    /// [`DEFAULT_GROUND_THRESHOLD`].
    pub fn ground_contact(&self, entity: Entity) -> Option<BodyContact> {
        self.ground_contact_with_threshold(entity, DEFAULT_GROUND_THRESHOLD)
    }

    pub fn ground_contact_with_threshold(&self, entity: Entity, threshold: f32) -> Option<BodyContact> {
        let live = self.live.read();
        let record = live.entities.get(&entity).and_then(|h| live.record(*h))?;
        let gravity = record
            .registration
            .as_ref()
            .and_then(|r| r.desc().gravity_override)
            .unwrap_or(self.settings.gravity);
        let up = -gravity.normalize_or_zero();
        record
            .contacts
            .as_ref()?
            .contacts()
            .into_iter()
            .find(|c| c.normal.dot(up) > threshold)
    }

    // -----------------------------------------------------------------------
    // Characters
    // -----------------------------------------------------------------------

    /// Adds a kinematic character for `entity` right away. The character
    /// gets a ghost body in the engine; `filter` defaults to
    /// [`default_character_filter`].
    pub fn attach_character(
        &self,
        entity: Entity,
        shape: ColliderShape,
        pose: Pose,
        filter: Option<CollisionFilter>,
        movement: Option<BoxedMovement>,
    ) -> PhysicsResult<CharacterHandle> {
        if !shape.is_convex() {
            return Err(PhysicsError::MissingConvexShape);
        }
        shape.validate()?;
        let filter = filter.unwrap_or_else(default_character_filter);

        let mut live = self.live.write();
        let desc = BodyDesc::kinematic(shape, pose).with_filter(filter).as_ghost();
        let handle = live.engine.add_body(&desc)?;
        let mut controller =
            match KinematicCharacterController::new(handle, shape, filter, &self.settings.character, pose) {
                Ok(controller) => controller,
                Err(error) => {
                    live.engine.remove_body(handle);
                    return Err(error);
                }
            };
        controller.set_movement(movement);

        live.insert_record(
            handle,
            BodyRecord {
                entity,
                registration: None,
                contacts: None,
            },
        );
        let slot = CharacterSlot { entity, controller };
        let index = match live.characters.iter().position(Option::is_none) {
            Some(index) => {
                live.characters[index] = Some(slot);
                index
            }
            None => {
                live.characters.push(Some(slot));
                live.characters.len() - 1
            }
        };
        Ok(CharacterHandle(index as u32))
    }

    /// Attaches a character and gives the entity its [`CharacterBody`] and
    /// [`LocalTransform`] components.
    pub fn attach_character_to_scene(
        &self,
        scene: &mut World,
        entity: Entity,
        shape: ColliderShape,
        pose: Pose,
        movement: Option<BoxedMovement>,
    ) -> PhysicsResult<CharacterHandle> {
        if !scene.contains(entity) {
            return Err(PhysicsError::UnknownEntity);
        }
        let handle = self.attach_character(entity, shape, pose, None, movement)?;
        scene
            .insert(entity, (CharacterBody(handle), LocalTransform::from_pose(&pose)))
            .map_err(|_| PhysicsError::UnknownEntity)?;
        Ok(handle)
    }

    pub fn detach_character(&self, handle: CharacterHandle) -> bool {
        let mut live = self.live.write();
        let Some(slot) = live.characters.get_mut(handle.0 as usize).and_then(Option::take) else {
            return false;
        };
        live.remove_record(slot.controller.collider());
        true
    }

    /// Runs `f` with the controller and the collision world, under the
    /// write lock. `None` for a detached handle.
    pub fn with_character_mut<R>(
        &self,
        handle: CharacterHandle,
        f: impl FnOnce(&mut KinematicCharacterController, &mut dyn CollisionQuery) -> R,
    ) -> Option<R> {
        let mut live = self.live.write();
        let Live {
            engine, characters, ..
        } = &mut *live;
        let slot = characters.get_mut(handle.0 as usize)?.as_mut()?;
        Some(f(&mut slot.controller, engine))
    }

    pub fn character_pose(&self, handle: CharacterHandle) -> Option<Pose> {
        let live = self.live.read();
        let slot = live.characters.get(handle.0 as usize)?.as_ref()?;
        Some(slot.controller.pose())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Nearest hit along a ray, ignoring `skip`'s body. A zero direction or
    /// non-positive distance never hits.
    pub fn raycast(
        &self,
        from: Vec3,
        direction: Vec3,
        max_distance: f32,
        mask: CollisionGroups,
        skip: Option<Entity>,
    ) -> Option<HitResult> {
        let live = self.live.read();
        let hit = match skip.and_then(|e| live.entities.get(&e).copied()) {
            None => live.engine.raycast(from, direction, max_distance, mask)?,
            Some(skip) => live
                .engine
                .raycast_all(from, direction, max_distance, mask)
                .into_iter()
                .find(|hit| hit.collider != skip)?,
        };
        Some(live.ray_result(hit))
    }

    /// Nearest hit on the segment `from..to`.
    pub fn raycast_to(
        &self,
        from: Vec3,
        to: Vec3,
        mask: CollisionGroups,
        skip: Option<Entity>,
    ) -> Option<HitResult> {
        let delta = to - from;
        self.raycast(from, delta, delta.length(), mask, skip)
    }

    /// Every hit along a ray, nearest first.
    pub fn raycast_penetrating(
        &self,
        from: Vec3,
        direction: Vec3,
        max_distance: f32,
        mask: CollisionGroups,
        skip: Option<Entity>,
    ) -> Vec<HitResult> {
        let live = self.live.read();
        let skip = skip.and_then(|e| live.entities.get(&e).copied());
        live.engine
            .raycast_all(from, direction, max_distance, mask)
            .into_iter()
            .filter(|hit| Some(hit.collider) != skip)
            .map(|hit| live.ray_result(hit))
            .collect()
    }

    /// First hit of `shape` moving from `start` to `end`, ignoring
    /// `skip`'s body.
    pub fn shape_sweep(
        &self,
        shape: &ConvexShape,
        start: Pose,
        end: Pose,
        filter: CollisionFilter,
        skip: Option<Entity>,
    ) -> Option<HitResult> {
        let live = self.live.read();
        let query = Self::sweep_query(&live, shape, start, end, filter, skip);
        let hit = live.engine.convex_sweep(&query);
        hit.succeeded
            .then(|| live.sweep_result(hit, start.position.distance(end.position)))
    }

    /// Every hit of a sweep, nearest first.
    pub fn shape_sweep_penetrating(
        &self,
        shape: &ConvexShape,
        start: Pose,
        end: Pose,
        filter: CollisionFilter,
        skip: Option<Entity>,
    ) -> Vec<HitResult> {
        let live = self.live.read();
        let query = Self::sweep_query(&live, shape, start, end, filter, skip);
        let length = start.position.distance(end.position);
        live.engine
            .convex_sweep_all(&query)
            .into_iter()
            .map(|hit| live.sweep_result(hit, length))
            .collect()
    }

    fn sweep_query<'a>(
        live: &Live<E>,
        shape: &'a ConvexShape,
        start: Pose,
        end: Pose,
        filter: CollisionFilter,
        skip: Option<Entity>,
    ) -> SweepQuery<'a> {
        SweepQuery {
            shape,
            start,
            end,
            filter,
            skip: skip.and_then(|e| live.entities.get(&e).copied()),
            allowed_penetration: 0.0,
        }
    }
}
