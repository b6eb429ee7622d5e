//! Simulation and character configuration.
//!
//! Every knob is a plain field with a documented default. Settings can be
//! loaded from TOML; missing keys fall back to the defaults.

use std::path::Path;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::{PhysicsError, PhysicsResult};

/// Default length of one simulation step in seconds.
pub const DEFAULT_FIXED_TIME_STEP: f32 = 1.0 / 60.0;
/// Penetration deeper than this is pushed out by the recovery pass.
pub const DEFAULT_MAX_PENETRATION_DEPTH: f32 = 0.2;
/// Extra margin applied to the character shape while sweeping.
pub const DEFAULT_ADDED_MARGIN: f32 = 0.02;

/// Configuration for the rigid-body simulation stepper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsSettings {
    /// Length in seconds of one fixed simulation step.
    pub fixed_time_step: f32,

    /// Upper bound on fixed steps taken by a single `simulate` call.
    /// Time beyond this budget stays in the accumulator.
    pub max_steps_per_frame: u32,

    /// Impulse solver passes per fixed step.
    pub velocity_iteration_count: u32,

    /// Multiplier applied to every frame delta (slow motion / fast forward).
    pub time_warp: f32,

    /// World gravity in m/s².
    pub gravity: Vec3,

    /// World-wide linear damping, fraction of velocity removed per second.
    pub linear_damping: f32,

    /// World-wide angular damping, fraction of velocity removed per second.
    pub angular_damping: f32,

    /// Sync body transforms to entities across rayon workers.
    pub parallel_transform_sync: bool,

    /// Contact buffer size used when a body asks for contact collection
    /// without giving an explicit capacity.
    pub contact_capacity: usize,

    /// Defaults for kinematic character controllers.
    pub character: CharacterSettings,
}

impl Default for PhysicsSettings {
    fn default() -> Self {
        Self {
            fixed_time_step: DEFAULT_FIXED_TIME_STEP,
            max_steps_per_frame: 4,
            velocity_iteration_count: 2,
            time_warp: 1.0,
            gravity: Vec3::new(0.0, -9.81, 0.0),
            linear_damping: 0.0,
            angular_damping: 0.0,
            parallel_transform_sync: true,
            contact_capacity: 8,
            character: CharacterSettings::default(),
        }
    }
}

impl PhysicsSettings {
    /// Parses settings from a TOML document and validates them.
    pub fn from_toml_str(source: &str) -> PhysicsResult<Self> {
        let settings: Self = toml::from_str(source)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads and parses a TOML settings file.
    pub fn load(path: impl AsRef<Path>) -> PhysicsResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Rejects values the stepper cannot run with.
    pub fn validate(&self) -> PhysicsResult<()> {
        if !(self.fixed_time_step > 0.0) {
            return Err(PhysicsError::InvalidConfig(format!(
                "fixed_time_step must be positive, got {}",
                self.fixed_time_step
            )));
        }
        if self.max_steps_per_frame == 0 {
            return Err(PhysicsError::InvalidConfig(
                "max_steps_per_frame must be at least 1".into(),
            ));
        }
        if self.time_warp < 0.0 {
            return Err(PhysicsError::InvalidConfig(format!(
                "time_warp must not be negative, got {}",
                self.time_warp
            )));
        }
        self.character.validate()
    }
}

/// Tuning shared by kinematic character controllers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterSettings {
    /// Contacts deeper than this are corrected by penetration recovery.
    pub max_penetration_depth: f32,

    /// Margin added to the convex shape for the duration of a sweep.
    pub added_margin: f32,

    /// Gravity magnitude applied along the negative up axis.
    pub gravity: f32,

    /// Steepest walkable slope.
    pub max_slope_degrees: f32,

    /// Recovery passes per call (first pass included).
    pub recovery_iterations: u32,

    /// Sweep iterations per forward-and-strafe step.
    pub sweep_iterations: u32,
}

impl Default for CharacterSettings {
    fn default() -> Self {
        Self {
            max_penetration_depth: DEFAULT_MAX_PENETRATION_DEPTH,
            added_margin: DEFAULT_ADDED_MARGIN,
            gravity: 9.8 * 3.0,
            max_slope_degrees: 45.0,
            recovery_iterations: 5,
            sweep_iterations: 10,
        }
    }
}

impl CharacterSettings {
    pub fn validate(&self) -> PhysicsResult<()> {
        if self.max_penetration_depth < 0.0 || self.added_margin < 0.0 {
            return Err(PhysicsError::InvalidConfig(
                "character depths and margins must not be negative".into(),
            ));
        }
        if self.recovery_iterations == 0 || self.sweep_iterations == 0 {
            return Err(PhysicsError::InvalidConfig(
                "character iteration counts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
